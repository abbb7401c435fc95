//! Connector error taxonomy and host-facing error reasons.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in any connector subsystem.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Malformed address or operation bytes. Never retried.
    #[error("Invalid inputs: {0}")]
    InvalidInputs(String),

    /// Chain node unreachable or returned an error.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// The signer HTTP call did not complete.
    #[error("Signer unreachable: {0}")]
    SignerUnreachable(String),

    /// The signer answered with a non-2xx status.
    #[error("Signer rejected request with status {status}: {body}")]
    SignerRejected { status: u16, body: String },

    /// The signer answered 2xx but the body was not a usable signature.
    #[error("Signer returned a bad response: {0}")]
    SignerBadResponse(String),

    /// An operation was invoked on something not ready for it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Cache construction failed. Fatal at startup only.
    #[error("Failed to initialize {0} cache: capacity must be greater than zero")]
    CacheInit(&'static str),

    #[error("Event stream {0} not found")]
    StreamNotFound(Uuid),

    #[error("No receipt for operation {0}")]
    ReceiptNotFound(String),

    #[error("Event stream {0} already exists")]
    StreamExists(Uuid),

    /// Cancellation or deadline reached. Never masked as another kind.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Enumerated reason the host uses to pick retry vs. permanent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidInputs,
    NonceTooLow,
    InsufficientFunds,
    Transient,
    SignerUnreachable,
    SignerRejected,
    SignerBadResponse,
    NotFound,
    Cancelled,
    Internal,
}

impl ConnectorError {
    /// Classify the error for the host.
    pub fn reason(&self) -> ErrorReason {
        match self {
            ConnectorError::InvalidInputs(_) => ErrorReason::InvalidInputs,
            ConnectorError::Rpc(message) => classify_node_error(message),
            ConnectorError::Timeout(_) => ErrorReason::Transient,
            ConnectorError::SignerUnreachable(_) => ErrorReason::SignerUnreachable,
            ConnectorError::SignerRejected { .. } => ErrorReason::SignerRejected,
            ConnectorError::SignerBadResponse(_) => ErrorReason::SignerBadResponse,
            ConnectorError::StreamNotFound(_) | ConnectorError::ReceiptNotFound(_) => {
                ErrorReason::NotFound
            }
            ConnectorError::Cancelled => ErrorReason::Cancelled,
            ConnectorError::InvalidState(_)
            | ConnectorError::CacheInit(_)
            | ConnectorError::StreamExists(_)
            | ConnectorError::Config(_) => ErrorReason::Internal,
        }
    }

    /// Whether the retry policy should try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectorError::Rpc(_) | ConnectorError::Timeout(_))
    }
}

impl ErrorReason {
    /// Label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidInputs => "invalid_inputs",
            ErrorReason::NonceTooLow => "nonce_too_low",
            ErrorReason::InsufficientFunds => "insufficient_funds",
            ErrorReason::Transient => "transient",
            ErrorReason::SignerUnreachable => "signer_unreachable",
            ErrorReason::SignerRejected => "signer_rejected",
            ErrorReason::SignerBadResponse => "signer_bad_response",
            ErrorReason::NotFound => "not_found",
            ErrorReason::Cancelled => "cancelled",
            ErrorReason::Internal => "internal",
        }
    }
}

/// Map well-known node error identifiers onto a more specific reason.
fn classify_node_error(message: &str) -> ErrorReason {
    if message.contains("counter_in_the_past") {
        ErrorReason::NonceTooLow
    } else if message.contains("balance_too_low") {
        ErrorReason::InsufficientFunds
    } else {
        ErrorReason::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectorError::Timeout(10);
        assert_eq!(err.to_string(), "RPC timeout after 10 seconds");

        let err = ConnectorError::SignerRejected {
            status: 500,
            body: "internal error".to_string(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("internal error"));
    }

    #[test]
    fn test_node_error_reasons() {
        let err = ConnectorError::Rpc(
            "injection failed: proto.alpha.contract.counter_in_the_past".to_string(),
        );
        assert_eq!(err.reason(), ErrorReason::NonceTooLow);

        let err = ConnectorError::Rpc("proto.alpha.contract.balance_too_low".to_string());
        assert_eq!(err.reason(), ErrorReason::InsufficientFunds);

        let err = ConnectorError::Rpc("connection refused".to_string());
        assert_eq!(err.reason(), ErrorReason::Transient);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ConnectorError::Rpc("x".into()).is_retryable());
        assert!(ConnectorError::Timeout(1).is_retryable());
        assert!(!ConnectorError::InvalidInputs("x".into()).is_retryable());
        assert!(!ConnectorError::Cancelled.is_retryable());
        assert!(!ConnectorError::SignerUnreachable("x".into()).is_retryable());
    }

    #[test]
    fn test_reason_serialization() {
        let json = serde_json::to_string(&ErrorReason::InvalidInputs).unwrap();
        assert_eq!(json, "\"invalid_inputs\"");
        assert_eq!(
            json.trim_matches('"'),
            ErrorReason::InvalidInputs.as_str()
        );
    }
}
