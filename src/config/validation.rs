//! Configuration validation.
//!
//! Serde handles syntax; this pass checks values. All errors are collected
//! rather than stopping at the first one.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ConnectorConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted key of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ConnectorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let connector = &config.connector;
    if connector.rpc_url.trim().is_empty() {
        errors.push(ValidationError::new("connector.rpc_url", "missing RPC URL"));
    } else if let Err(e) = url::Url::parse(&connector.rpc_url) {
        errors.push(ValidationError::new(
            "connector.rpc_url",
            format!("invalid URL '{}': {}", connector.rpc_url, e),
        ));
    }

    for failover in &connector.failover_urls {
        if let Err(e) = url::Url::parse(failover) {
            errors.push(ValidationError::new(
                "connector.failover_urls",
                format!("invalid URL '{}': {}", failover, e),
            ));
        }
    }

    // An empty signatory URL is allowed: sends fail with SignerUnreachable.
    if !connector.signatory_url.is_empty() {
        if let Err(e) = url::Url::parse(&connector.signatory_url) {
            errors.push(ValidationError::new(
                "connector.signatory_url",
                format!("invalid URL '{}': {}", connector.signatory_url, e),
            ));
        }
    }

    if config.events.catchup_page_size == 0 {
        errors.push(ValidationError::new(
            "events.catchup_page_size",
            "must be greater than zero",
        ));
    }
    if config.events.filter_polling_interval_ms == 0 {
        errors.push(ValidationError::new(
            "events.filter_polling_interval_ms",
            "must be greater than zero",
        ));
    }
    if config.events.batch_buffer == 0 {
        errors.push(ValidationError::new(
            "events.batch_buffer",
            "must be greater than zero",
        ));
    }

    if config.retry.factor < 1.0 {
        errors.push(ValidationError::new(
            "retry.factor",
            format!("must be at least 1.0, got {}", config.retry.factor),
        ));
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            format!(
                "{}ms exceeds retry.max_delay_ms {}ms",
                config.retry.initial_delay_ms, config.retry.max_delay_ms
            ),
        ));
    }

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("invalid socket address '{}'", config.server.bind_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
