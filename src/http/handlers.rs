//! JSON handlers over the connector operations.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConnectorError, ErrorReason};
use crate::events::registry::StreamInfo;
use crate::events::stream::{Checkpoint, EventStream, EventStreamConfig};
use crate::http::server::AppState;
use crate::tezos::types::OpHash;
use crate::transactions::{TransactionReceipt, TransactionSendRequest, TransactionSendResponse};

/// Longest a single events poll may hold the request open.
const MAX_POLL_WAIT: Duration = Duration::from_secs(25);

/// Connector error rendered as `{"error": ..., "reason": ...}`.
#[derive(Debug)]
pub struct ApiError(pub ConnectorError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    reason: ErrorReason,
}

impl From<ConnectorError> for ApiError {
    fn from(err: ConnectorError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if let ConnectorError::StreamExists(_) = self.0 {
            return StatusCode::CONFLICT;
        }
        match self.0.reason() {
            ErrorReason::InvalidInputs => StatusCode::BAD_REQUEST,
            ErrorReason::NotFound => StatusCode::NOT_FOUND,
            ErrorReason::NonceTooLow
            | ErrorReason::InsufficientFunds
            | ErrorReason::Transient
            | ErrorReason::SignerUnreachable
            | ErrorReason::SignerRejected
            | ErrorReason::SignerBadResponse => StatusCode::BAD_GATEWAY,
            ErrorReason::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorReason::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self.0, status = status.as_u16(), "Request failed");
        }
        let body = ErrorBody {
            error: self.0.to_string(),
            reason: self.0.reason(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
pub struct HealthStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub network: String,
    pub streams: usize,
    pub cached_blocks: usize,
    pub block_cache_hit_rate: f64,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let connector = &state.connector;
    Json(HealthStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if connector.shutdown_handle().is_triggered() {
            "stopping"
        } else {
            "operational"
        },
        network: connector.config().connector.network.clone(),
        streams: connector.list_streams().len(),
        cached_blocks: connector.caches().blocks.len(),
        block_cache_hit_rate: connector.caches().blocks.stats().hit_rate(),
    })
}

pub async fn send_transaction(
    State(state): State<AppState>,
    Json(request): Json<TransactionSendRequest>,
) -> Result<Json<TransactionSendResponse>, ApiError> {
    let response = state.connector.send_transaction(&request).await?;
    Ok(Json(response))
}

pub async fn transaction_receipt(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<TransactionReceipt>, ApiError> {
    let hash: OpHash = hash
        .parse()
        .map_err(|e| ConnectorError::InvalidInputs(format!("operation hash: {}", e)))?;
    state
        .connector
        .transaction_receipt(&hash)
        .map(Json)
        .ok_or_else(|| ApiError(ConnectorError::ReceiptNotFound(hash.to_string())))
}

pub async fn subscribe(
    State(state): State<AppState>,
    Json(config): Json<EventStreamConfig>,
) -> Result<(StatusCode, Json<EventStream>), ApiError> {
    let stream = state.connector.subscribe(config)?;
    Ok((StatusCode::CREATED, Json(stream)))
}

pub async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamInfo>> {
    Json(state.connector.list_streams())
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Checkpoint>, ApiError> {
    Ok(Json(state.connector.unsubscribe(id).await?))
}

pub async fn checkpoint(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Checkpoint>, ApiError> {
    Ok(Json(state.connector.checkpoint(id)?))
}

#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    pub wait_ms: u64,
}

/// Next batch for a stream, or 204 when none arrived within `wait_ms`.
pub async fn poll_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<PollQuery>,
) -> Result<Response, ApiError> {
    let wait = Duration::from_millis(query.wait_ms).min(MAX_POLL_WAIT);
    match state.connector.poll_events(id, wait).await? {
        Some(batch) => Ok(Json(batch).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
