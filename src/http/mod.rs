//! Host-facing HTTP API.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request ID, timeout, tracing layers)
//!     → handlers.rs (JSON in/out over TezosConnector operations)
//!     → ApiError → {"error", "reason"} with a status from the reason
//! ```

pub mod handlers;
pub mod server;

pub use handlers::ApiError;
pub use server::{AppState, HttpServer};
