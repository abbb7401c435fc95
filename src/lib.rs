//! Tezos blockchain connector library.

pub mod cache;
pub mod config;
pub mod connector;
pub mod error;
pub mod events;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod signer;
pub mod tezos;
pub mod transactions;

pub use config::schema::ConnectorConfig;
pub use connector::TezosConnector;
pub use error::{ConnectorError, ConnectorResult, ErrorReason};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
