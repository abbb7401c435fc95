//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the connector.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the Tezos connector.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Chain node and signer endpoints.
    pub connector: BlockchainConfig,

    /// Block and transaction cache sizes.
    pub cache: CacheConfig,

    /// Event stream catch-up and polling behaviour.
    pub events: EventsConfig,

    /// Backoff used by the catch-up engine.
    pub retry: RetryConfig,

    /// Host-facing HTTP API.
    pub server: ServerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// Tezos node RPC endpoint URL.
    pub rpc_url: String,

    /// Failover node RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Network name (e.g. "mainnet", "ghostnet"). Informational.
    pub network: String,

    /// Base URL of the detached-signing service.
    pub signatory_url: String,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Signer request timeout in seconds.
    pub signer_timeout_secs: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8732".to_string(),
            failover_urls: Vec::new(),
            network: "mainnet".to_string(),
            signatory_url: String::new(),
            rpc_timeout_secs: 30,
            signer_timeout_secs: 30,
        }
    }
}

/// LRU cache capacities.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub block_cache_size: usize,
    pub tx_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 250,
            tx_cache_size: 250,
        }
    }
}

/// Event stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Number of blocks fetched per page while catching up.
    pub catchup_page_size: u64,

    /// Distance from the head beyond which a stream is catching up.
    /// Must be at least `catchup_page_size`.
    pub catchup_threshold: u64,

    /// Largest gap head-tracking walks in one tick before re-entering catch-up.
    pub checkpoint_block_gap: u64,

    /// Attach block timestamps to delivered blocks and events.
    pub block_timestamps: bool,

    /// Head-tracking polling interval in milliseconds.
    pub filter_polling_interval_ms: u64,

    /// Confirmations after which a block is cached by level.
    pub finality_depth: u64,

    /// Capacity of each stream's delivery queue, in batches.
    pub batch_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            catchup_page_size: 500,
            catchup_threshold: 500,
            checkpoint_block_gap: 50,
            block_timestamps: true,
            filter_polling_interval_ms: 1000,
            finality_depth: 2,
            batch_buffer: 16,
        }
    }
}

impl EventsConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.filter_polling_interval_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor applied per attempt.
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            factor: 2.0,
        }
    }
}

/// Host-facing API listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:5102").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5102".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:6000".to_string(),
        }
    }
}
