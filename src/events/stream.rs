//! Event stream definitions, checkpoints and the normalized events
//! delivered to the host.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EventsConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::tezos::rpc::{Block, OperationParameters};
use crate::tezos::types::{Address, BlockHash, OpHash};

/// Selects transactions to, or contract events emitted by, an address.
///
/// Unset fields match anything. `entrypoint` only matches transactions
/// and `tag` only matches contract events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}

impl EventFilter {
    fn matches_address(&self, address: Option<&str>) -> bool {
        match (&self.address, address) {
            (None, _) => true,
            (Some(expected), Some(actual)) => expected.to_string() == actual,
            (Some(_), None) => false,
        }
    }

    fn matches_transaction(&self, destination: Option<&str>, entrypoint: Option<&str>) -> bool {
        if self.tag.is_some() || !self.matches_address(destination) {
            return false;
        }
        match &self.entrypoint {
            None => true,
            Some(expected) => entrypoint.unwrap_or("default") == expected,
        }
    }

    fn matches_contract_event(&self, emitter: Option<&str>, tag: Option<&str>) -> bool {
        if self.entrypoint.is_some() || !self.matches_address(emitter) {
            return false;
        }
        match &self.tag {
            None => true,
            Some(expected) => tag == Some(expected.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transaction,
    ContractEvent,
}

/// A matched on-chain occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub block_level: u64,
    pub block_hash: BlockHash,
    pub op_hash: OpHash,
    /// Position of the content within its operation.
    pub content_index: usize,
    /// Destination of a transaction, emitter of a contract event.
    pub address: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub entrypoint: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Applied transactions and contract events in `block` matching any filter.
pub fn events_in_block(
    block: &Block,
    filters: &[EventFilter],
    include_timestamp: bool,
) -> Vec<Event> {
    let timestamp = include_timestamp.then_some(block.header.timestamp);
    let mut events = Vec::new();
    if filters.is_empty() {
        return events;
    }

    let make = |kind, op_hash: &OpHash, index, address: &str| Event {
        kind,
        block_level: block.header.level,
        block_hash: block.hash.clone(),
        op_hash: op_hash.clone(),
        content_index: index,
        address: address.to_string(),
        source: None,
        entrypoint: None,
        tag: None,
        payload: None,
        timestamp,
    };

    for operation in block.all_operations() {
        for (index, content) in operation.contents.iter().enumerate() {
            if content.result_status() != Some("applied") {
                continue;
            }

            if content.kind == "transaction" {
                if let Some(event) = transaction_event(
                    filters,
                    content.destination.as_deref(),
                    content.source.as_deref(),
                    content.parameters.as_ref(),
                    |address| make(EventKind::Transaction, &operation.hash, index, address),
                ) {
                    events.push(event);
                }
            }

            for internal in content.internal_results() {
                if !internal.applied() {
                    continue;
                }
                match internal.kind.as_str() {
                    "event" => {
                        let emitter = internal.source.as_deref();
                        let tag = internal.tag.as_deref();
                        if filters.iter().any(|f| f.matches_contract_event(emitter, tag)) {
                            let mut event = make(
                                EventKind::ContractEvent,
                                &operation.hash,
                                index,
                                emitter.unwrap_or_default(),
                            );
                            event.tag = internal.tag.clone();
                            event.payload = internal.payload.clone();
                            events.push(event);
                        }
                    }
                    "transaction" => {
                        if let Some(event) = transaction_event(
                            filters,
                            internal.destination.as_deref(),
                            internal.source.as_deref(),
                            internal.parameters.as_ref(),
                            |address| {
                                make(EventKind::Transaction, &operation.hash, index, address)
                            },
                        ) {
                            events.push(event);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    events
}

fn transaction_event(
    filters: &[EventFilter],
    destination: Option<&str>,
    source: Option<&str>,
    parameters: Option<&OperationParameters>,
    make: impl FnOnce(&str) -> Event,
) -> Option<Event> {
    let entrypoint = parameters.map(|p| p.entrypoint.as_str());
    if !filters
        .iter()
        .any(|f| f.matches_transaction(destination, entrypoint))
    {
        return None;
    }
    let mut event = make(destination.unwrap_or_default());
    event.source = source.map(str::to_string);
    event.entrypoint = entrypoint.map(str::to_string);
    event.payload = parameters.map(|p| p.value.clone());
    Some(event)
}

/// Where a stream without a checkpoint starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FromBlock {
    #[default]
    Latest,
    Earliest,
    #[serde(untagged)]
    Level(u64),
}

/// A chain position: level plus the hash seen at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub level: u64,
    pub hash: BlockHash,
}

/// Last position delivered to the host for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream_id: Uuid,
    #[serde(default)]
    pub last_block: Option<BlockPosition>,
    #[serde(default)]
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(stream_id: Uuid, last_block: Option<BlockPosition>) -> Self {
        Self {
            stream_id,
            last_block,
            last_processed_at: None,
        }
    }

    pub fn level(&self) -> Option<u64> {
        self.last_block.as_ref().map(|b| b.level)
    }
}

/// Block metadata delivered alongside events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub level: u64,
    pub hash: BlockHash,
    pub predecessor: BlockHash,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl BlockSummary {
    pub fn from_block(block: &Block, include_timestamp: bool) -> Self {
        Self {
            level: block.header.level,
            hash: block.hash.clone(),
            predecessor: block.header.predecessor.clone(),
            timestamp: include_timestamp.then_some(block.header.timestamp),
        }
    }
}

/// One delivery unit, consecutive blocks in increasing level order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBatch {
    pub stream_id: Uuid,
    pub blocks: Vec<BlockSummary>,
    pub events: Vec<Event>,
    /// Position the checkpoint moves to once this batch is accepted.
    pub checkpoint: BlockPosition,
    /// Blocks replace previously delivered ones at the same levels.
    pub reorg: bool,
}

/// Subscription request from the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStreamConfig {
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filters: Vec<EventFilter>,
    #[serde(default)]
    pub from_block: FromBlock,
    /// Resume point from a previous run; wins over `from_block`.
    #[serde(default)]
    pub checkpoint: Option<BlockPosition>,
    #[serde(default)]
    pub polling_interval_ms: Option<u64>,
    #[serde(default)]
    pub catchup_page_size: Option<u64>,
    #[serde(default)]
    pub catchup_threshold: Option<u64>,
    #[serde(default)]
    pub block_timestamps: Option<bool>,
}

/// Threshold actually used for a page size, raised to the page size if lower.
pub fn corrected_threshold(page_size: u64, threshold: u64) -> u64 {
    threshold.max(page_size)
}

/// A registered stream with every setting resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStream {
    pub id: Uuid,
    pub name: String,
    pub filters: Vec<EventFilter>,
    pub from_block: FromBlock,
    #[serde(serialize_with = "duration_ms::serialize")]
    pub polling_interval: Duration,
    pub include_block_timestamps: bool,
    pub page_size: u64,
    pub catchup_threshold: u64,
    pub checkpoint_block_gap: u64,
    pub finality_depth: u64,
}

impl EventStream {
    /// Resolve a subscription against connector defaults.
    pub fn from_config(
        config: &EventStreamConfig,
        defaults: &EventsConfig,
    ) -> ConnectorResult<Self> {
        let id = config.id.unwrap_or_else(Uuid::new_v4);
        let page_size = config.catchup_page_size.unwrap_or(defaults.catchup_page_size);
        if page_size == 0 {
            return Err(ConnectorError::InvalidInputs(
                "catchup_page_size must be greater than zero".to_string(),
            ));
        }
        let interval_ms = config
            .polling_interval_ms
            .unwrap_or(defaults.filter_polling_interval_ms);
        if interval_ms == 0 {
            return Err(ConnectorError::InvalidInputs(
                "polling_interval_ms must be greater than zero".to_string(),
            ));
        }

        let requested = config.catchup_threshold.unwrap_or(defaults.catchup_threshold);
        let catchup_threshold = corrected_threshold(page_size, requested);
        if catchup_threshold != requested {
            tracing::warn!(
                stream_id = %id,
                catchup_threshold = requested,
                catchup_page_size = page_size,
                "Catch-up threshold below page size, using page size"
            );
        }

        Ok(Self {
            id,
            name: config.name.clone().unwrap_or_else(|| id.to_string()),
            filters: config.filters.clone(),
            from_block: config.from_block,
            polling_interval: Duration::from_millis(interval_ms),
            include_block_timestamps: config.block_timestamps.unwrap_or(defaults.block_timestamps),
            page_size,
            catchup_threshold,
            checkpoint_block_gap: defaults.checkpoint_block_gap,
            finality_depth: defaults.finality_depth,
        })
    }

    /// First level to deliver when nothing has been delivered yet.
    pub fn start_level(&self, head_level: u64) -> u64 {
        match self.from_block {
            FromBlock::Latest => head_level,
            FromBlock::Earliest => 0,
            FromBlock::Level(level) => level,
        }
    }

    /// Whether a block at `level` can no longer be reorganized away.
    pub fn is_final(&self, level: u64, head_level: u64) -> bool {
        level.saturating_add(self.finality_depth) <= head_level
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
