//! Result shapes returned by the node RPC.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::tezos::types::{BlockHash, OpHash, PublicKey};

/// Block selector accepted by the block endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockId {
    Head,
    Level(u64),
    Hash(BlockHash),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Head => f.write_str("head"),
            BlockId::Level(level) => write!(f, "{}", level),
            BlockId::Hash(hash) => write!(f, "{}", hash),
        }
    }
}

/// `/chains/main/blocks/{id}/header`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: BlockHash,
    pub level: u64,
    pub predecessor: BlockHash,
    pub timestamp: DateTime<Utc>,
}

/// The shell part of a full block's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellHeader {
    pub level: u64,
    pub predecessor: BlockHash,
    pub timestamp: DateTime<Utc>,
}

/// `/chains/main/blocks/{id}`, reduced to the fields the connector reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub header: ShellHeader,
    /// Validation passes; manager operations live in the last one.
    #[serde(default)]
    pub operations: Vec<Vec<BlockOperation>>,
}

impl Block {
    pub fn level(&self) -> u64 {
        self.header.level
    }

    pub fn predecessor(&self) -> &BlockHash {
        &self.header.predecessor
    }

    pub fn to_header(&self) -> BlockHeader {
        BlockHeader {
            hash: self.hash.clone(),
            level: self.header.level,
            predecessor: self.header.predecessor.clone(),
            timestamp: self.header.timestamp,
        }
    }

    /// Every operation in the block, in pass order.
    pub fn all_operations(&self) -> impl Iterator<Item = &BlockOperation> {
        self.operations.iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOperation {
    pub hash: OpHash,
    #[serde(default)]
    pub contents: Vec<OperationContent>,
}

impl BlockOperation {
    /// True unless some content carries a non-applied result.
    pub fn applied(&self) -> bool {
        self.contents.iter().all(|content| {
            content
                .result_status()
                .map_or(true, |status| status == "applied")
        })
    }
}

/// One content of an operation in a block.
///
/// Addresses stay raw strings: blocks carry address families (rollups,
/// BLS accounts) this crate never submits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationContent {
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub parameters: Option<OperationParameters>,
    /// `None` when absent or elided by the node (`"too large"`); the
    /// content's status is then unknown.
    #[serde(default, deserialize_with = "metadata_or_elided")]
    pub metadata: Option<OperationMetadata>,
}

fn metadata_or_elided<'de, D>(deserializer: D) -> Result<Option<OperationMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        value @ serde_json::Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

impl OperationContent {
    pub fn result_status(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.operation_result.as_ref())
            .map(|r| r.status.as_str())
    }

    pub fn internal_results(&self) -> &[InternalOperationResult] {
        self.metadata
            .as_ref()
            .map(|m| m.internal_operation_results.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationParameters {
    pub entrypoint: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    #[serde(default)]
    pub operation_result: Option<OperationResult>,
    #[serde(default)]
    pub internal_operation_results: Vec<InternalOperationResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: String,
}

/// Internal operations, including contract events (`kind: "event"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalOperationResult {
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub parameters: Option<OperationParameters>,
    #[serde(default)]
    pub result: Option<OperationResult>,
}

impl InternalOperationResult {
    pub fn applied(&self) -> bool {
        self.result
            .as_ref()
            .map_or(true, |r| r.status == "applied")
    }
}

/// Account state needed to assemble an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractInfo {
    pub counter: u64,
    pub manager_key: Option<PublicKey>,
}

impl ContractInfo {
    pub fn is_revealed(&self) -> bool {
        self.manager_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: &str = r#"{
        "protocol": "PsParisCZo7KAh1Z1smVd9ZMZ1HHn5gkzbM94V3PLCpknFWhUAi",
        "chain_id": "NetXdQprcVkpaWU",
        "hash": "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg",
        "header": {
            "level": 5000000,
            "proto": 19,
            "predecessor": "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg",
            "timestamp": "2024-05-01T12:00:00Z"
        },
        "operations": [
            [],
            [],
            [],
            [{
                "hash": "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v",
                "branch": "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg",
                "contents": [{
                    "kind": "transaction",
                    "source": "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN",
                    "fee": "1000",
                    "counter": "11",
                    "amount": "0",
                    "destination": "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s",
                    "parameters": {"entrypoint": "pause", "value": {"prim": "True"}},
                    "metadata": {
                        "operation_result": {"status": "applied"},
                        "internal_operation_results": [{
                            "kind": "event",
                            "source": "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s",
                            "nonce": 0,
                            "tag": "paused",
                            "payload": {"prim": "Unit"},
                            "result": {"status": "applied"}
                        }]
                    }
                }],
                "signature": "sigWetzF5zVM2qdYt8QToj7e5cNBm9neiPRc3rpePBDrr8N1brFbErv2YfXMSoSgemJ8AwZcLfmkBDg78bmUEzF1sf1YotnS"
            }]
        ]
    }"#;

    #[test]
    fn test_block_id_display() {
        assert_eq!(BlockId::Head.to_string(), "head");
        assert_eq!(BlockId::Level(42).to_string(), "42");
        let hash: BlockHash = "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg"
            .parse()
            .unwrap();
        assert_eq!(
            BlockId::Hash(hash).to_string(),
            "BMBeYrMJpLWrqCs7UTcFaUQCeWBqsjCLejX5D8zE8m9syHqHnZg"
        );
    }

    #[test]
    fn test_parse_block() {
        let block: Block = serde_json::from_str(BLOCK).unwrap();
        assert_eq!(block.level(), 5_000_000);
        assert_eq!(block.to_header().timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");

        let ops: Vec<_> = block.all_operations().collect();
        assert_eq!(ops.len(), 1);
        assert!(ops[0].applied());

        let content = &ops[0].contents[0];
        assert_eq!(content.parameters.as_ref().unwrap().entrypoint, "pause");
        let events = content.internal_results();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag.as_deref(), Some("paused"));
    }

    #[test]
    fn test_failed_operation_not_applied() {
        let op: BlockOperation = serde_json::from_str(
            r#"{
                "hash": "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v",
                "contents": [
                    {"kind": "reveal", "metadata": {"operation_result": {"status": "applied"}}},
                    {"kind": "transaction", "metadata": {"operation_result": {"status": "backtracked"}}}
                ]
            }"#,
        )
        .unwrap();
        assert!(!op.applied());
    }

    #[test]
    fn test_elided_metadata_status_unknown() {
        let op: BlockOperation = serde_json::from_str(
            r#"{
                "hash": "oovD5cUigLGLT6kGDqsLMyF2sc3MLyfYhJWRymCPxUKEx3vtQ5v",
                "contents": [{
                    "kind": "transaction",
                    "destination": "KT1D254HTPKq5GZNVcF73XBinG9BLybHqu8s",
                    "metadata": "too large"
                }]
            }"#,
        )
        .unwrap();
        let content = &op.contents[0];
        assert_eq!(content.metadata, None);
        assert_eq!(content.result_status(), None);
        assert!(content.internal_results().is_empty());
        assert!(op.applied());
    }
}
