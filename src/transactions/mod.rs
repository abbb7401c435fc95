//! Transaction submission.
//!
//! # Data Flow
//! ```text
//! TransactionSendRequest
//!     → send.rs: validate & decode → head hash → account state
//!                → assemble → remote sign → broadcast
//!     → TransactionSendResponse (operation hash)
//!
//! Block listener (later, on inclusion):
//!     → TransactionReceipt into the transaction cache
//! ```

pub mod send;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tezos::types::{BlockHash, OpHash};

pub use send::TransactionSender;

/// One submission from the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionSendRequest {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    /// Hex-encoded forged operation.
    #[serde(default)]
    pub transaction_data: String,
    /// Opaque host headers; `id` is used as the log correlation id.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSendResponse {
    pub transaction_hash: OpHash,
}

/// Inclusion record for an operation seen in a delivered block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub op_hash: OpHash,
    pub block_level: u64,
    pub block_hash: BlockHash,
    pub applied: bool,
}
