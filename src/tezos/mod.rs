//! Tezos chain access.
//!
//! # Data Flow
//! ```text
//! host operation hex
//!     → codec.rs (decode, assemble, forge, watermark)
//!     → types.rs (base58check addresses, hashes, keys, signatures)
//!
//! client.rs (RpcClient over HTTP, failover + timeouts)
//!     → rpc.rs (block, header and contract shapes)
//! ```

pub mod client;
pub mod codec;
pub mod rpc;
pub mod types;

pub use client::{RpcClient, TezosRpcClient};
pub use codec::{CodecError, Operation};
pub use rpc::{Block, BlockHeader, BlockId, ContractInfo};
pub use types::{Address, BlockHash, OpHash, PublicKey, Signature};
