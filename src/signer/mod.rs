//! Detached signing.
//!
//! The pipeline only sees the [`Signer`] trait, so the HTTP transport in
//! `remote.rs` can be swapped for a local key-management integration.

pub mod remote;

use async_trait::async_trait;

use crate::error::ConnectorResult;
use crate::tezos::types::{Address, PublicKey, Signature};

pub use remote::RemoteSigner;

#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign watermarked operation bytes on behalf of `source`.
    async fn sign(&self, source: &Address, payload: &[u8]) -> ConnectorResult<Signature>;

    /// Public key of `source`, needed to reveal it.
    async fn public_key(&self, source: &Address) -> ConnectorResult<PublicKey>;
}
