//! Transaction submission pipeline.
//!
//! Strictly sequential per request. Node errors are surfaced as-is so the
//! host decides whether to resubmit with a fresh counter or retry verbatim.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{ConnectorError, ConnectorResult};
use crate::observability::metrics;
use crate::resilience::cancellable;
use crate::signer::Signer;
use crate::tezos::client::RpcClient;
use crate::tezos::codec::{ManagerFields, Operation};
use crate::tezos::rpc::BlockId;
use crate::tezos::types::Address;
use crate::transactions::{TransactionSendRequest, TransactionSendResponse};

pub const REVEAL_FEE: u64 = 1000;
pub const REVEAL_GAS_LIMIT: u64 = 1000;
pub const REVEAL_STORAGE_LIMIT: u64 = 0;

pub struct TransactionSender {
    rpc: Arc<dyn RpcClient>,
    signer: Arc<dyn Signer>,
}

impl TransactionSender {
    pub fn new(rpc: Arc<dyn RpcClient>, signer: Arc<dyn Signer>) -> Self {
        Self { rpc, signer }
    }

    /// Run the submission pipeline for one request.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        request: &TransactionSendRequest,
    ) -> ConnectorResult<TransactionSendResponse> {
        let request_id = request.headers.get("id").map(String::as_str).unwrap_or("");
        let result = self.run(cancel, request).await;
        match &result {
            Ok(response) => {
                metrics::record_transaction("submitted");
                tracing::info!(
                    request_id = request_id,
                    from = %request.from,
                    op_hash = %response.transaction_hash,
                    "Transaction broadcast"
                );
            }
            Err(e) => {
                metrics::record_transaction(e.reason().as_str());
                tracing::warn!(
                    request_id = request_id,
                    from = %request.from,
                    reason = e.reason().as_str(),
                    error = %e,
                    "Transaction submission failed"
                );
            }
        }
        result
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        request: &TransactionSendRequest,
    ) -> ConnectorResult<TransactionSendResponse> {
        let (from, operation) = decode_request(request)?;

        let branch = cancellable(cancel, self.rpc.get_block_hash(BlockId::Head)).await?;
        let info = cancellable(cancel, self.rpc.get_contract_info(&from)).await?;

        let mut operation = operation
            .with_branch(&branch)
            .with_source(from)
            .map_err(|e| ConnectorError::InvalidInputs(e.to_string()))?;

        if !info.is_revealed() && !operation.has_reveal() {
            tracing::debug!(from = %from, "Account unrevealed, prepending reveal");
            let public_key = cancellable(cancel, self.signer.public_key(&from)).await?;
            operation.prepend_reveal(
                ManagerFields {
                    source: from,
                    fee: REVEAL_FEE,
                    counter: 0,
                    gas_limit: REVEAL_GAS_LIMIT,
                    storage_limit: REVEAL_STORAGE_LIMIT,
                },
                public_key,
            );
        }
        let first = info.counter.checked_add(1).ok_or_else(counter_overflow)?;
        operation
            .assign_counters(first)
            .map_err(|_| counter_overflow())?;

        let signed = self.sign_operation(cancel, &operation).await?;
        let transaction_hash = cancellable(cancel, self.rpc.broadcast(&signed)).await?;
        Ok(TransactionSendResponse { transaction_hash })
    }

    /// Sign an assembled operation, returning the injectable bytes.
    pub async fn sign_operation(
        &self,
        cancel: &CancellationToken,
        operation: &Operation,
    ) -> ConnectorResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(ConnectorError::Cancelled);
        }
        let source = match (operation.contents.is_empty(), operation.source()) {
            (false, Some(source)) => *source,
            _ => {
                return Err(ConnectorError::InvalidState(
                    "operation has no contents to sign".to_string(),
                ))
            }
        };

        let signature =
            cancellable(cancel, self.signer.sign(&source, &operation.watermarked())).await?;
        Ok(operation.sign(&signature).as_bytes().to_vec())
    }
}

/// Step 1: everything that can be checked without the network.
fn decode_request(request: &TransactionSendRequest) -> ConnectorResult<(Address, Operation)> {
    let from: Address = request
        .from
        .parse()
        .map_err(|e| ConnectorError::InvalidInputs(format!("from address: {}", e)))?;
    if !from.is_implicit() {
        return Err(ConnectorError::InvalidInputs(format!(
            "from address {} cannot sign",
            from
        )));
    }

    if let Some(to) = request.to.as_deref().filter(|to| !to.is_empty()) {
        to.parse::<Address>()
            .map_err(|e| ConnectorError::InvalidInputs(format!("to address: {}", e)))?;
    }

    let operation = Operation::decode_hex(&request.transaction_data)
        .map_err(|e| ConnectorError::InvalidInputs(format!("transaction data: {}", e)))?;
    Ok((from, operation))
}

fn counter_overflow() -> ConnectorError {
    ConnectorError::Rpc("counter overflow".to_string())
}
