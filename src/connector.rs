//! Connector composition root.
//!
//! Owns the caches, the stream registry and the submission pipeline, and
//! exposes the operations the transaction-manager host calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::cache::ChainCaches;
use crate::config::{ConnectorConfig, EventsConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::events::registry::{EventStreamRegistry, StreamInfo};
use crate::events::stream::{
    corrected_threshold, Checkpoint, EventBatch, EventStream, EventStreamConfig,
};
use crate::events::StreamPoller;
use crate::lifecycle::Shutdown;
use crate::resilience::Retry;
use crate::signer::{RemoteSigner, Signer};
use crate::tezos::client::{RpcClient, TezosRpcClient};
use crate::tezos::types::OpHash;
use crate::transactions::{
    TransactionReceipt, TransactionSendRequest, TransactionSendResponse, TransactionSender,
};

pub struct TezosConnector {
    config: ConnectorConfig,
    rpc: Arc<dyn RpcClient>,
    caches: Arc<ChainCaches>,
    registry: Arc<EventStreamRegistry>,
    sender: TransactionSender,
    retry: Retry,
    shutdown: Shutdown,
}

impl TezosConnector {
    /// Build a connector talking to the configured node and signatory.
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let rpc = Arc::new(TezosRpcClient::new(&config.connector)?);
        let signer = Arc::new(RemoteSigner::new(&config.connector)?);
        Self::with_clients(config, rpc, signer)
    }

    pub fn with_clients(
        mut config: ConnectorConfig,
        rpc: Arc<dyn RpcClient>,
        signer: Arc<dyn Signer>,
    ) -> ConnectorResult<Self> {
        let events = &mut config.events;
        let threshold = corrected_threshold(events.catchup_page_size, events.catchup_threshold);
        if threshold != events.catchup_threshold {
            tracing::warn!(
                catchup_threshold = events.catchup_threshold,
                catchup_page_size = events.catchup_page_size,
                "Catch-up threshold below page size, using page size"
            );
            events.catchup_threshold = threshold;
        }

        let caches = Arc::new(ChainCaches::new(&config.cache)?);
        let retry = Retry::from(&config.retry);

        tracing::info!(
            network = %config.connector.network,
            block_cache_size = config.cache.block_cache_size,
            tx_cache_size = config.cache.tx_cache_size,
            "Connector initialized"
        );

        Ok(Self {
            sender: TransactionSender::new(rpc.clone(), signer),
            config,
            rpc,
            caches,
            registry: Arc::new(EventStreamRegistry::new()),
            retry,
            shutdown: Shutdown::new(),
        })
    }

    /// Effective event settings, after threshold correction.
    pub fn events_config(&self) -> &EventsConfig {
        &self.config.events
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn caches(&self) -> &ChainCaches {
        &self.caches
    }

    pub async fn send_transaction(
        &self,
        request: &TransactionSendRequest,
    ) -> ConnectorResult<TransactionSendResponse> {
        let cancel = self.shutdown.child();
        self.sender.send(&cancel, request).await
    }

    /// Register a stream and start its listener. Must run inside a Tokio runtime.
    pub fn subscribe(&self, config: EventStreamConfig) -> ConnectorResult<EventStream> {
        if self.shutdown.is_triggered() {
            return Err(ConnectorError::Cancelled);
        }
        let stream = Arc::new(EventStream::from_config(&config, &self.config.events)?);
        let checkpoint = Checkpoint::new(stream.id, config.checkpoint.clone());
        let cancel = self.shutdown.child();
        let (tx, rx) = mpsc::channel(self.config.events.batch_buffer.max(1));

        self.registry
            .insert(stream.clone(), checkpoint, cancel.clone(), rx)?;

        let poller = StreamPoller::new(
            stream.clone(),
            self.rpc.clone(),
            self.caches.clone(),
            self.registry.clone(),
            tx,
            self.retry.clone(),
            cancel,
        );
        let task = tokio::spawn(poller.run());
        self.registry.set_task(stream.id, task)?;

        tracing::info!(
            stream_id = %stream.id,
            name = %stream.name,
            filters = stream.filters.len(),
            from_block = ?stream.from_block,
            resumed_from = ?config.checkpoint.as_ref().map(|c| c.level),
            "Event stream subscribed"
        );
        Ok(stream.as_ref().clone())
    }

    /// Stop a stream and return its final checkpoint.
    pub async fn unsubscribe(&self, id: Uuid) -> ConnectorResult<Checkpoint> {
        let removed = self.registry.remove(id)?;
        removed.cancel.cancel();
        if let Some(task) = removed.task {
            if let Err(e) = task.await {
                tracing::warn!(stream_id = %id, error = %e, "Event stream task ended abnormally");
            }
        }
        tracing::info!(
            stream_id = %id,
            checkpoint = ?removed.checkpoint.level(),
            "Event stream unsubscribed"
        );
        Ok(removed.checkpoint)
    }

    /// Take the next batch for a stream, waiting up to `wait` for one.
    pub async fn poll_events(
        &self,
        id: Uuid,
        wait: Duration,
    ) -> ConnectorResult<Option<EventBatch>> {
        let receiver = self.registry.receiver(id)?;
        let mut receiver = receiver.lock().await;
        tokio::select! {
            _ = self.shutdown.wait() => Err(ConnectorError::Cancelled),
            batch = tokio::time::timeout(wait, receiver.recv()) => Ok(batch.ok().flatten()),
        }
    }

    pub fn checkpoint(&self, id: Uuid) -> ConnectorResult<Checkpoint> {
        self.registry.checkpoint(id)
    }

    pub fn list_streams(&self) -> Vec<StreamInfo> {
        self.registry.list()
    }

    /// Inclusion receipt for an operation the listener has seen.
    pub fn transaction_receipt(&self, hash: &OpHash) -> Option<TransactionReceipt> {
        self.caches.transactions.get(hash)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Cancel every stream and wait for the listeners to stop.
    pub async fn shutdown(&self) {
        self.shutdown.trigger();
        let removed = self.registry.drain();
        let count = removed.len();
        for stream in removed {
            stream.cancel.cancel();
            if let Some(task) = stream.task {
                let _ = task.await;
            }
        }
        tracing::info!(streams = count, "Connector stopped");
    }
}
