//! Per-stream block catch-up engine.
//!
//! # Cycle
//! ```text
//! head ← RPC
//!   ├─ head replaced the checkpoint block → walk back, redeliver (reorg)
//!   ├─ nothing new → pause
//!   └─ fetch [next, min(next + page - 1, head)] oldest first
//!        ├─ parent of first block ≠ checkpoint hash → walk back, redeliver
//!        ├─ chain moved under the page → discard, restart
//!        └─ deliver batch → advance checkpoint → record receipts
//! ```
//!
//! Catching-up cycles run back to back. Head-tracking cycles pause for the
//! stream's polling interval. RPC failures are retried with backoff for as
//! long as the stream lives.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cache::{BlockRef, ChainCaches};
use crate::error::{ConnectorError, ConnectorResult};
use crate::events::registry::EventStreamRegistry;
use crate::events::stream::{
    events_in_block, BlockPosition, BlockSummary, EventBatch, EventStream,
};
use crate::events::window::BlockWindow;
use crate::observability::metrics;
use crate::resilience::{cancellable, Retry};
use crate::tezos::client::RpcClient;
use crate::tezos::rpc::{Block, BlockId};
use crate::tezos::types::BlockHash;
use crate::transactions::TransactionReceipt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    CatchingUp,
    HeadTracking,
}

/// Pick the mode for a cycle starting at `next_level`.
///
/// Catching up while more than `threshold` blocks are pending, or more
/// than `gap` (the most head-tracking will walk in one tick).
pub fn select_mode(next_level: u64, head_level: u64, threshold: u64, gap: u64) -> Mode {
    let pending = (head_level + 1).saturating_sub(next_level);
    if pending > threshold || pending > gap {
        Mode::CatchingUp
    } else {
        Mode::HeadTracking
    }
}

/// Last level of the page starting at `next_level`.
pub fn page_end(next_level: u64, head_level: u64, page_size: u64) -> u64 {
    next_level
        .saturating_add(page_size.saturating_sub(1))
        .min(head_level)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered { mode: Mode, blocks: usize },
    Reorged { blocks: usize },
    /// Nothing past the checkpoint yet.
    UpToDate,
    /// The chain changed while a page was being fetched.
    Restart,
}

impl CycleOutcome {
    fn pause(&self) -> bool {
        matches!(
            self,
            CycleOutcome::UpToDate
                | CycleOutcome::Delivered {
                    mode: Mode::HeadTracking,
                    ..
                }
        )
    }
}

/// Drives one event stream. Exactly one poller runs per stream.
pub struct StreamPoller {
    stream: Arc<EventStream>,
    rpc: Arc<dyn RpcClient>,
    caches: Arc<ChainCaches>,
    registry: Arc<EventStreamRegistry>,
    sender: mpsc::Sender<EventBatch>,
    retry: Retry,
    window: BlockWindow,
    /// Checkpoint level handed over by the host, if the stream resumed.
    /// Levels up to it were delivered by an earlier run and are not in
    /// the window.
    resumed_at: Option<u64>,
    cancel: CancellationToken,
    mode: Option<Mode>,
}

impl StreamPoller {
    pub fn new(
        stream: Arc<EventStream>,
        rpc: Arc<dyn RpcClient>,
        caches: Arc<ChainCaches>,
        registry: Arc<EventStreamRegistry>,
        sender: mpsc::Sender<EventBatch>,
        retry: Retry,
        cancel: CancellationToken,
    ) -> Self {
        let resumed_at = registry
            .checkpoint(stream.id)
            .ok()
            .and_then(|checkpoint| checkpoint.level());
        Self {
            resumed_at,
            stream,
            rpc,
            caches,
            registry,
            sender,
            retry,
            window: BlockWindow::new(),
            cancel,
            mode: None,
        }
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    /// Run cycles until cancelled or the stream is removed.
    pub async fn run(mut self) {
        tracing::info!(
            stream_id = %self.stream.id,
            name = %self.stream.name,
            "Event stream listener started"
        );

        while !self.cancel.is_cancelled() {
            let pause = match self.poll_once().await {
                Ok(outcome) => outcome.pause(),
                Err(ConnectorError::Cancelled) | Err(ConnectorError::StreamNotFound(_)) => break,
                Err(e) => {
                    tracing::error!(
                        stream_id = %self.stream.id,
                        error = %e,
                        "Event stream cycle failed"
                    );
                    true
                }
            };

            if pause {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.stream.polling_interval) => {}
                }
            }
        }

        tracing::info!(stream_id = %self.stream.id, "Event stream listener stopped");
    }

    /// One cycle: at most one page delivered.
    pub async fn poll_once(&mut self) -> ConnectorResult<CycleOutcome> {
        let rpc = &self.rpc;
        let head = self
            .retry
            .run(&self.cancel, "get_head", |_| rpc.get_head())
            .await?;
        self.window
            .prune_final(head.level, self.stream.finality_depth);

        let last = self.registry.checkpoint(self.stream.id)?.last_block;
        if let Some(last) = &last {
            if head.level == last.level && head.hash != last.hash {
                return self.handle_reorg(last, head.level).await;
            }
            if head.level <= last.level {
                return Ok(CycleOutcome::UpToDate);
            }
        }

        let next = match &last {
            Some(last) => last.level + 1,
            None => self.stream.start_level(head.level),
        };
        if next > head.level {
            return Ok(CycleOutcome::UpToDate);
        }

        let mode = select_mode(
            next,
            head.level,
            self.stream.catchup_threshold,
            self.stream.checkpoint_block_gap,
        );
        self.set_mode(mode, head.level + 1 - next);

        let end = page_end(next, head.level, self.stream.page_size);
        let mut blocks: Vec<Arc<Block>> = Vec::with_capacity((end - next + 1) as usize);
        for level in next..=end {
            let block = self.fetch_block(level, head.level).await?;
            let expected = match (blocks.last(), &last) {
                (Some(previous), _) => Some((&previous.hash, false)),
                (None, Some(last)) => Some((&last.hash, true)),
                (None, None) => None,
            };

            if let Some((expected, delivered)) = expected {
                if block.predecessor() != expected {
                    if let (true, Some(last)) = (delivered, &last) {
                        return self.handle_reorg(last, head.level).await;
                    }
                    tracing::debug!(
                        stream_id = %self.stream.id,
                        level = level,
                        "Chain moved during page fetch, restarting cycle"
                    );
                    return Ok(CycleOutcome::Restart);
                }
            }
            blocks.push(block);
        }

        let count = blocks.len();
        self.deliver(blocks, false, head.level).await?;
        Ok(CycleOutcome::Delivered {
            mode,
            blocks: count,
        })
    }

    fn set_mode(&mut self, mode: Mode, pending: u64) {
        if self.mode != Some(mode) {
            tracing::info!(
                stream_id = %self.stream.id,
                from = ?self.mode,
                to = ?mode,
                pending_blocks = pending,
                "Event stream mode changed"
            );
            self.mode = Some(mode);
        }
    }

    /// Walk back from the checkpoint to the first level whose canonical
    /// hash differs from what was delivered, then redeliver from there.
    ///
    /// Non-final levels delivered before a resume have no recorded hash;
    /// they are redelivered down to the finality boundary.
    async fn handle_reorg(
        &mut self,
        last: &BlockPosition,
        head_level: u64,
    ) -> ConnectorResult<CycleOutcome> {
        let mut canonical: Vec<(u64, BlockHash)> = Vec::new();
        let mut level = last.level;
        loop {
            let hash = self.block_hash_at(level).await?;
            let recorded = if level == last.level {
                Some(&last.hash)
            } else {
                self.window.hash_at(level)
            };
            match recorded {
                Some(recorded) if *recorded != hash => canonical.push((level, hash)),
                Some(_) => break,
                None if self.delivered_before_resume(level, head_level) => {
                    canonical.push((level, hash))
                }
                None => break,
            }
            if level == 0 {
                break;
            }
            level -= 1;
        }

        if canonical.is_empty() {
            return Ok(CycleOutcome::Restart);
        }
        canonical.reverse();

        let (fork_level, fork_hash) = &canonical[0];
        let recorded = if *fork_level == last.level {
            Some(&last.hash)
        } else {
            self.window.hash_at(*fork_level)
        };
        tracing::warn!(
            stream_id = %self.stream.id,
            level = *fork_level,
            depth = canonical.len(),
            recorded = ?recorded.map(|h| h.to_string()),
            canonical = %fork_hash,
            "Chain reorganization detected"
        );
        metrics::record_reorg(&self.stream.name);

        let mut blocks = Vec::with_capacity(canonical.len());
        for (level, hash) in &canonical {
            blocks.push(self.fetch_block_by_hash(hash, *level, head_level).await?);
        }

        let count = blocks.len();
        self.deliver(blocks, true, head_level).await?;
        Ok(CycleOutcome::Reorged { blocks: count })
    }

    fn delivered_before_resume(&self, level: u64, head_level: u64) -> bool {
        self.resumed_at.is_some_and(|resumed| level <= resumed)
            && !self.stream.is_final(level, head_level)
    }

    async fn block_hash_at(&self, level: u64) -> ConnectorResult<BlockHash> {
        let rpc = &self.rpc;
        self.retry
            .run(&self.cancel, "get_block_hash", |_| {
                rpc.get_block_hash(BlockId::Level(level))
            })
            .await
    }

    /// Final blocks may come from the cache by level. Anything newer is
    /// resolved to its current hash first and looked up by that.
    async fn fetch_block(&self, level: u64, head_level: u64) -> ConnectorResult<Arc<Block>> {
        if !self.stream.is_final(level, head_level) {
            let hash = self.block_hash_at(level).await?;
            return self.fetch_block_by_hash(&hash, level, head_level).await;
        }

        if let Some(block) = self.caches.blocks.get(&BlockRef::Level(level)) {
            return Ok(block);
        }
        let rpc = &self.rpc;
        let block = self
            .retry
            .run(&self.cancel, "get_block", |_| {
                rpc.get_block(BlockId::Level(level))
            })
            .await?;
        let block = Arc::new(block);
        self.caches.insert_block(block.clone(), true);
        Ok(block)
    }

    async fn fetch_block_by_hash(
        &self,
        hash: &BlockHash,
        level: u64,
        head_level: u64,
    ) -> ConnectorResult<Arc<Block>> {
        if let Some(block) = self.caches.blocks.get(&BlockRef::Hash(hash.clone())) {
            return Ok(block);
        }
        let rpc = &self.rpc;
        let block = self
            .retry
            .run(&self.cancel, "get_block", |_| {
                rpc.get_block(BlockId::Hash(hash.clone()))
            })
            .await?;
        let block = Arc::new(block);
        self.caches
            .insert_block(block.clone(), self.stream.is_final(level, head_level));
        Ok(block)
    }

    /// Hand a batch to the host queue, then advance the checkpoint.
    async fn deliver(
        &mut self,
        blocks: Vec<Arc<Block>>,
        reorg: bool,
        head_level: u64,
    ) -> ConnectorResult<()> {
        let Some(last) = blocks.last() else {
            return Ok(());
        };
        let position = BlockPosition {
            level: last.level(),
            hash: last.hash.clone(),
        };

        let with_timestamps = self.stream.include_block_timestamps;
        let batch = EventBatch {
            stream_id: self.stream.id,
            blocks: blocks
                .iter()
                .map(|b| BlockSummary::from_block(b, with_timestamps))
                .collect(),
            events: blocks
                .iter()
                .flat_map(|b| events_in_block(b, &self.stream.filters, with_timestamps))
                .collect(),
            checkpoint: position.clone(),
            reorg,
        };
        let event_count = batch.events.len();

        let sender = &self.sender;
        cancellable(&self.cancel, async {
            sender
                .send(batch)
                .await
                .map_err(|_| ConnectorError::Cancelled)
        })
        .await?;

        self.registry.advance_checkpoint(self.stream.id, position)?;

        for block in &blocks {
            self.window.record(block.level(), block.hash.clone());
            for operation in block.all_operations() {
                self.caches.transactions.put(
                    operation.hash.clone(),
                    TransactionReceipt {
                        op_hash: operation.hash.clone(),
                        block_level: block.level(),
                        block_hash: block.hash.clone(),
                        applied: operation.applied(),
                    },
                );
            }
        }
        self.window
            .prune_final(head_level, self.stream.finality_depth);

        metrics::record_blocks_delivered(&self.stream.name, blocks.len());
        tracing::debug!(
            stream_id = %self.stream.id,
            from_level = blocks[0].level(),
            to_level = last.level(),
            events = event_count,
            reorg = reorg,
            "Batch delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mode() {
        // 1000 pending, threshold 500: catch up.
        assert_eq!(select_mode(1, 1000, 500, 50), Mode::CatchingUp);
        // Within threshold but beyond the head-tracking gap.
        assert_eq!(select_mode(900, 1000, 500, 50), Mode::CatchingUp);
        // Close to head.
        assert_eq!(select_mode(990, 1000, 500, 50), Mode::HeadTracking);
        assert_eq!(select_mode(1000, 1000, 500, 50), Mode::HeadTracking);
    }

    #[test]
    fn test_page_end() {
        assert_eq!(page_end(1, 1000, 500), 500);
        assert_eq!(page_end(501, 1000, 500), 1000);
        assert_eq!(page_end(990, 1000, 500), 1000);
        assert_eq!(page_end(7, 7, 1), 7);
    }

    #[test]
    fn test_pause_only_when_tracking_or_idle() {
        assert!(CycleOutcome::UpToDate.pause());
        assert!(CycleOutcome::Delivered {
            mode: Mode::HeadTracking,
            blocks: 1
        }
        .pause());
        assert!(!CycleOutcome::Delivered {
            mode: Mode::CatchingUp,
            blocks: 500
        }
        .pause());
        assert!(!CycleOutcome::Restart.pause());
        assert!(!CycleOutcome::Reorged { blocks: 1 }.pause());
    }
}
