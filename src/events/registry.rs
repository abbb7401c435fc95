//! Event stream registry.
//!
//! One synchronized map per connector instance. The lock is held for map
//! operations only and never across an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ConnectorError, ConnectorResult};
use crate::events::stream::{BlockPosition, Checkpoint, EventBatch, EventStream};
use crate::observability::metrics;

pub type BatchReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<EventBatch>>>;

struct StreamEntry {
    stream: Arc<EventStream>,
    checkpoint: Checkpoint,
    cancel: CancellationToken,
    receiver: BatchReceiver,
    task: Option<JoinHandle<()>>,
}

/// A stream together with its current checkpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StreamInfo {
    pub stream: EventStream,
    pub checkpoint: Checkpoint,
}

/// Everything needed to stop a removed stream.
pub struct RemovedStream {
    pub checkpoint: Checkpoint,
    pub cancel: CancellationToken,
    pub task: Option<JoinHandle<()>>,
}

#[derive(Default)]
pub struct EventStreamRegistry {
    streams: Mutex<HashMap<Uuid, StreamEntry>>,
}

impl EventStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, StreamEntry>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(
        &self,
        stream: Arc<EventStream>,
        checkpoint: Checkpoint,
        cancel: CancellationToken,
        receiver: mpsc::Receiver<EventBatch>,
    ) -> ConnectorResult<()> {
        let mut streams = self.lock();
        if streams.contains_key(&stream.id) {
            return Err(ConnectorError::StreamExists(stream.id));
        }
        streams.insert(
            stream.id,
            StreamEntry {
                stream,
                checkpoint,
                cancel,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                task: None,
            },
        );
        Ok(())
    }

    /// Attach the background task driving a stream.
    pub fn set_task(&self, id: Uuid, task: JoinHandle<()>) -> ConnectorResult<()> {
        let mut streams = self.lock();
        let entry = streams.get_mut(&id).ok_or(ConnectorError::StreamNotFound(id))?;
        entry.task = Some(task);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> ConnectorResult<Arc<EventStream>> {
        self.lock()
            .get(&id)
            .map(|entry| entry.stream.clone())
            .ok_or(ConnectorError::StreamNotFound(id))
    }

    pub fn checkpoint(&self, id: Uuid) -> ConnectorResult<Checkpoint> {
        self.lock()
            .get(&id)
            .map(|entry| entry.checkpoint.clone())
            .ok_or(ConnectorError::StreamNotFound(id))
    }

    /// Move a checkpoint forward. The level may stay the same (a reorg
    /// replaced the block there) but never goes back.
    pub fn advance_checkpoint(
        &self,
        id: Uuid,
        position: BlockPosition,
    ) -> ConnectorResult<Checkpoint> {
        let mut streams = self.lock();
        let entry = streams.get_mut(&id).ok_or(ConnectorError::StreamNotFound(id))?;

        if let Some(current) = entry.checkpoint.level() {
            if position.level < current {
                return Err(ConnectorError::InvalidState(format!(
                    "checkpoint for stream {} cannot move back from {} to {}",
                    id, current, position.level
                )));
            }
        }

        metrics::record_checkpoint(&entry.stream.name, position.level);
        entry.checkpoint.last_block = Some(position);
        entry.checkpoint.last_processed_at = Some(Utc::now());
        Ok(entry.checkpoint.clone())
    }

    pub fn receiver(&self, id: Uuid) -> ConnectorResult<BatchReceiver> {
        self.lock()
            .get(&id)
            .map(|entry| entry.receiver.clone())
            .ok_or(ConnectorError::StreamNotFound(id))
    }

    pub fn remove(&self, id: Uuid) -> ConnectorResult<RemovedStream> {
        let entry = self
            .lock()
            .remove(&id)
            .ok_or(ConnectorError::StreamNotFound(id))?;
        Ok(RemovedStream {
            checkpoint: entry.checkpoint,
            cancel: entry.cancel,
            task: entry.task,
        })
    }

    /// Remove every stream, for shutdown.
    pub fn drain(&self) -> Vec<RemovedStream> {
        self.lock()
            .drain()
            .map(|(_, entry)| RemovedStream {
                checkpoint: entry.checkpoint,
                cancel: entry.cancel,
                task: entry.task,
            })
            .collect()
    }

    /// All streams, ordered by name.
    pub fn list(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<StreamInfo> = self
            .lock()
            .values()
            .map(|entry| StreamInfo {
                stream: entry.stream.as_ref().clone(),
                checkpoint: entry.checkpoint.clone(),
            })
            .collect();
        streams.sort_by(|a, b| a.stream.name.cmp(&b.stream.name));
        streams
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
