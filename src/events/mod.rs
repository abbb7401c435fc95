//! Event streams.
//!
//! # Data Flow
//! ```text
//! subscribe(EventStreamConfig)
//!     → stream.rs (resolve settings, threshold correction)
//!     → registry.rs (stream + checkpoint + delivery queue)
//!     → listener.rs (one task per stream, own cancellation token)
//!         → block cache / RPC
//!         → window.rs (delivered non-final hashes, reorg walk-back)
//!         → EventBatch queue → poll_events
//! ```
//!
//! # Design Decisions
//! - Blocks are delivered in strictly increasing level order per stream
//! - A checkpoint advances only after its batch is accepted by the queue
//! - Delivery is at-least-once across restarts

pub mod listener;
pub mod registry;
pub mod stream;
pub mod window;

pub use listener::{Mode, StreamPoller};
pub use registry::{EventStreamRegistry, StreamInfo};
pub use stream::{
    BlockPosition, BlockSummary, Checkpoint, Event, EventBatch, EventFilter, EventKind,
    EventStream, EventStreamConfig, FromBlock,
};
