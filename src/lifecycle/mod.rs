//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     root CancellationToken → child per stream task and per request
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger → server drains, streams stop
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accepting, cancel streams, exit
//! - Cancelling a child never cancels the root

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
