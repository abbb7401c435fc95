//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Catch-up engine RPC call:
//!     → retry.rs (classify error, delay, try again until success or cancel)
//!     → backoff.rs (min(initial * factor^attempt, max))
//!
//! Submission pipeline RPC/signer call:
//!     → retry.rs::cancellable (race against cancellation, no retry)
//! ```
//!
//! # Design Decisions
//! - Retry state lives on the stack of one invocation, never shared
//! - Non-retryable errors propagate unchanged
//! - Cancellation wins over the last transient error

pub mod backoff;
pub mod retry;

pub use backoff::calculate_backoff;
pub use retry::{cancellable, Retry};
