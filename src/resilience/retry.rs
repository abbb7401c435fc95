//! Retry executor with exponential backoff and cooperative cancellation.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::resilience::backoff::calculate_backoff;

/// Reusable retry policy. Holds no per-call state.
#[derive(Debug, Clone)]
pub struct Retry {
    pub initial_delay: Duration,
    pub maximum_delay: Duration,
    pub factor: f64,
}

impl From<&RetryConfig> for Retry {
    fn from(config: &RetryConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            maximum_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
        }
    }
}

impl Retry {
    /// Delay applied after failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.initial_delay, self.maximum_delay, self.factor)
    }

    /// Retry `op` on retryable connector errors until it succeeds or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        op: F,
    ) -> ConnectorResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
    {
        self.run_with(cancel, operation, ConnectorError::is_retryable, op)
            .await
    }

    /// Like [`Retry::run`] with a caller-supplied classifier.
    ///
    /// Cancellation is checked before every invocation and raced against
    /// every delay; an invocation already in flight is left to finish.
    pub async fn run_with<T, F, Fut, C>(
        &self,
        cancel: &CancellationToken,
        operation: &str,
        is_retryable: C,
        mut op: F,
    ) -> ConnectorResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ConnectorResult<T>>,
        C: Fn(&ConnectorError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(ConnectorError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(ConnectorError::Cancelled) => return Err(ConnectorError::Cancelled),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => e,
            };

            let delay = self.delay_for(attempt);
            tracing::warn!(
                operation = operation,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after failure"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt = attempt.saturating_add(1);
        }
    }
}

/// Race a single call against cancellation, without retrying.
pub async fn cancellable<T, Fut>(cancel: &CancellationToken, fut: Fut) -> ConnectorResult<T>
where
    Fut: Future<Output = ConnectorResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
        result = fut => result,
    }
}
