//! Retry-once policy for upstream calls.

use backon::{ConstantBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Errors that know whether another attempt could succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Constant-delay retry for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before each retry
    #[serde(with = "crate::config::duration_str")]
    pub delay: Duration,

    /// Retries after the first attempt
    pub max_retries: usize,
}

impl RetryPolicy {
    /// One retry after `delay`.
    pub fn once(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: 1,
        }
    }

    /// No retries.
    pub fn none() -> Self {
        Self {
            delay: Duration::ZERO,
            max_retries: 0,
        }
    }

    /// Run `op`, retrying transient errors per this policy.
    ///
    /// `stage` names the pipeline stage in logs.
    pub async fn run<T, E, F, Fut>(&self, stage: &'static str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        if self.max_retries == 0 {
            let mut op = op;
            return op().await;
        }

        let backoff = ConstantBuilder::default()
            .with_delay(self.delay)
            .with_max_times(self.max_retries);

        op.retry(backoff)
            .when(|e: &E| e.is_transient())
            .notify(|e: &E, after: Duration| {
                tracing::warn!(stage, error = %e, retry_in = ?after, "Transient failure, retrying");
            })
            .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once(Duration::from_millis(500))
    }
}
