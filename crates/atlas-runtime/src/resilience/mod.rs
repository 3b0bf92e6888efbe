//! Resilience patterns for atlas-runtime.
//!
//! Upstream calls get at most one retry, and only for transient failures.
//! There is no circuit breaker or fallback model: a stage that still fails
//! ends the run in a degraded response.

mod retry;

pub use retry::{RetryPolicy, Transient};
