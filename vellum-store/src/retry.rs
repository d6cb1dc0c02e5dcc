//! Retry wrapper for channel calls.
//!
//! A pure higher-order wrapper over any async operation, parameterized by
//! [`RetryConfig`], so the policy stays uniform across call sites and
//! independently testable.

use std::future::Future;

use tokio::time::sleep;
use tracing::{debug, warn};
use vellum_core::{RetryConfig, VellumResult};

/// Execute `op` with bounded linear backoff.
///
/// `op` is a factory producing one attempt per call. A failure whose kind is
/// in the config's non-retryable set returns immediately; transient failures
/// wait `base_delay * attempt_number` and retry, up to `max_attempts` total
/// attempts, then surface the last error. No partial state is mutated on
/// failure.
pub async fn with_retry<T, F, Fut>(label: &str, config: &RetryConfig, mut op: F) -> VellumResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = VellumResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let kind = err.kind();
                if !config.should_retry(kind) {
                    debug!(label, ?kind, "permanent failure, not retrying");
                    return Err(err);
                }
                if attempt >= max_attempts {
                    warn!(label, ?kind, attempts = attempt, "retry budget exhausted");
                    return Err(err);
                }
                let delay = config.base_delay * attempt;
                debug!(label, ?kind, attempt, ?delay, "transient failure, backing off");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
