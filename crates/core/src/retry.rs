use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};

/// Backoff parameters for [`with_retry`]. The delay doubles after every
/// failed attempt and is capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// No retries at all; the operation runs exactly once.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        doubled.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, performing at most `max_retries + 1`
/// invocations. After each failure the delay doubles (capped at
/// `max_delay`). `should_retry` is consulted before every retry; when it
/// rejects the error, the error is returned immediately.
pub async fn with_retry<T, F, Fut, P>(policy: &RetryPolicy, should_retry: P, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_retries || !should_retry(&e) {
                    return Err(e);
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    error = %e,
                    code = e.code(),
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn test_first_success_single_invocation() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), |e| e.recoverable(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_retries_then_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(3), |e| e.recoverable(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::Network {
                    status: 503,
                    detail: "unavailable".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        // max_retries = 3 means at most 4 invocations
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_predicate_rejection_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry(&fast_policy(5), |e| e.recoverable(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Auth("bad credentials".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(3), |e| e.recoverable(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Timeout("slow".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(10), Duration::from_millis(350));
    }
}
