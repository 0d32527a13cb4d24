//! Exponential backoff with jitter around a fallible async operation.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::warn;

use crate::error::UpstreamError;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn status(&self) -> Option<u16>;

    /// Network-level failures (no status) and 429/503/504 are retryable.
    fn is_retryable(&self) -> bool {
        matches!(self.status(), None | Some(429) | Some(503) | Some(504))
    }
}

impl Retryable for UpstreamError {
    fn status(&self) -> Option<u16> {
        UpstreamError::status(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            base,
            max_jitter: Duration::from_millis(100),
        }
    }

    /// Delay before retry `attempt` (0-based): `base * 2^attempt` plus
    /// uniform jitter in `[0, max_jitter)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..jitter_ms)
        };
        self.base.saturating_mul(factor) + Duration::from_millis(jitter)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    pub result: T,
    pub attempts: u32,
    pub duration: Duration,
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries have been spent. The operation receives the 0-based
/// attempt number.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<Retried<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        match operation(attempt).await {
            Ok(result) => {
                return Ok(Retried {
                    result,
                    attempts: attempt + 1,
                    duration: start.elapsed(),
                })
            }
            Err(err) => {
                if attempt >= policy.max_retries || !err.is_retryable() {
                    return Err(err);
                }
                let delay = policy.backoff(attempt);
                warn!(
                    "attempt {} failed: {}; retrying in {} ms",
                    attempt + 1,
                    err,
                    delay.as_millis()
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn http(status: u16) -> UpstreamError {
        UpstreamError::Http {
            endpoint: "https://a".into(),
            status,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_one_503() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(500));
        let out = with_retry(&policy, |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(http(503))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(out.attempts, 2);
        assert_eq!(out.result, 1);
        assert!(out.duration >= Duration::from_millis(500));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let err = with_retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(http(400)) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, http(400));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_with_last_error_after_max_retries() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let err = with_retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<(), _>(UpstreamError::Network {
                    endpoint: format!("attempt-{attempt}"),
                    message: "reset".into(),
                })
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, UpstreamError::Network { endpoint, .. } if endpoint == "attempt-2"));
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        for attempt in 0..3 {
            let expected = 500 * 2u128.pow(attempt);
            let delay = policy.backoff(attempt).as_millis();
            assert!(delay >= expected && delay < expected + 100, "{attempt}: {delay}");
        }

        let exact = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..policy
        };
        assert_eq!(exact.backoff(2), Duration::from_millis(2000));
    }

    #[test]
    fn retryable_statuses() {
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(http(504).is_retryable());
        assert!(!http(500).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(UpstreamError::Timeout {
            endpoint: "e".into(),
            timeout_ms: 1
        }
        .is_retryable());
    }
}
