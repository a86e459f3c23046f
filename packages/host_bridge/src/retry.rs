//! Bounded exponential backoff for idempotent calls.
//!
//! Covers the startup race where a client has connected but has not finished
//! loading its own index yet. Not a delivery guarantee.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::BridgeError;

/// Upper bound on a single backoff sleep.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, the first attempt included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_multiplier,
        }
    }

    /// A single attempt, no retries.
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO, 1.0)
    }

    /// Wait after failed attempt `attempt` (1-based), capped at [`MAX_RETRY_DELAY`].
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let secs = self.initial_delay.as_secs_f64() * multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// policy's attempts are used up.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BridgeError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    op = %label,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    #[test]
    fn delays_grow_geometrically() {
        let policy = RetryPolicy::new(4, Duration::from_millis(100), 2.0);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn delays_are_capped_for_extreme_settings() {
        let long = RetryPolicy::new(100, Duration::from_millis(500), 2.0);
        assert_eq!(long.delay_after(99), MAX_RETRY_DELAY);
        assert_eq!(long.delay_after(u32::MAX), MAX_RETRY_DELAY);

        let steep = RetryPolicy::new(5, Duration::from_millis(500), 1e30);
        assert_eq!(steep.delay_after(1), Duration::from_millis(500));
        assert_eq!(steep.delay_after(2), MAX_RETRY_DELAY);

        let broken = RetryPolicy::new(5, Duration::from_millis(500), f64::NAN);
        assert_eq!(broken.delay_after(3), Duration::from_millis(500));
    }

    #[test]
    fn default_policy_is_bounded() {
        let policy = RetryPolicy::default();
        let total: Duration = (1..policy.max_attempts).map(|a| policy.delay_after(a)).sum();
        assert!(total < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn succeeds_after_two_transient_failures() {
        let policy = RetryPolicy::new(5, Duration::from_millis(40), 2.0);
        let calls = Arc::new(AtomicU32::new(0));
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = with_retry(&policy, "search", || {
            let calls = calls.clone();
            let stamps = stamps.clone();
            async move {
                stamps.lock().unwrap().push(Instant::now());
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(BridgeError::NoClientConnected),
                    1 => Err(BridgeError::TimedOut(Duration::from_millis(10))),
                    _ => Ok("found"),
                }
            }
        })
        .await;

        assert_eq!(result, Ok("found"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stamps = stamps.lock().unwrap();
        let first_gap = stamps[1] - stamps[0];
        let second_gap = stamps[2] - stamps[1];
        assert!(first_gap >= Duration::from_millis(40));
        assert!(first_gap < Duration::from_millis(40 + 150));
        assert!(second_gap >= Duration::from_millis(80));
        assert!(second_gap < Duration::from_millis(80 + 150));
    }

    #[tokio::test]
    async fn application_errors_are_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "get_entity", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::Application("not found: x".into())) }
        })
        .await;

        assert_eq!(result, Err(BridgeError::Application("not found: x".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_type_is_not_retried() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10), 2.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "frobnicate", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::UnknownType("frobnicate".into())) }
        })
        .await;

        assert!(matches!(result, Err(BridgeError::UnknownType(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5), 1.0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "list_entities", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::ConnectionLost) }
        })
        .await;

        assert_eq!(result, Err(BridgeError::ConnectionLost));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_retry_policy_runs_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::none(), "delete_entity", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BridgeError::NoClientConnected) }
        })
        .await;
        assert_eq!(result, Err(BridgeError::NoClientConnected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
