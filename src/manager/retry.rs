//! Redelivery policy for notifications.
//!
//! The attempt count and backoff come from [`Settings`]; the defaults make a
//! single attempt.

use crate::config::Settings;

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How often, and how patiently, a notification is redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryConfig {
    attempts: u32,
    backoff: Duration,
    max_backoff: Duration,
}

impl RetryConfig {
    /// Policy configured by `PUBLISH_ATTEMPTS`, `PUBLISH_BACKOFF_MS` and
    /// `PUBLISH_MAX_BACKOFF_MS`.
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            attempts: settings.publish_attempts.max(1),
            backoff: settings.publish_backoff,
            max_backoff: settings.publish_max_backoff.max(settings.publish_backoff),
        }
    }

    /// Exactly one attempt, no waiting.
    pub(crate) fn single() -> Self {
        Self {
            attempts: 1,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause before retry number `retry` (1 = the second attempt).
    ///
    /// Doubles per retry and never exceeds the configured ceiling.
    pub(crate) fn backoff_before(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Runs `deliver` until it succeeds or `policy` runs out of attempts, and
/// returns the last error.
pub(crate) async fn retry_async<F, Fut, T, E>(policy: &RetryConfig, mut deliver: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match deliver().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.attempts() => return Err(e),
            Err(e) => {
                let pause = policy.backoff_before(attempt);
                tracing::debug!(
                    attempt,
                    attempts = policy.attempts(),
                    pause_ms = pause.as_millis() as u64,
                    error = %e,
                    "Retrying delivery"
                );
                attempt += 1;
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::required_values;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(values: &[(&str, &str)]) -> RetryConfig {
        let source = values
            .iter()
            .fold(required_values(), |source, (k, v)| source.with(*k, *v));
        RetryConfig::from_settings(&Settings::from_source(&source).unwrap())
    }

    #[test]
    fn test_defaults_attempt_once() {
        assert_eq!(policy(&[]).attempts(), 1);
        assert_eq!(RetryConfig::single().backoff_before(1), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let policy = policy(&[
            ("PUBLISH_ATTEMPTS", "6"),
            ("PUBLISH_BACKOFF_MS", "100"),
            ("PUBLISH_MAX_BACKOFF_MS", "350"),
        ]);
        assert_eq!(policy.backoff_before(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_before(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_before(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_before(40), Duration::from_millis(350));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let policy = policy(&[("PUBLISH_ATTEMPTS", "3")]);

        let result: Result<u32, String> = retry_async(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 {
                Err(format!("attempt {n} failed"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = policy(&[("PUBLISH_ATTEMPTS", "3"), ("PUBLISH_BACKOFF_MS", "1000")]);
        let started = tokio::time::Instant::now();

        let result: Result<(), String> = retry_async(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(format!("attempt {n} failed"))
        })
        .await;

        assert_eq!(result, Err("attempt 3 failed".to_string()));
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }
}
