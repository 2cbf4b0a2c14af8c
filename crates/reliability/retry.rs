//! Retry with exponential backoff for transient upstream failures.
//!
//! This is the inline variant: it blocks the caller for the duration of the
//! attempts. Failures that should survive a process restart go through the
//! durable job queue instead.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = max_retries + 1.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Perturbs each delay by up to 25% either way so callers that fail
    /// together do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: true,
        }
    }
}

/// Delay before attempt `n` (1-based): `min(base * 2^(n-1), max)`, optionally
/// jittered but never below `base_delay`.
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let raw = config
        .base_delay
        .saturating_mul(2u32.saturating_pow(exponent));
    let capped = raw.min(config.max_delay);

    if !config.jitter {
        return capped;
    }

    let factor = rand::thread_rng().gen_range(0.75..=1.25);
    let jittered = capped.mul_f64(factor);
    jittered.max(config.base_delay)
}

/// Runs `operation` up to `max_retries + 1` times, sleeping the backoff delay
/// between attempts. The last error is returned once attempts are exhausted.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let total_attempts = config.max_retries + 1;

    for attempt in 1..=total_attempts {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        operation = operation_name,
                        attempt, "succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt == total_attempts {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = ?err,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let delay = backoff_delay(attempt, config);
                warn!(
                    operation = operation_name,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = ?err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("loop exits via return")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;

    use super::*;

    fn config_without_jitter() -> RetryConfig {
        RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter: false,
        }
    }

    #[test]
    fn backoff_is_monotone_and_capped() {
        let config = config_without_jitter();

        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = backoff_delay(attempt, &config);
            assert!(delay >= previous, "attempt {attempt} regressed");
            assert!(delay <= config.max_delay);
            previous = delay;
        }

        assert_eq!(backoff_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(backoff_delay(2, &config), Duration::from_millis(2000));
        assert_eq!(backoff_delay(5, &config), Duration::from_millis(16_000));
        assert_eq!(backoff_delay(6, &config), Duration::from_millis(30_000));
    }

    #[test]
    fn jittered_backoff_stays_within_bounds() {
        let config = RetryConfig {
            jitter: true,
            ..config_without_jitter()
        };

        for attempt in 1..=8 {
            let unjittered = backoff_delay(
                attempt,
                &RetryConfig {
                    jitter: false,
                    ..config.clone()
                },
            );
            for _ in 0..50 {
                let delay = backoff_delay(attempt, &config);
                assert!(delay >= config.base_delay);
                assert!(delay <= unjittered.mul_f64(1.25) + Duration::from_millis(1));
            }
        }
    }

    #[tokio::test]
    async fn returns_first_success_without_extra_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = retry_with_backoff(
            &RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            "fetch_subscription",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>("ok")
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = retry_with_backoff(
            &RetryConfig {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            "fetch_subscription",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    Err::<(), _>(anyhow!("attempt {n} failed"))
                }
            },
        )
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("attempt 3"));
    }

    #[tokio::test]
    async fn recovers_midway() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let value = retry_with_backoff(
            &RetryConfig {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                jitter: false,
            },
            "create_refund",
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(anyhow!("transient"))
                    } else {
                        Ok(99)
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(value, 99);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
