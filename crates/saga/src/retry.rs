//! Bounded exponential backoff around step invocations.

use std::future::Future;
use std::time::Duration;

use crate::action::StepExecutionError;

/// How often and how patiently a step is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations allowed, including the first one. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `max_attempts` attempts with no delay in between.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        let cap = self.max_backoff.as_secs_f64();
        if secs.is_finite() && secs < cap {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            self.max_backoff
        }
    }
}

/// Result of driving one step operation through its retry policy.
#[derive(Debug)]
pub(crate) struct Attempted<T> {
    pub outcome: Result<T, StepExecutionError>,
    pub attempts: u32,
}

/// Invokes `call` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. Each invocation is bounded by `timeout`.
pub(crate) async fn invoke_with_retry<T, F, Fut>(
    step_name: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    idempotent: bool,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, StepExecutionError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match tokio::time::timeout(timeout, call(attempt)).await {
            Ok(Ok(value)) => {
                return Attempted {
                    outcome: Ok(value),
                    attempts: attempt,
                };
            }
            Ok(Err(error)) => error,
            Err(_) => StepExecutionError::timeout(step_name, timeout, idempotent),
        };

        if !error.retryable || attempt >= max_attempts {
            return Attempted {
                outcome: Err(error),
                attempts: attempt,
            };
        }

        let delay = policy.backoff_after(attempt);
        tracing::debug!(
            step = step_name,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying step"
        );
        metrics::counter!("saga_step_retries_total").increment(1);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            multiplier: 2.0,
        };
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_after(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_after(40), Duration::from_millis(350));
    }

    #[test]
    fn max_attempts_never_zero() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let attempted = invoke_with_retry(
            "reserve_hotel",
            &RetryPolicy::default(),
            Duration::from_secs(1),
            true,
            move |_| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(StepExecutionError::transient("reserve_hotel", "blip"))
                    } else {
                        Ok("H1")
                    }
                }
            },
        )
        .await;

        assert_eq!(attempted.outcome.unwrap(), "H1");
        assert_eq!(attempted.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let attempted: Attempted<()> = invoke_with_retry(
            "reserve_hotel",
            &RetryPolicy::immediate(4),
            Duration::from_secs(1),
            true,
            |_| async { Err(StepExecutionError::transient("reserve_hotel", "down")) },
        )
        .await;

        assert_eq!(attempted.attempts, 4);
        assert!(attempted.outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_stops_immediately() {
        let attempted: Attempted<()> = invoke_with_retry(
            "reserve_car",
            &RetryPolicy::immediate(5),
            Duration::from_secs(1),
            true,
            |_| async { Err(StepExecutionError::simulated("reserve_car", "forced")) },
        )
        .await;

        assert_eq!(attempted.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_of_non_idempotent_step_is_final() {
        let attempted: Attempted<()> = invoke_with_retry(
            "charge",
            &RetryPolicy::immediate(3),
            Duration::from_millis(50),
            false,
            |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            },
        )
        .await;

        assert_eq!(attempted.attempts, 1);
        let err = attempted.outcome.unwrap_err();
        assert_eq!(err.kind, crate::action::StepErrorKind::Timeout);
        assert!(!err.retryable);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_of_idempotent_step_is_retried() {
        let attempted: Attempted<u32> = invoke_with_retry(
            "reserve_flight",
            &RetryPolicy::immediate(3),
            Duration::from_millis(50),
            true,
            |attempt| async move {
                if attempt < 3 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(attempt)
            },
        )
        .await;

        assert_eq!(attempted.outcome.unwrap(), 3);
        assert_eq!(attempted.attempts, 3);
    }
}
