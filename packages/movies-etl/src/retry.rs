//! Bounded exponential backoff
//!
//! Wraps a whole operation (a pipeline run, index provisioning) and re-runs
//! it on transient errors until either the attempt budget or the elapsed-time
//! budget is spent.

use crate::config::BackoffSettings;
use crate::error::{EtlError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts, first one included
    pub max_attempts: u32,
    /// Budget measured from the start of the first attempt
    pub max_elapsed: Duration,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&BackoffSettings::default())
    }
}

impl From<&BackoffSettings> for RetryPolicy {
    fn from(settings: &BackoffSettings) -> Self {
        Self {
            max_attempts: settings.max_tries.max(1),
            max_elapsed: Duration::from_secs(settings.max_time),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            multiplier: settings.multiplier,
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// One failed attempt, as seen by the notify hook
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    pub operation: &'a str,
    pub attempt: u32,
    pub max_attempts: u32,
    pub error: &'a EtlError,
    /// `None` when this failure ends the retry loop
    pub next_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            max_elapsed: Duration::ZERO,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }

    /// Run `op` with retries, logging every failed attempt
    pub async fn run<T, F, Fut>(&self, operation: &str, op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_notify(operation, op, |attempt| match attempt.next_delay {
            Some(delay) => warn!(
                "{}: attempt {}/{} failed, retrying in {:?}: {}",
                attempt.operation, attempt.attempt, attempt.max_attempts, delay, attempt.error
            ),
            None => warn!(
                "{}: attempt {}/{} failed, giving up: {}",
                attempt.operation, attempt.attempt, attempt.max_attempts, attempt.error
            ),
        })
        .await
    }

    /// Run `op` with retries, calling `notify` after every failed attempt
    ///
    /// `op` receives the 1-based attempt number. Errors whose category is not
    /// transient are returned immediately. On exhaustion the last error is
    /// wrapped in [`EtlError::RetriesExhausted`].
    pub async fn run_notify<T, F, Fut, N>(&self, operation: &str, mut op: F, mut notify: N) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        N: FnMut(&RetryAttempt<'_>),
    {
        let started = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                notify(&RetryAttempt {
                    operation,
                    attempt,
                    max_attempts: self.max_attempts,
                    error: &error,
                    next_delay: None,
                });
                return Err(error);
            }

            let delay = self.delay_for(attempt);
            let out_of_attempts = attempt >= self.max_attempts;
            let out_of_time = started.elapsed() + delay > self.max_elapsed;

            if out_of_attempts || out_of_time {
                notify(&RetryAttempt {
                    operation,
                    attempt,
                    max_attempts: self.max_attempts,
                    error: &error,
                    next_delay: None,
                });
                return Err(EtlError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            notify(&RetryAttempt {
                operation,
                attempt,
                max_attempts: self.max_attempts,
                error: &error,
                next_delay: Some(delay),
            });
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            max_elapsed: Duration::from_secs(5),
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            max_elapsed: Duration::from_secs(60),
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_from_settings() {
        let policy = RetryPolicy::from(&BackoffSettings {
            max_tries: 0,
            max_time: 30,
            initial_delay_ms: 250,
            multiplier: 3.0,
            max_delay_ms: 1000,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_elapsed, Duration::from_secs(30));
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = fast(5)
            .run("flaky", |attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt < 3 {
                        Err(EtlError::IndexRejected("unavailable".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let mut seen = Vec::new();
        let result: Result<()> = fast(3)
            .run_notify(
                "always-down",
                |_| async { Err(EtlError::IndexRejected("down".to_string())) },
                |attempt| seen.push((attempt.attempt, attempt.next_delay.is_some())),
            )
            .await;

        match result {
            Err(EtlError::RetriesExhausted {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "always-down");
                assert_eq!(attempts, 3);
                assert!(matches!(*source, EtlError::IndexRejected(_)));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert_eq!(seen, vec![(1, true), (2, true), (3, false)]);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<()> = fast(5)
            .run("bad-row", |_| {
                calls.set(calls.get() + 1);
                async { Err(EtlError::malformed("missing title")) }
            })
            .await;

        assert!(matches!(result, Err(EtlError::MalformedRow(_))));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_elapsed_budget_stops_early() {
        let policy = RetryPolicy {
            max_attempts: 100,
            max_elapsed: Duration::from_millis(30),
            initial_delay: Duration::from_millis(20),
            multiplier: 1.0,
            max_delay: Duration::from_millis(20),
        };
        let calls = Cell::new(0);
        let result: Result<()> = policy
            .run("slow", |_| {
                calls.set(calls.get() + 1);
                async { Err(EtlError::IndexRejected("timeout".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(EtlError::RetriesExhausted { .. })));
        assert!(calls.get() <= 2, "ran {} attempts", calls.get());
    }
}
