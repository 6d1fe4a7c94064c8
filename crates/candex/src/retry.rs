//! Bounded retry with exponential backoff and jitter for external calls.
//!
//! Every outbound call (extraction, classification, parsing, CRM) goes
//! through [`RetryPolicy::run`]. Transient failures are retried with
//! `min(max_delay, initial_delay * 2^(attempt-1)) + random(0, jitter)`;
//! non-retryable failures and exhausted budgets surface as a typed
//! [`RetryError`] carrying the attempt count and the last error.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// How an external error should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// The call failed with an HTTP-style status code.
    Status(u16),
    /// Transport-level failure (timeout, connection reset) with no status.
    Transport,
    /// Never retry (malformed payloads, local invariant violations).
    Fatal,
}

/// Implemented by error types that cross the process boundary.
pub trait ExternalError: std::error::Error {
    fn retry_hint(&self) -> RetryHint;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_retryable_status")]
    pub retryable_status: Vec<u16>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_retryable_status() -> Vec<u16> {
    vec![408, 429, 500, 502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            retryable_status: default_retryable_status(),
        }
    }
}

/// Terminal outcome of a retried operation.
#[derive(Error, Debug)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Exhausted {
        operation: String,
        attempts: u32,
        source: E,
    },

    #[error("{operation} hit a non-retryable error on attempt {attempts}: {source}")]
    Fatal {
        operation: String,
        attempts: u32,
        source: E,
    },
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Fatal { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Fatal { source, .. } => source,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Fatal { source, .. } => source,
        }
    }
}

/// Computes the backoff delay before the retry that follows `attempt`.
///
/// The exponential component is capped at `max_delay_ms`; jitter is added
/// on top, so the result never exceeds `max_delay_ms + jitter_ms`.
pub fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exp = attempt.saturating_sub(1);
    let base = if exp >= 63 {
        u64::MAX
    } else {
        config.initial_delay_ms.saturating_mul(1u64 << exp)
    };
    let capped = base.min(config.max_delay_ms);

    let jitter = if config.jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.jitter_ms)
    };

    Duration::from_millis(capped.saturating_add(jitter))
}

/// Whether a response status warrants another attempt.
///
/// `None` means the failure happened below the protocol layer (timeout,
/// connection error) and is always retryable.
pub fn is_retryable(status: Option<u16>, retryable: &[u16]) -> bool {
    match status {
        Some(code) => retryable.contains(&code),
        None => true,
    }
}

/// Bounded attempt loop around a blocking fallible closure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `f` until it succeeds, fails non-retryably, or the attempt
    /// budget is spent. The closure receives the 1-based attempt number.
    pub fn run<T, E, F>(&self, operation: &str, mut f: F) -> Result<T, RetryError<E>>
    where
        E: ExternalError,
        F: FnMut(u32) -> Result<T, E>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = match err.retry_hint() {
                        RetryHint::Fatal => false,
                        RetryHint::Status(code) => {
                            is_retryable(Some(code), &self.config.retryable_status)
                        }
                        RetryHint::Transport => is_retryable(None, &self.config.retryable_status),
                    };

                    if !retryable {
                        return Err(RetryError::Fatal {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }

                    if attempt >= self.config.max_attempts {
                        return Err(RetryError::Exhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = compute_delay(attempt, &self.config);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, backing off"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct TestError {
        message: String,
        hint: RetryHint,
    }

    impl ExternalError for TestError {
        fn retry_hint(&self) -> RetryHint {
            self.hint
        }
    }

    fn transient(message: &str) -> TestError {
        TestError {
            message: message.to_string(),
            hint: RetryHint::Transport,
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ms: 0,
            retryable_status: default_retryable_status(),
        }
    }

    #[test]
    fn test_compute_delay_non_decreasing_without_jitter() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_ms: 0,
            retryable_status: vec![],
        };

        let mut previous = Duration::ZERO;
        for attempt in 1..=12 {
            let delay = compute_delay(attempt, &config);
            assert!(delay >= previous, "delay regressed at attempt {}", attempt);
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(5_000));
    }

    #[test]
    fn test_compute_delay_bounded_by_max_plus_jitter() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 50,
            retryable_status: vec![],
        };

        for attempt in 1..=64 {
            let delay = compute_delay(attempt, &config);
            assert!(delay <= Duration::from_millis(1_050));
        }
    }

    #[test]
    fn test_compute_delay_doubles_each_attempt() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 60_000,
            jitter_ms: 0,
            retryable_status: vec![],
        };

        assert_eq!(compute_delay(1, &config), Duration::from_millis(100));
        assert_eq!(compute_delay(2, &config), Duration::from_millis(200));
        assert_eq!(compute_delay(3, &config), Duration::from_millis(400));
        assert_eq!(compute_delay(4, &config), Duration::from_millis(800));
    }

    #[test]
    fn test_is_retryable_status_set() {
        let retryable = default_retryable_status();
        assert!(is_retryable(Some(429), &retryable));
        assert!(is_retryable(Some(503), &retryable));
        assert!(!is_retryable(Some(400), &retryable));
        assert!(!is_retryable(Some(404), &retryable));
    }

    #[test]
    fn test_is_retryable_transport_always() {
        assert!(is_retryable(None, &[]));
    }

    #[test]
    fn test_run_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(fast_config(3));
        let mut calls = 0;

        let result: Result<u32, _> = policy.run("test_op", |_attempt| {
            calls += 1;
            if calls < 3 {
                Err(transient("flaky"))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_run_exhausts_attempt_budget() {
        let policy = RetryPolicy::new(fast_config(2));
        let mut calls = 0;

        let result: Result<(), _> = policy.run("test_op", |_attempt| {
            calls += 1;
            Err(transient("always down"))
        });

        let err = result.unwrap_err();
        assert_eq!(calls, 2);
        assert_eq!(err.attempts(), 2);
        assert!(matches!(err, RetryError::Exhausted { .. }));
    }

    #[test]
    fn test_run_fatal_short_circuits() {
        let policy = RetryPolicy::new(fast_config(5));
        let mut calls = 0;

        let result: Result<(), _> = policy.run("test_op", |_attempt| {
            calls += 1;
            Err(TestError {
                message: "bad payload".to_string(),
                hint: RetryHint::Fatal,
            })
        });

        let err = result.unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, RetryError::Fatal { attempts: 1, .. }));
    }

    #[test]
    fn test_run_non_retryable_status_short_circuits() {
        let policy = RetryPolicy::new(fast_config(5));
        let mut calls = 0;

        let result: Result<(), _> = policy.run("test_op", |_attempt| {
            calls += 1;
            Err(TestError {
                message: "unauthorized".to_string(),
                hint: RetryHint::Status(401),
            })
        });

        assert!(matches!(result.unwrap_err(), RetryError::Fatal { .. }));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_config_deserialization_defaults() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 30_000);
        assert_eq!(config.jitter_ms, 250);
        assert!(config.retryable_status.contains(&429));
    }
}
