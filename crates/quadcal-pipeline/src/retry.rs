//! Bounded retry with verification.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_tries: usize,
    /// Pause between failed tries.
    pub backoff_ms: u64,
    /// Pause between applying a change and reading it back.
    pub settle_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            backoff_ms: 200,
            settle_ms: 100,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[error("gave up after {tries} attempts: {}", .last_error.as_deref().unwrap_or("verification failed"))]
pub struct RetryError {
    pub tries: usize,
    /// Message of the last action error; `None` if the action succeeded
    /// but verification rejected it.
    pub last_error: Option<String>,
}

/// Run `action` until `verify` accepts its result, at most `max_tries`
/// times, sleeping `backoff` between tries.
///
/// `action` receives the zero-based try index.
///
/// # Errors
///
/// [`RetryError`] when no try produced a verified result.
pub fn attempt<T, E, A, V>(mut action: A, mut verify: V, max_tries: usize, backoff: Duration) -> Result<T, RetryError>
where
    E: Display,
    A: FnMut(usize) -> Result<T, E>,
    V: FnMut(&T) -> bool,
{
    let mut last_error = None;
    for i in 0..max_tries {
        if i > 0 && !backoff.is_zero() {
            std::thread::sleep(backoff);
        }
        match action(i) {
            Ok(value) if verify(&value) => return Ok(value),
            Ok(_) => {
                tracing::debug!(attempt = i + 1, max_tries, "result not verified");
                last_error = None;
            }
            Err(e) => {
                tracing::debug!(attempt = i + 1, max_tries, error = %e, "attempt failed");
                last_error = Some(e.to_string());
            }
        }
    }
    Err(RetryError {
        tries: max_tries,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_first_verified_result() {
        let mut calls = 0;
        let value = attempt(
            |i| {
                calls += 1;
                Ok::<_, String>(i * 10)
            },
            |v| *v >= 10,
            3,
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(value, 10);
        assert_eq!(calls, 2);
    }

    #[test]
    fn reports_last_error_after_exhaustion() {
        let err = attempt(
            |i| Err::<(), _>(format!("try {i}")),
            |_| true,
            3,
            Duration::ZERO,
        )
        .unwrap_err();
        assert_eq!(err.tries, 3);
        assert_eq!(err.last_error.as_deref(), Some("try 2"));
        assert!(err.to_string().contains("try 2"));
    }

    #[test]
    fn unverified_result_is_not_an_action_error() {
        let err = attempt(|_| Ok::<_, String>(1), |_| false, 2, Duration::ZERO).unwrap_err();
        assert_eq!(err.last_error, None);
        assert!(err.to_string().ends_with("verification failed"));
    }
}
