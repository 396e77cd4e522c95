//! Memoizing retry wrapper for one-time initialization
//!
//! A [`Retrier`] runs an initialization attempt on demand, at most once per
//! `retry_delay`, and gives up for good after `retry_count` failed attempts.
//! Once an attempt succeeds its value is memoized and every later trigger
//! returns it without running anything.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default number of attempts before a retrier gives up
pub const DEFAULT_RETRY_COUNT: u32 = 10;

/// Default delay between two attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Name used in log lines and errors
    pub name: String,
    /// Maximum number of attempts, the first one included
    pub retry_count: u32,
    /// Minimum delay between two attempts
    pub retry_delay: Duration,
}

impl RetryConfig {
    /// Create a configuration with the default attempt budget
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Set the delay between attempts
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new("retrier")
    }
}

/// Where a retrier stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    /// No attempt has been made yet
    Idle,
    /// The last attempt failed, another one is allowed after the delay
    FailWillRetry,
    /// The attempt budget is exhausted
    PermaFail,
    /// An attempt succeeded and its value is memoized
    Ok,
}

/// Errors returned by [`Retrier::trigger_retry`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    /// The attempt made by this trigger failed
    #[error("{name}: attempt {attempt}/{max_attempts} failed: {message}")]
    AttemptFailed {
        name: String,
        attempt: u32,
        max_attempts: u32,
        message: String,
    },

    /// The previous attempt failed and the retry delay has not elapsed
    #[error("{name}: next attempt in {retry_in:?}, last error: {last_error}")]
    Pending {
        name: String,
        retry_in: Duration,
        last_error: String,
    },

    /// Every allowed attempt failed
    #[error("{name}: giving up after {attempts} attempts, last error: {last_error}")]
    PermaFail {
        name: String,
        attempts: u32,
        last_error: String,
    },
}

impl RetryError {
    /// Whether no further trigger can ever succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, RetryError::PermaFail { .. })
    }
}

struct RetryState<T> {
    status: RetryStatus,
    attempts: u32,
    next_try: Option<Instant>,
    last_error: String,
    value: Option<T>,
}

/// Retry wrapper that memoizes the first successful attempt
///
/// Concurrent triggers are serialized, so at most one attempt runs at a time
/// and a success is observed by every caller that comes after it.
pub struct Retrier<T> {
    config: RetryConfig,
    state: Mutex<RetryState<T>>,
}

impl<T: Clone> Retrier<T> {
    /// Create an idle retrier
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RetryState {
                status: RetryStatus::Idle,
                attempts: 0,
                next_try: None,
                last_error: String::new(),
                value: None,
            }),
        }
    }

    /// The configuration this retrier was built with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Current status
    pub async fn status(&self) -> RetryStatus {
        self.state.lock().await.status
    }

    /// Number of failed attempts so far
    pub async fn attempts(&self) -> u32 {
        self.state.lock().await.attempts
    }

    /// The memoized value, if an attempt succeeded
    pub async fn value(&self) -> Option<T> {
        self.state.lock().await.value.clone()
    }

    /// Run `attempt` unless a value is memoized, the budget is exhausted, or
    /// the retry delay since the last failure has not elapsed yet.
    pub async fn trigger_retry<F, Fut, E>(&self, attempt: F) -> Result<T, RetryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut state = self.state.lock().await;

        if let Some(value) = &state.value {
            return Ok(value.clone());
        }

        if state.status == RetryStatus::PermaFail {
            return Err(RetryError::PermaFail {
                name: self.config.name.clone(),
                attempts: state.attempts,
                last_error: state.last_error.clone(),
            });
        }

        if let Some(next_try) = state.next_try {
            let now = Instant::now();
            if now < next_try {
                return Err(RetryError::Pending {
                    name: self.config.name.clone(),
                    retry_in: next_try - now,
                    last_error: state.last_error.clone(),
                });
            }
        }

        let max_attempts = self.config.retry_count.max(1);
        match attempt().await {
            Ok(value) => {
                if state.attempts > 0 {
                    info!(
                        "{} succeeded after {} failed attempts",
                        self.config.name, state.attempts
                    );
                } else {
                    debug!("{} succeeded", self.config.name);
                }
                state.status = RetryStatus::Ok;
                state.next_try = None;
                state.value = Some(value.clone());
                Ok(value)
            }
            Err(error) => {
                state.attempts += 1;
                state.last_error = error.to_string();

                if state.attempts >= max_attempts {
                    warn!(
                        "{} failed {} times, giving up: {}",
                        self.config.name, state.attempts, state.last_error
                    );
                    state.status = RetryStatus::PermaFail;
                    state.next_try = None;
                } else {
                    warn!(
                        "{} attempt {} failed: {}. Next attempt in {:?}",
                        self.config.name, state.attempts, state.last_error, self.config.retry_delay
                    );
                    state.status = RetryStatus::FailWillRetry;
                    state.next_try = Some(Instant::now() + self.config.retry_delay);
                }

                Err(RetryError::AttemptFailed {
                    name: self.config.name.clone(),
                    attempt: state.attempts,
                    max_attempts,
                    message: state.last_error.clone(),
                })
            }
        }
    }
}
