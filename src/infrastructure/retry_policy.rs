//! Retry policy for remote calls
//!
//! Transient failures (connectivity, throttling, overload) are retried with
//! exponential backoff plus jitter, taking a fresh rate-limiter permit for
//! every attempt. Permanent failures stop immediately.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::dispatch::DispatchState;
use crate::domain::errors::{FailureClass, RemoteError};
use crate::infrastructure::config::RetryConfig;
use crate::infrastructure::rate_limiter::RateLimiter;

/// Backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first call included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to each delay
    pub jitter_range_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            backoff_multiplier: config.backoff_multiplier.max(1.0),
            max_delay_ms: config.max_delay_ms,
            jitter_range_ms: config.jitter_range_ms,
        }
    }
}

/// Final result of a retried call
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    FailedPermanent { error: RemoteError, attempts: u32 },
    /// Transient failures exhausted the attempts, or cancellation cut the retries short
    FailedAfterRetries { error: RemoteError, attempts: u32 },
    /// Cancelled before the first attempt
    NotDispatched,
}

impl<T> RetryOutcome<T> {
    pub const fn state(&self) -> DispatchState {
        match self {
            Self::Succeeded { .. } => DispatchState::Succeeded,
            Self::FailedPermanent { .. } => DispatchState::FailedPermanent,
            Self::FailedAfterRetries { .. } => DispatchState::FailedAfterRetries,
            Self::NotDispatched => DispatchState::NotDispatched,
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::FailedPermanent { attempts, .. }
            | Self::FailedAfterRetries { attempts, .. } => *attempts,
            Self::NotDispatched => 0,
        }
    }

    pub const fn error(&self) -> Option<&RemoteError> {
        match self {
            Self::FailedPermanent { error, .. } | Self::FailedAfterRetries { error, .. } => Some(error),
            Self::Succeeded { .. } | Self::NotDispatched => None,
        }
    }

    /// Collapse into a plain result, keeping the last error
    pub fn into_result(self) -> Result<T, Option<RemoteError>> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::FailedPermanent { error, .. } | Self::FailedAfterRetries { error, .. } => {
                Err(Some(error))
            }
            Self::NotDispatched => Err(None),
        }
    }
}

/// Tracks one item through the dispatch lifecycle
struct Lifecycle<'a> {
    label: &'a str,
    state: DispatchState,
}

impl<'a> Lifecycle<'a> {
    const fn new(label: &'a str) -> Self {
        Self {
            label,
            state: DispatchState::Pending,
        }
    }

    fn advance(&mut self, next: DispatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid dispatch transition {} -> {}",
            self.state,
            next
        );
        debug!("🔁 {}: {} -> {}", self.label, self.state, next);
        self.state = next;
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Whether another attempt is allowed after `attempts` calls
    pub const fn should_retry(&self, class: FailureClass, attempts: u32) -> bool {
        matches!(class, FailureClass::Transient) && attempts < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based): exponential, capped, plus jitter
    pub fn backoff_delay(&self, retry: u32, jitter_ms: u64) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let exponential = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = exponential.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(capped + jitter_ms.min(self.jitter_range_ms))
    }

    /// Randomized delay; a server-provided retry hint is honoured as a minimum
    pub fn next_delay(&self, retry: u32, error: &RemoteError) -> Duration {
        let jitter = fastrand::u64(0..=self.jitter_range_ms);
        let delay = self.backoff_delay(retry, jitter);
        error.retry_after().map_or(delay, |hint| hint.max(delay))
    }

    /// Run `operation` under this policy. Every attempt first takes a permit
    /// from `limiter`. Nothing new starts once `cancel` fires; an attempt
    /// already in flight is allowed to finish.
    pub async fn execute<T, F, Fut>(
        &self,
        limiter: &RateLimiter,
        cancel: &CancellationToken,
        label: &str,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut lifecycle = Lifecycle::new(label);
        let mut attempts = 0;
        let mut last_error: Option<RemoteError> = None;

        loop {
            if !limiter.acquire_cancellable(cancel).await {
                return match last_error {
                    None => {
                        lifecycle.advance(DispatchState::NotDispatched);
                        RetryOutcome::NotDispatched
                    }
                    Some(error) => {
                        lifecycle.advance(DispatchState::FailedAfterRetries);
                        RetryOutcome::FailedAfterRetries { error, attempts }
                    }
                };
            }

            attempts += 1;
            lifecycle.advance(DispatchState::Dispatched);

            let error = match operation().await {
                Ok(value) => {
                    lifecycle.advance(DispatchState::Succeeded);
                    return RetryOutcome::Succeeded { value, attempts };
                }
                Err(error) => error,
            };

            if error.failure_class() == FailureClass::Permanent {
                warn!("❌ {}: permanent failure: {}", label, error);
                lifecycle.advance(DispatchState::FailedPermanent);
                return RetryOutcome::FailedPermanent { error, attempts };
            }

            lifecycle.advance(DispatchState::Retrying);
            if !self.should_retry(FailureClass::Transient, attempts) {
                warn!("❌ {}: giving up after {} attempt(s): {}", label, attempts, error);
                lifecycle.advance(DispatchState::FailedAfterRetries);
                return RetryOutcome::FailedAfterRetries { error, attempts };
            }

            let delay = self.next_delay(attempts, &error);
            warn!(
                "🔄 {}: attempt {}/{} failed ({}), retrying in {:?}",
                label, attempts, self.max_attempts, error, delay
            );

            let cancelled = tokio::select! {
                () = tokio::time::sleep(delay) => false,
                () = cancel.cancelled() => true,
            };
            if cancelled {
                lifecycle.advance(DispatchState::FailedAfterRetries);
                return RetryOutcome::FailedAfterRetries { error, attempts };
            }
            last_error = Some(error);
        }
    }
}
