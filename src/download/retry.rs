//! Retry logic with linear backoff for failed fetch attempts.
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - may succeed on retry (network, any HTTP status, disk)
//! - [`FailureType::Permanent`] - won't succeed regardless (bad URL, missing local origin)
//!
//! HTTP error statuses are all transient: a CDN can answer 403 or 404 for a
//! short window while a version is being deployed.
//!
//! The [`RetryPolicy`] then decides whether to retry. The delay before
//! attempt `n + 1` is `n` backoff units, so `k` consecutive failures sleep
//! `1, 2, ..., k` units.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use cachesync_core::download::{
//!     DownloadError, FailureType, RetryDecision, RetryPolicy, classify_error,
//! };
//!
//! let policy = RetryPolicy::new(5, Duration::from_secs(1));
//! let error = DownloadError::http_status("http://cdn.example.com/v1/a.pak", 503);
//!
//! match policy.should_retry(classify_error(&error), 2) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(2));
//!         assert_eq!(attempt, 3);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;

/// Default maximum attempts per file.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default backoff unit (1 second).
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Classification of fetch failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: connection reset, timeout, HTTP error statuses, disk write errors.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: malformed URL, missing local origin file.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with linear backoff.
///
/// # Default Values
///
/// - `max_attempts`: 5
/// - `backoff_unit`: 1 second
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay added per failed attempt.
    backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using the default backoff unit.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, DEFAULT_BACKOFF_UNIT)
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the backoff unit.
    #[must_use]
    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    /// Determines whether to retry after `attempt` (1-indexed) failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed): `attempt` units.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt.max(1))
    }
}

/// Classifies a fetch error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network / Timeout | Transient |
/// | Any HTTP error status | Transient |
/// | IO (destination write, local read) | Transient |
/// | Missing local origin file | Permanent |
/// | Invalid URL, client build, limiter closed | Permanent |
#[must_use]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::Network { .. }
        | DownloadError::Timeout { .. }
        | DownloadError::Io { .. }
        | DownloadError::HttpStatus { .. } => FailureType::Transient,
        DownloadError::SourceMissing { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::ClientBuild(_)
        | DownloadError::LimiterClosed => FailureType::Permanent,
    }
}
