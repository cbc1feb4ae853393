//! Resolved tuning values for one run.

use std::time::Duration;

use thiserror::Error;

use crate::crawl::DEFAULT_HTTP_CRAWL_DEPTH;
use crate::download::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RETRIES,
    DEFAULT_UPDATE_FREQ, READ_TIMEOUT_SECS, RetryPolicy,
};

/// Upper bound for `max_connections`.
pub const MAX_CONNECTIONS_LIMIT: usize = 100;

/// Upper bound for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 20;

/// Upper bound for `update_freq`.
pub const UPDATE_FREQ_LIMIT: usize = 10_000;

/// A tuning value outside its accepted range.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Connection limit outside `1..=100`.
    #[error("max connections must be between 1 and {MAX_CONNECTIONS_LIMIT}, got {0}")]
    MaxConnections(usize),

    /// Attempt count outside `1..=20`.
    #[error("max retries must be between 1 and {MAX_RETRIES_LIMIT}, got {0}")]
    MaxRetries(u32),

    /// Push batch size outside `1..=10000`.
    #[error("update frequency must be between 1 and {UPDATE_FREQ_LIMIT}, got {0}")]
    UpdateFreq(usize),
}

/// Tuning values for the fetch engine and crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    max_connections: usize,
    max_retries: u32,
    backoff_unit: Duration,
    update_freq: usize,
    http_crawl_depth: usize,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            update_freq: DEFAULT_UPDATE_FREQ,
            http_crawl_depth: DEFAULT_HTTP_CRAWL_DEPTH,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl SyncConfig {
    /// Sets the simultaneous connection limit.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MaxConnections`] outside `1..=100`.
    pub fn with_max_connections(mut self, value: usize) -> Result<Self, ConfigError> {
        if !(1..=MAX_CONNECTIONS_LIMIT).contains(&value) {
            return Err(ConfigError::MaxConnections(value));
        }
        self.max_connections = value;
        Ok(self)
    }

    /// Sets the attempts per file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MaxRetries`] outside `1..=20`.
    pub fn with_max_retries(mut self, value: u32) -> Result<Self, ConfigError> {
        if !(1..=MAX_RETRIES_LIMIT).contains(&value) {
            return Err(ConfigError::MaxRetries(value));
        }
        self.max_retries = value;
        Ok(self)
    }

    /// Sets the hash-check completions between progress pushes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UpdateFreq`] outside `1..=10000`.
    pub fn with_update_freq(mut self, value: usize) -> Result<Self, ConfigError> {
        if !(1..=UPDATE_FREQ_LIMIT).contains(&value) {
            return Err(ConfigError::UpdateFreq(value));
        }
        self.update_freq = value;
        Ok(self)
    }

    /// Sets the backoff time unit.
    #[must_use]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Sets the HTTP crawl depth cap.
    #[must_use]
    pub fn with_http_crawl_depth(mut self, depth: usize) -> Self {
        self.http_crawl_depth = depth;
        self
    }

    /// Sets the HTTP client timeouts in seconds.
    #[must_use]
    pub fn with_timeouts(mut self, connect_secs: u64, read_secs: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.read_timeout_secs = read_secs;
        self
    }

    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn backoff_unit(&self) -> Duration {
        self.backoff_unit
    }

    #[must_use]
    pub fn update_freq(&self) -> usize {
        self.update_freq
    }

    #[must_use]
    pub fn http_crawl_depth(&self) -> usize {
        self.http_crawl_depth
    }

    #[must_use]
    pub fn connect_timeout_secs(&self) -> u64 {
        self.connect_timeout_secs
    }

    #[must_use]
    pub fn read_timeout_secs(&self) -> u64 {
        self.read_timeout_secs
    }

    /// Retry policy for these values.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_unit)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.max_connections(), 5);
        assert_eq!(config.max_retries(), 5);
        assert_eq!(config.update_freq(), 50);
        assert_eq!(config.backoff_unit(), Duration::from_secs(1));
        assert_eq!(config.http_crawl_depth(), 3);
        assert_eq!(config.connect_timeout_secs(), 30);
        assert_eq!(config.read_timeout_secs(), 300);
    }

    #[test]
    fn test_range_validation() {
        assert_eq!(
            SyncConfig::default().with_max_connections(0),
            Err(ConfigError::MaxConnections(0))
        );
        assert_eq!(
            SyncConfig::default().with_max_connections(101),
            Err(ConfigError::MaxConnections(101))
        );
        assert_eq!(
            SyncConfig::default().with_max_retries(21),
            Err(ConfigError::MaxRetries(21))
        );
        assert_eq!(
            SyncConfig::default().with_update_freq(0),
            Err(ConfigError::UpdateFreq(0))
        );
    }

    #[test]
    fn test_retry_policy_reflects_values() {
        let config = SyncConfig::default()
            .with_max_retries(3)
            .unwrap()
            .with_backoff_unit(Duration::from_millis(10));
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff_unit(), Duration::from_millis(10));
    }
}
