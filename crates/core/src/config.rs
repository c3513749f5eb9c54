// Tracker Configuration
//
// Buffering and flush settings, loaded from environment variables.

use std::env;
use std::time::Duration;

/// Default number of buffered events that triggers an immediate flush
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default period of the scheduled flush
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5000;

/// Default bound on the final flush and background drain at shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

/// Configuration for the event tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    /// Buffer length that triggers a flush; also the retry cap unit
    pub batch_size: usize,

    /// Period of the scheduled flush
    pub flush_interval: Duration,

    /// Whether the scheduled flush timer runs at all
    pub scheduled_flush: bool,

    /// Bound for the final flush and for draining background tasks
    pub shutdown_timeout: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            scheduled_flush: true,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl TrackerConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `ANALYTICS_BATCH_SIZE`: Flush threshold (default: 1000)
    /// - `ANALYTICS_FLUSH_INTERVAL`: Scheduled flush period in ms (default: 5000)
    /// - `ANALYTICS_SCHEDULED_FLUSH`: Enable the flush timer (default: true)
    /// - `ANALYTICS_SHUTDOWN_TIMEOUT_MS`: Shutdown bound in ms (default: 10000)
    ///
    /// Unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let batch_size = parse_env("ANALYTICS_BATCH_SIZE").unwrap_or(DEFAULT_BATCH_SIZE);

        let flush_interval_ms =
            parse_env("ANALYTICS_FLUSH_INTERVAL").unwrap_or(DEFAULT_FLUSH_INTERVAL_MS);

        let scheduled_flush = env::var("ANALYTICS_SCHEDULED_FLUSH")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        let shutdown_timeout_ms =
            parse_env("ANALYTICS_SHUTDOWN_TIMEOUT_MS").unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS);

        Self::default()
            .with_batch_size(batch_size)
            .with_flush_interval(Duration::from_millis(flush_interval_ms))
            .with_scheduled_flush(scheduled_flush)
            .with_shutdown_timeout(Duration::from_millis(shutdown_timeout_ms))
    }

    /// Set the flush threshold; values below 1 are raised to 1
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the scheduled flush period; a zero period is raised to 1 ms
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_scheduled_flush(mut self, enabled: bool) -> Self {
        self.scheduled_flush = enabled;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
        assert!(config.scheduled_flush);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builders_clamp_degenerate_values() {
        let config = TrackerConfig::default()
            .with_batch_size(0)
            .with_flush_interval(Duration::ZERO);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.flush_interval, Duration::from_millis(1));
    }
}
