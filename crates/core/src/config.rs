use std::time::Duration;

use serde::Deserialize;

use crate::error::{TrackerError, TrackerResult};
use crate::retry::RetryPolicy;

/// Tracker configuration. Loaded from environment variables with the prefix
/// `ACTIVITY_TRACKER__`, or built in code by the embedding page.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Collector base address; endpoint names are appended as `{base}-{name}`.
    #[serde(default)]
    pub api_base_url: String,
    #[serde(default)]
    pub demo_id: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default)]
    pub debug: bool,
    /// Upper bound on queued events. `None` keeps the queue unbounded.
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    /// 1 retries failed flushes at the plain batch interval.
    #[serde(default = "default_retry_backoff_coefficient")]
    pub retry_backoff_coefficient: u32,
    /// Ceiling on the wait between failed flushes. Unset means
    /// `DEFAULT_RETRY_CEILING_INTERVALS` batch intervals.
    #[serde(default)]
    pub max_retry_interval_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

/// Retry ceiling, in batch intervals, when `max_retry_interval_ms` is unset.
pub const DEFAULT_RETRY_CEILING_INTERVALS: u32 = 10;

fn default_batch_size() -> usize {
    10
}
fn default_batch_interval_ms() -> u64 {
    5000
}
fn default_retry_backoff_coefficient() -> u32 {
    1
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            demo_id: None,
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            debug: false,
            max_queue_size: None,
            retry_backoff_coefficient: default_retry_backoff_coefficient(),
            max_retry_interval_ms: None,
            request_timeout_ms: None,
        }
    }
}

impl TrackerConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_demo_id(mut self, demo_id: impl Into<String>) -> Self {
        self.demo_id = Some(demo_id.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ACTIVITY_TRACKER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check the settings that would make delivery impossible.
    pub fn validate(&self) -> TrackerResult<()> {
        let base = self.api_base_url.trim();
        if base.is_empty() {
            return Err(TrackerError::Config("api_base_url is required".into()));
        }
        url::Url::parse(base).map_err(|e| {
            TrackerError::Config(format!("api_base_url {base:?} is not a valid URL: {e}"))
        })?;
        if self.batch_size == 0 {
            return Err(TrackerError::Config("batch_size must be at least 1".into()));
        }
        if self.batch_interval_ms == 0 {
            return Err(TrackerError::Config(
                "batch_interval_ms must be greater than zero".into(),
            ));
        }
        if self.max_queue_size == Some(0) {
            return Err(TrackerError::Config(
                "max_queue_size must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Retry schedule for failed flushes, anchored on the batch interval.
    pub fn retry_policy(&self) -> RetryPolicy {
        let ceiling = self
            .max_retry_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| {
                self.batch_interval()
                    .saturating_mul(DEFAULT_RETRY_CEILING_INTERVALS)
            });
        RetryPolicy::build(self.retry_backoff_coefficient.max(1), self.batch_interval())
            .maximum_interval(ceiling)
            .provide()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_interval(), Duration::from_secs(5));
        assert!(!config.debug);
        assert!(config.demo_id.is_none());
        assert!(config.max_queue_size.is_none());
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = TrackerConfig::default().validate().unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));

        let err = TrackerConfig::new("   ").validate().unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let err = TrackerConfig::new("not a url").validate().unwrap_err();
        assert!(err.to_string().contains("not a valid URL"));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = TrackerConfig::new("https://collector.test/svc").with_batch_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_config() {
        let config = TrackerConfig::new("https://us-central1-demo.cloudfunctions.net/svc-dev")
            .with_demo_id("harborlight")
            .with_batch_size(2);
        assert!(config.validate().is_ok());
        assert_eq!(config.demo_id.as_deref(), Some("harborlight"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TrackerConfig = serde_json::from_value(serde_json::json!({
            "api_base_url": "https://collector.test/svc",
            "batch_interval_ms": 1000,
        }))
        .unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.batch_interval(), Duration::from_secs(1));
        assert_eq!(config.retry_backoff_coefficient, 1);
    }

    #[test]
    fn test_default_retry_policy_is_fixed_interval() {
        let policy = TrackerConfig::new("https://collector.test/svc").retry_policy();
        assert_eq!(policy.retry_interval(1), Duration::from_secs(5));
        assert_eq!(policy.retry_interval(4), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_backoff_is_capped_by_default() {
        let mut config = TrackerConfig::new("https://collector.test/svc");
        config.retry_backoff_coefficient = 2;
        let policy = config.retry_policy();
        assert_eq!(policy.maximum_interval, Some(Duration::from_secs(50)));
        assert_eq!(policy.retry_interval(2), Duration::from_secs(10));
        assert_eq!(policy.retry_interval(32), Duration::from_secs(50));
        assert_eq!(policy.retry_interval(u32::MAX), Duration::from_secs(50));
    }

    #[test]
    fn test_explicit_retry_ceiling() {
        let mut config = TrackerConfig::new("https://collector.test/svc");
        config.retry_backoff_coefficient = 3;
        config.max_retry_interval_ms = Some(12_000);
        assert_eq!(config.retry_policy().retry_interval(40), Duration::from_secs(12));
    }
}
