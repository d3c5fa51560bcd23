//! Retry schedule for flushes that failed to reach the collector.
use std::time::Duration;

/// Determines how long the scheduler waits after consecutive failed flushes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past failure.
    pub backoff_coefficient: u32,
    /// The wait after the first failure.
    pub initial_interval: Duration,
    /// The maximum possible wait between retries.
    pub maximum_interval: Option<Duration>,
}

impl RetryPolicy {
    pub fn build(backoff_coefficient: u32, initial_interval: Duration) -> RetryPolicyBuilder {
        RetryPolicyBuilder::new(backoff_coefficient, initial_interval)
    }

    /// Wait before the next attempt after `failures` consecutive failures.
    pub fn retry_interval(&self, failures: u32) -> Duration {
        let factor = self
            .backoff_coefficient
            .saturating_pow(failures.saturating_sub(1));
        let candidate = self
            .initial_interval
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);

        match self.maximum_interval {
            Some(max_interval) => std::cmp::min(candidate, max_interval),
            None => candidate,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicyBuilder::default().provide()
    }
}

pub struct RetryPolicyBuilder {
    pub backoff_coefficient: u32,
    pub initial_interval: Duration,
    pub maximum_interval: Option<Duration>,
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self {
            backoff_coefficient: 1,
            initial_interval: Duration::from_millis(5000),
            maximum_interval: None,
        }
    }
}

impl RetryPolicyBuilder {
    pub fn new(backoff_coefficient: u32, initial_interval: Duration) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            ..RetryPolicyBuilder::default()
        }
    }

    pub fn maximum_interval(mut self, interval: Duration) -> RetryPolicyBuilder {
        self.maximum_interval = Some(interval);
        self
    }

    pub fn provide(&self) -> RetryPolicy {
        RetryPolicy {
            backoff_coefficient: self.backoff_coefficient,
            initial_interval: self.initial_interval,
            maximum_interval: self.maximum_interval,
        }
    }
}
