use thiserror::Error;

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Collector returned HTTP {status} for {endpoint}")]
    Status { status: u16, endpoint: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TrackerError {
    /// Whether the failed events should go back on the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let status = TrackerError::Status {
            status: 503,
            endpoint: "https://collector.test/fn-track_activity".into(),
        };
        assert!(status.is_retryable());
        assert!(TrackerError::Transport("connection reset".into()).is_retryable());
        assert!(!TrackerError::Config("apiBaseUrl is required".into()).is_retryable());
    }

    #[test]
    fn test_status_message() {
        let err = TrackerError::Status {
            status: 401,
            endpoint: "https://collector.test/fn-track_activity_batch".into(),
        };
        assert_eq!(
            err.to_string(),
            "Collector returned HTTP 401 for https://collector.test/fn-track_activity_batch"
        );
    }
}
