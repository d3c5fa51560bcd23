pub mod config;
pub mod error;
pub mod retry;

pub use config::TrackerConfig;
pub use error::{TrackerError, TrackerResult};
pub use retry::RetryPolicy;
