//! Timer-driven flushing. Each tick sends at most one batch; after a failed
//! delivery the next tick waits according to the retry policy.

use std::sync::Weak;
use std::time::Duration;

use activity_core::RetryPolicy;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::tracker::{FlushOutcome, TrackerInner};

pub(crate) struct BatchScheduler {
    handle: JoinHandle<()>,
}

impl BatchScheduler {
    /// Spawn the flush loop. The first tick fires one `interval` after start.
    /// The loop ends on its own once the tracker has been dropped.
    pub(crate) fn start(
        tracker: Weak<TrackerInner>,
        interval: Duration,
        retry_policy: RetryPolicy,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                tokio::time::sleep(next_delay(interval, &retry_policy, failures)).await;

                let Some(tracker) = tracker.upgrade() else {
                    debug!("tracker dropped, batch scheduler exiting");
                    break;
                };
                match tracker.flush().await {
                    FlushOutcome::Requeued(_) => failures = failures.saturating_add(1),
                    FlushOutcome::NoToken => {}
                    FlushOutcome::Empty | FlushOutcome::Delivered(_) | FlushOutcome::Dropped(_) => {
                        failures = 0
                    }
                }
            }
        });
        Self { handle }
    }

    pub(crate) fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn next_delay(interval: Duration, retry_policy: &RetryPolicy, failures: u32) -> Duration {
    if failures == 0 {
        interval
    } else {
        retry_policy.retry_interval(failures)
    }
}
