//! Activity Relay: feeds events from stdin through the activity tracker
//! pipeline to a collector. Handy for smoke-testing a collector deployment.
//!
//! Each input line becomes one event:
//! - `{"name": "...", "data": {...}}`: a custom event
//! - `{"error": "...", "stack": "..."}`: an error event (flushed immediately)
//! - anything else: a custom event of type `line` carrying the raw text

use std::time::Duration;

use activity_core::TrackerConfig;
use activity_web_sdk::{ActivityTracker, EventPayload, FlushOutcome, PageContext};
use clap::Parser;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "activity-relay")]
#[command(about = "Send activity events read from stdin to a collector")]
#[command(version)]
struct Cli {
    /// Collector base address (overrides config)
    #[arg(long, env = "ACTIVITY_TRACKER__API_BASE_URL")]
    api_base_url: Option<String>,

    /// Site/tenant tag attached to every event (overrides config)
    #[arg(long, env = "ACTIVITY_TRACKER__DEMO_ID")]
    demo_id: Option<String>,

    /// Events per request (overrides config)
    #[arg(long, env = "ACTIVITY_TRACKER__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Bearer token for the collector
    #[arg(long, env = "ACTIVITY_TRACKER_TOKEN")]
    token: Option<String>,

    /// Page URL stamped on events
    #[arg(long, default_value = "https://localhost/activity-relay")]
    page_url: String,

    /// How long to wait for the final unload batch before exiting
    #[arg(long, default_value_t = 500)]
    unload_grace_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelayRecord {
    Error {
        error: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Custom {
        name: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
}

fn parse_line(line: &str) -> Option<EventPayload> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let payload = match serde_json::from_str::<RelayRecord>(line) {
        Ok(RelayRecord::Error { error, stack }) => EventPayload::error(&error, stack.as_deref()),
        Ok(RelayRecord::Custom { name, data }) => EventPayload::custom(name, data),
        Err(_) => {
            let mut data = Map::new();
            data.insert("text".into(), Value::String(line.to_owned()));
            EventPayload::custom("line", data)
        }
    };
    Some(payload)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "activity_relay=info,activity_web_sdk=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = TrackerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        TrackerConfig::default()
    });

    if let Some(url) = cli.api_base_url {
        config.api_base_url = url;
    }
    if let Some(demo_id) = cli.demo_id {
        config.demo_id = Some(demo_id);
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    info!(
        api_base_url = %config.api_base_url,
        demo_id = ?config.demo_id,
        batch_size = config.batch_size,
        "Configuration loaded"
    );

    let page = PageContext::new(cli.page_url)
        .with_title("activity-relay")
        .with_user_agent(concat!("activity-relay/", env!("CARGO_PKG_VERSION")), "en-US");
    let tracker = ActivityTracker::connect(config, page).await?;
    if let Some(token) = cli.token {
        tracker.set_token(&token);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut relayed = 0usize;
    while let Some(line) = lines.next_line().await? {
        if let Some(payload) = parse_line(&line) {
            if tracker.track(payload).await.is_some() {
                relayed += 1;
            }
        }
    }
    info!(relayed, "stdin closed, draining queue");

    loop {
        match tracker.flush().await {
            FlushOutcome::Delivered(_) => continue,
            FlushOutcome::Empty => break,
            outcome => {
                warn!(?outcome, remaining = tracker.queued_len(), "stopped draining");
                break;
            }
        }
    }

    let handed_over = tracker.handle_unload();
    if handed_over > 0 {
        tokio::time::sleep(Duration::from_millis(cli.unload_grace_ms)).await;
    }
    info!(relayed, handed_over, "activity relay finished");
    Ok(())
}
