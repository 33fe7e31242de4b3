//! `verse-watch` -- start a generation job and follow its progress.
//!
//! ```text
//! verse-watch <text|audio> <entity-id>
//! ```
//!
//! Enqueues the job through the REST API, follows it over the push
//! channel and prints every progress entry. Exits once a completed job
//! has settled, or with an error when the job fails.
//!
//! # Environment variables
//!
//! | Variable                | Default                      | Description                         |
//! |-------------------------|------------------------------|-------------------------------------|
//! | `VERSE_SOCKET_URL`      | `http://localhost:3000/poem` | Socket.IO endpoint and namespace    |
//! | `VERSE_API_URL`         | `http://localhost:3000`      | REST base URL                       |
//! | `VERSE_ACCESS_TOKEN`    | --                           | Bearer token for both connections   |
//! | `VERSE_SETTLE_DELAY_MS` | `2000`                       | Pause before a completed job exits  |

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use verse_channel::api::HttpGenerationApi;
use verse_channel::client::SocketClient;
use verse_channel::connection::ChannelConnection;
use verse_channel::transport::WsTransport;
use verse_core::clock::SystemClock;
use verse_core::job::{JobKind, ProgressEvent, Status};
use verse_tracker::config::TrackerConfig;
use verse_tracker::events::TrackerEvent;
use verse_tracker::hooks::NoopCache;
use verse_tracker::service::TrackerService;
use verse_tracker::tracker::JobTracker;

const USAGE: &str = "usage: verse-watch <text|audio> <entity-id>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "verse_watch=info,verse_tracker=info,verse_channel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (kind, entity_id) = parse_args(std::env::args().skip(1))?;
    let config = TrackerConfig::from_env();

    tracing::info!(
        socket_url = %config.socket_url,
        api_url = %config.api_url,
        authenticated = config.access_token.is_some(),
        "Starting verse-watch",
    );

    let client = SocketClient::new(config.socket_url.clone())
        .with_access_token(config.access_token.clone());
    let (transport, inbound) = WsTransport::new(client);
    let tracker = JobTracker::new(
        ChannelConnection::new(Box::new(transport)),
        Arc::new(NoopCache),
        Arc::new(SystemClock),
        config.settle_delay,
    );
    let api = HttpGenerationApi::new(config.api_url.clone())
        .with_access_token(config.access_token.clone());
    let handle = TrackerService::spawn(tracker, inbound, Arc::new(api));

    let mut events = handle.subscribe();
    let started = handle
        .start(kind, &entity_id)
        .await
        .context("Failed to start job")?;
    let job_id = started.job_id;

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) if event.job_id().is_some_and(|id| *id != job_id) => {}
                Ok(TrackerEvent::Progress { entry, .. }) => print_entry(&entry),
                Ok(TrackerEvent::Terminal { status: Status::Failed, .. }) => {
                    outcome = Err(anyhow::anyhow!("Job {job_id} failed"));
                    break;
                }
                Ok(TrackerEvent::Terminal { .. }) => {}
                Ok(TrackerEvent::Dismissed { .. }) => break,
                Ok(TrackerEvent::Disconnected { reason }) => {
                    tracing::warn!(%reason, "Progress may stall until the event source is back");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed tracker events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    outcome
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<(JobKind, String)> {
    let (Some(kind), Some(entity_id), None) = (args.next(), args.next(), args.next()) else {
        bail!(USAGE);
    };
    let kind: JobKind = kind.parse().context(USAGE)?;
    Ok((kind, entity_id))
}

fn print_entry(entry: &ProgressEvent) {
    println!(
        "{} [{:>9}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.status.as_str(),
        entry.message
    );
}
