//! Server run loop.

use std::sync::Arc;

use tablewatch_core::{
    start_pump, HubStatsSnapshot, JsonLinesSource, NotificationHub, PumpReport, Row, StopReason,
};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::session::SessionView;

type FeedReader = Box<dyn AsyncBufRead + Unpin + Send>;

/// Outcome of one server run.
#[derive(Debug)]
pub struct RunSummary {
    /// Pump counters.
    pub pump: PumpReport,
    /// Final table state.
    pub snapshot: Vec<Row>,
    /// Final hub counters.
    pub stats: HubStatsSnapshot,
    /// Session views after their subscriptions closed.
    pub sessions: Vec<SessionView>,
}

async fn open_feed(config: &ServerConfig) -> Result<FeedReader> {
    let reader: FeedReader = match &config.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    Ok(reader)
}

/// Run the hub over the configured feed until it ends or `shutdown` fires.
pub async fn run(config: ServerConfig, shutdown: broadcast::Receiver<()>) -> Result<RunSummary> {
    let reader = open_feed(&config).await?;
    let hub = Arc::new(NotificationHub::new(config.hub.clone()));

    let mut sessions = Vec::with_capacity(config.sessions);
    for i in 1..=config.sessions {
        let label = format!("session-{i}");
        let (id, rx) = hub.subscribe_channel(&label, config.session_buffer).await?;
        info!(session = %label, subscription_id = %id, "session subscribed");
        sessions.push(tokio::spawn(SessionView::new(label).run(rx)));
    }

    let source = JsonLinesSource::new(reader, config.input_name());
    let pump = start_pump(Arc::clone(&hub), source, Some(shutdown)).await?;

    let snapshot = hub.snapshot()?;
    let stats = hub.shutdown();

    let mut views = Vec::with_capacity(sessions.len());
    for session in sessions {
        views.push(session.await?);
    }

    if let StopReason::Failed(reason) = &pump.stop {
        warn!(reason = %reason, "change feed stopped on error");
        return Err(Error::Feed(reason.clone()));
    }

    Ok(RunSummary {
        pump,
        snapshot,
        stats,
        sessions: views,
    })
}
