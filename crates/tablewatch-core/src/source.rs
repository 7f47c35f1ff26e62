//! Change source adapters.
//!
//! A [`ChangeSource`] is the boundary to whatever captures row changes
//! (log-based CDC, triggers, polling). A [`SourcePump`] drives one source
//! into the hub as a background task.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, SourceError};
use crate::event::ChangeEvent;
use crate::hub::{EventOutcome, SharedHub};

/// A feed of row changes for one table.
///
/// Delivery is at-least-once and ordered per key. `next_event` must be cancel
/// safe: the pump races it against its shutdown signal.
#[async_trait]
pub trait ChangeSource: Send {
    /// Next event, or `None` once the feed has ended.
    async fn next_event(&mut self) -> Option<Result<ChangeEvent, SourceError>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "change-source"
    }
}

/// Sender half of an in-process change feed.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    tx: mpsc::Sender<ChangeEvent>,
}

impl SourceHandle {
    /// Submit an event without waiting; fails if the feed is full or closed.
    pub fn try_send(&self, event: ChangeEvent) -> Result<(), mpsc::error::TrySendError<ChangeEvent>> {
        self.tx.try_send(event)
    }

    /// Submit an event, waiting if the feed is full.
    pub async fn send(&self, event: ChangeEvent) -> Result<(), mpsc::error::SendError<ChangeEvent>> {
        self.tx.send(event).await
    }

    /// Get a reference to the sender.
    pub fn sender(&self) -> &mpsc::Sender<ChangeEvent> {
        &self.tx
    }
}

/// Receiver half of an in-process change feed. Ends when every handle is dropped.
#[derive(Debug)]
pub struct ChannelSource {
    rx: mpsc::Receiver<ChangeEvent>,
}

#[async_trait]
impl ChangeSource for ChannelSource {
    async fn next_event(&mut self) -> Option<Result<ChangeEvent, SourceError>> {
        self.rx.recv().await.map(Ok)
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// Create an in-process change feed with the given buffer size.
pub fn channel(buffer_size: usize) -> (SourceHandle, ChannelSource) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (SourceHandle { tx }, ChannelSource { rx })
}

/// Newline-delimited JSON change events.
///
/// Blank lines and lines starting with `#` are skipped. A line that is not
/// valid UTF-8 or not a change event is reported as a decode error; only a
/// failing reader ends the feed with an I/O error.
pub struct JsonLinesSource<R> {
    reader: R,
    /// Bytes of the current line, kept across cancelled reads.
    buf: Vec<u8>,
    line: u64,
    name: String,
}

impl<R> JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Read events from `reader`.
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<R> ChangeSource for JsonLinesSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<Result<ChangeEvent, SourceError>> {
        loop {
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) if self.buf.is_empty() => return None,
                Ok(_) => {}
                Err(err) => return Some(Err(err.into())),
            }
            self.line += 1;

            let record = std::mem::take(&mut self.buf);
            let text = record.trim_ascii();
            if text.is_empty() || text.starts_with(b"#") {
                continue;
            }

            return Some(serde_json::from_slice(text).map_err(|err| SourceError::Decode {
                line: self.line,
                reason: err.to_string(),
            }));
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source reported the end of its feed.
    EndOfFeed,
    /// The shutdown signal fired.
    Shutdown,
    /// The hub was shut down underneath the pump.
    HubShutDown,
    /// The source or the hub failed in a way that cannot be skipped.
    Failed(String),
}

/// Counters for one pump run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpReport {
    /// Events read from the source.
    pub received: u64,
    /// Events that changed the snapshot.
    pub changed: u64,
    /// Events that were duplicates or no-ops.
    pub unchanged: u64,
    /// Events rejected by the hub.
    pub rejected: u64,
    /// Records the source could not decode.
    pub source_errors: u64,
    /// Why the pump stopped.
    pub stop: StopReason,
}

enum Next {
    Event(Option<Result<ChangeEvent, SourceError>>),
    Shutdown,
}

/// Drives a change source into the hub, one event at a time.
///
/// Sequential consumption keeps the source's per-key order intact.
pub struct SourcePump<S> {
    source: S,
    hub: SharedHub,
    shutdown: Option<broadcast::Receiver<()>>,
}

impl<S: ChangeSource> SourcePump<S> {
    /// Create a pump that runs until the source ends.
    pub fn new(source: S, hub: SharedHub) -> Self {
        Self {
            source,
            hub,
            shutdown: None,
        }
    }

    /// Also stop when `shutdown` fires (or its sender is dropped).
    pub fn with_shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run the pump until the feed ends, shutdown is signalled, or a fatal error.
    pub async fn run(mut self) -> PumpReport {
        let name = self.source.name().to_string();
        info!(source = %name, "change source pump started");

        let mut report = PumpReport {
            received: 0,
            changed: 0,
            unchanged: 0,
            rejected: 0,
            source_errors: 0,
            stop: StopReason::EndOfFeed,
        };

        loop {
            let next = match self.shutdown.as_mut() {
                Some(shutdown) => tokio::select! {
                    biased;
                    _ = shutdown.recv() => Next::Shutdown,
                    next = self.source.next_event() => Next::Event(next),
                },
                None => Next::Event(self.source.next_event().await),
            };

            let event = match next {
                Next::Shutdown => {
                    report.stop = StopReason::Shutdown;
                    break;
                }
                Next::Event(None) => {
                    report.stop = StopReason::EndOfFeed;
                    break;
                }
                Next::Event(Some(Err(err @ SourceError::Decode { .. }))) => {
                    report.source_errors += 1;
                    warn!(source = %name, error = %err, "skipping undecodable change event");
                    continue;
                }
                Next::Event(Some(Err(err))) => {
                    error!(source = %name, error = %err, "change source failed");
                    report.stop = StopReason::Failed(err.to_string());
                    break;
                }
                Next::Event(Some(Ok(event))) => event,
            };

            report.received += 1;
            match self.hub.on_source_event(event).await {
                Ok(EventOutcome::Dispatched(_)) => report.changed += 1,
                Ok(EventOutcome::Unchanged) => report.unchanged += 1,
                Err(Error::ShutDown) => {
                    report.stop = StopReason::HubShutDown;
                    break;
                }
                Err(err) if err.is_recoverable() => report.rejected += 1,
                Err(err) => {
                    report.stop = StopReason::Failed(err.to_string());
                    break;
                }
            }
        }

        info!(
            source = %name,
            received = report.received,
            changed = report.changed,
            unchanged = report.unchanged,
            rejected = report.rejected,
            source_errors = report.source_errors,
            stop = ?report.stop,
            "change source pump stopped"
        );
        report
    }
}

/// Spawn a pump for `source` on the current tokio runtime.
pub fn start_pump<S>(
    hub: SharedHub,
    source: S,
    shutdown: Option<broadcast::Receiver<()>>,
) -> JoinHandle<PumpReport>
where
    S: ChangeSource + 'static,
{
    let mut pump = SourcePump::new(source, hub);
    if let Some(shutdown) = shutdown {
        pump = pump.with_shutdown(shutdown);
    }
    debug!("spawning change source pump");
    tokio::spawn(pump.run())
}
