//! Logging sessions.
//!
//! A session keeps its own copy of the table, rebuilt from the snapshot it
//! receives at subscribe time and patched by every notification after that.
//! Each applied update counts as one re-render.

use tablewatch_core::{ChangeKind, Notification, Row, SessionUpdate};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A session's view of the table.
#[derive(Debug, Clone, Default)]
pub struct SessionView {
    label: String,
    rows: Vec<Row>,
    renders: u64,
}

impl SessionView {
    /// Create an empty view.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            rows: Vec::new(),
            renders: 0,
        }
    }

    /// Session label used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Rows in display order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of updates applied.
    pub fn renders(&self) -> u64 {
        self.renders
    }

    /// Apply one update to the view.
    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Snapshot(rows) => self.rows = rows,
            SessionUpdate::Change(notification) => self.patch(notification),
        }
        self.renders += 1;
    }

    fn patch(&mut self, notification: Notification) {
        let position = self.rows.iter().position(|row| row.key() == notification.key);

        match (notification.kind, notification.new_row, position) {
            (ChangeKind::Deleted, _, Some(idx)) => {
                self.rows.remove(idx);
            }
            (ChangeKind::Deleted, _, None) => {}
            (_, Some(row), Some(idx)) => self.rows[idx] = row,
            (_, Some(row), None) => self.rows.push(row),
            (_, None, _) => {}
        }
    }

    /// Drain `updates` until the hub drops the subscription.
    pub async fn run(mut self, mut updates: mpsc::Receiver<SessionUpdate>) -> Self {
        while let Some(update) = updates.recv().await {
            let kind = match &update {
                SessionUpdate::Snapshot(_) => "snapshot".to_string(),
                SessionUpdate::Change(n) => n.kind.to_string(),
            };
            self.apply(update);
            debug!(
                session = %self.label,
                update = %kind,
                rows = self.rows.len(),
                renders = self.renders,
                "session re-rendered"
            );
        }

        info!(
            session = %self.label,
            rows = self.rows.len(),
            renders = self.renders,
            "session closed"
        );
        self
    }
}
