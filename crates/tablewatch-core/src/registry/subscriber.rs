//! Subscriber callbacks.
//!
//! A subscriber is whatever re-renders a client view: a session loop behind a
//! channel, or a plain closure.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::Notification;
use crate::value::Row;

/// Error reported by a subscriber callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Delivery target for snapshot and change notifications.
///
/// Callbacks only ever see copies of rows. `on_snapshot` is called exactly
/// once, before the first `on_change`.
#[async_trait]
pub trait Subscriber: Send + Sync + 'static {
    /// Receive the full table state at subscribe time.
    async fn on_snapshot(&self, rows: &[Row]) -> Result<(), SubscriberError>;

    /// Receive one state transition.
    async fn on_change(&self, notification: &Notification) -> Result<(), SubscriberError>;
}

/// Update forwarded to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Initial table state.
    Snapshot(Vec<Row>),
    /// A single transition.
    Change(Notification),
}

/// Forwards updates into a bounded channel drained by a session loop.
///
/// A full channel blocks the delivery, which the registry bounds with its
/// delivery timeout. A dropped receiver fails every delivery.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<SessionUpdate>,
}

impl ChannelSubscriber {
    /// Wrap an existing sender.
    pub fn new(tx: mpsc::Sender<SessionUpdate>) -> Self {
        Self { tx }
    }

    /// Create a subscriber and the receiving end for its session loop.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    async fn forward(&self, update: SessionUpdate) -> Result<(), SubscriberError> {
        self.tx
            .send(update)
            .await
            .map_err(|_| SubscriberError::new("session channel closed"))
    }
}

#[async_trait]
impl Subscriber for ChannelSubscriber {
    async fn on_snapshot(&self, rows: &[Row]) -> Result<(), SubscriberError> {
        self.forward(SessionUpdate::Snapshot(rows.to_vec())).await
    }

    async fn on_change(&self, notification: &Notification) -> Result<(), SubscriberError> {
        self.forward(SessionUpdate::Change(notification.clone())).await
    }
}

/// Adapts a synchronous closure.
pub struct FnSubscriber<F> {
    callback: F,
}

impl<F> FnSubscriber<F>
where
    F: Fn(SessionUpdate) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    /// Wrap a callback.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> Subscriber for FnSubscriber<F>
where
    F: Fn(SessionUpdate) -> Result<(), SubscriberError> + Send + Sync + 'static,
{
    async fn on_snapshot(&self, rows: &[Row]) -> Result<(), SubscriberError> {
        (self.callback)(SessionUpdate::Snapshot(rows.to_vec()))
    }

    async fn on_change(&self, notification: &Notification) -> Result<(), SubscriberError> {
        (self.callback)(SessionUpdate::Change(notification.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;

    fn notification() -> Notification {
        Notification {
            key: "Rome".into(),
            kind: ChangeKind::Inserted,
            new_row: Some(Row::new("Rome").with_field("temp", 20)),
            old_row: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn test_channel_subscriber_forwards() {
        let (sub, mut rx) = ChannelSubscriber::channel(4);

        sub.on_snapshot(&[]).await.unwrap();
        sub.on_change(&notification()).await.unwrap();

        assert_eq!(rx.recv().await, Some(SessionUpdate::Snapshot(vec![])));
        assert_eq!(rx.recv().await, Some(SessionUpdate::Change(notification())));
    }

    #[tokio::test]
    async fn test_channel_subscriber_closed_session() {
        let (sub, rx) = ChannelSubscriber::channel(1);
        drop(rx);

        let err = sub.on_change(&notification()).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_fn_subscriber() {
        let sub = FnSubscriber::new(|update| match update {
            SessionUpdate::Snapshot(_) => Ok(()),
            SessionUpdate::Change(_) => Err(SubscriberError::new("render failed")),
        });

        assert!(sub.on_snapshot(&[]).await.is_ok());
        assert_eq!(
            sub.on_change(&notification()).await,
            Err(SubscriberError::new("render failed"))
        );
    }
}
