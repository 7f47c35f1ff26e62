//! Notification hub: the single entry point for change sources.
//!
//! The hub validates each event, reconciles it against the snapshot under a
//! per-key ordering lock, and hands real transitions to the subscriber
//! registry. Events for different keys never wait on each other; events for
//! the same key are reconciled and dispatched in arrival order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::HubConfig;
use crate::error::{Error, Result};
use crate::event::{Change, ChangeEvent};
use crate::registry::{
    ChannelSubscriber, DispatchReport, SessionUpdate, Subscriber, SubscriberRegistry,
    SubscriptionId, SubscriptionInfo,
};
use crate::snapshot::{Reconciled, SnapshotStore};
use crate::stats::{HubStats, HubStatsSnapshot};
use crate::value::Row;

/// What the hub did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The event did not change the snapshot; nothing was dispatched.
    Unchanged,
    /// The event changed the snapshot and was fanned out.
    Dispatched(DispatchReport),
}

/// Process-wide notification hub.
///
/// Construct once at startup, share behind an `Arc`, and call
/// [`NotificationHub::shutdown`] on exit.
pub struct NotificationHub {
    config: HubConfig,
    store: SnapshotStore,
    registry: SubscriberRegistry,
    /// Per-key ordering locks, pruned when idle.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    stats: Arc<HubStats>,
    shut_down: AtomicBool,
}

impl NotificationHub {
    /// Create a hub with an empty snapshot.
    pub fn new(config: HubConfig) -> Self {
        let stats = Arc::new(HubStats::new());
        let registry = SubscriberRegistry::new(&config, Arc::clone(&stats));

        info!(
            max_delivery_attempts = config.max_delivery_attempts,
            delivery_timeout_ms = config.delivery_timeout.as_millis() as u64,
            "notification hub started"
        );

        Self {
            config,
            store: SnapshotStore::new(),
            registry,
            key_locks: DashMap::new(),
            stats,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Handle one event from a change source.
    ///
    /// Malformed events are rejected with [`Error::Input`] and leave every
    /// other event untouched.
    pub async fn on_source_event(&self, event: ChangeEvent) -> Result<EventOutcome> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        self.stats.record_event();

        let change = match event.validate() {
            Ok(change) => change,
            Err(err) => {
                self.stats.record_rejected();
                warn!(error = %err, "rejected change event");
                return Err(err.into());
            }
        };

        let key = change.key().to_string();
        let lock = self.key_lock(&key);
        let outcome = {
            let _ordered = lock.lock().await;
            self.reconcile(change).await
        };
        drop(lock);
        self.release_key_lock(&key);

        outcome
    }

    async fn reconcile(&self, change: Change) -> Result<EventOutcome> {
        let declared = change.declared_kind();
        let reconciled = self.store.apply(change).map_err(|err| {
            error!(error = %err, "snapshot invariant violated");
            Error::from(err)
        })?;

        match reconciled {
            Reconciled::Unchanged => {
                self.stats.record_unchanged();
                debug!(declared = %declared, "change event did not alter the snapshot");
                Ok(EventOutcome::Unchanged)
            }
            Reconciled::Changed(notification) => {
                debug!(
                    key = %notification.key,
                    declared = %declared,
                    kind = %notification.kind,
                    version = notification.version,
                    "snapshot changed"
                );
                self.stats.record_dispatch();
                let report = self.registry.dispatch(&notification).await;
                Ok(EventOutcome::Dispatched(report))
            }
        }
    }

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let lock = self
            .key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        Arc::clone(lock.value())
    }

    fn release_key_lock(&self, key: &str) {
        // Only the map holds it: nobody is waiting on this key.
        self.key_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Subscribe; `subscriber` receives the current snapshot before any notification.
    pub async fn subscribe(
        &self,
        label: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        if self.is_shut_down() {
            return Err(Error::ShutDown);
        }
        let subscribed = self.registry.subscribe(&self.store, label, subscriber).await;

        // A shutdown that raced the registration may have cleared the
        // registry before this entry was added.
        if self.is_shut_down() {
            if let Ok(id) = subscribed {
                let _ = self.registry.unsubscribe(id);
            }
            return Err(Error::ShutDown);
        }
        subscribed
    }

    /// Subscribe a session loop through a bounded channel.
    pub async fn subscribe_channel(
        &self,
        label: &str,
        capacity: usize,
    ) -> Result<(SubscriptionId, mpsc::Receiver<SessionUpdate>)> {
        let (subscriber, rx) = ChannelSubscriber::channel(capacity);
        let id = self.subscribe(label, Arc::new(subscriber)).await?;
        Ok((id, rx))
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.registry.unsubscribe(subscription_id)
    }

    /// Remove all subscriptions of a client label.
    pub fn remove_client_subscriptions(&self, label: &str) -> usize {
        self.registry.remove_client_subscriptions(label)
    }

    /// Copy of the current rows in insertion order.
    pub fn snapshot(&self) -> Result<Vec<Row>> {
        Ok(self.store.snapshot()?)
    }

    /// Copy of one row.
    pub fn get(&self, key: &str) -> Option<Row> {
        self.store.get(key)
    }

    /// Current snapshot version.
    pub fn version(&self) -> u64 {
        self.store.version()
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }

    /// Active subscriptions.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.subscriptions()
    }

    /// Current counters.
    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns true once [`NotificationHub::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop accepting events and subscriptions and drop every subscriber.
    ///
    /// Idempotent; returns the final counters.
    pub fn shutdown(&self) -> HubStatsSnapshot {
        let stats = self.stats.snapshot();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return stats;
        }

        let dropped = self.registry.clear();
        info!(
            subscriptions_dropped = dropped,
            rows = self.store.len(),
            events_received = stats.events_received,
            notifications_dispatched = stats.notifications_dispatched,
            auto_unsubscribed = stats.auto_unsubscribed,
            "notification hub shut down"
        );
        stats
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

/// Shared hub handle.
pub type SharedHub = Arc<NotificationHub>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;

    fn rome(temp: i64) -> Row {
        Row::new("Rome").with_field("temp", temp)
    }

    #[tokio::test]
    async fn test_weather_scenario() {
        let hub = NotificationHub::default();

        let outcome = hub.on_source_event(ChangeEvent::inserted(rome(20))).await.unwrap();
        assert!(matches!(outcome, EventOutcome::Dispatched(_)));
        assert_eq!(hub.snapshot().unwrap(), vec![rome(20)]);

        let (_id, mut rx) = hub.subscribe_channel("session-1", 8).await.unwrap();
        assert_eq!(rx.recv().await, Some(SessionUpdate::Snapshot(vec![rome(20)])));

        let outcome = hub
            .on_source_event(ChangeEvent::updated(Some(rome(20)), rome(25)))
            .await
            .unwrap();
        assert!(matches!(outcome, EventOutcome::Dispatched(ref r) if r.delivered == 1));

        let Some(SessionUpdate::Change(n)) = rx.recv().await else {
            panic!("expected change notification");
        };
        assert_eq!(n.kind, ChangeKind::Updated);
        assert_eq!(n.old_row, Some(rome(20)));
        assert_eq!(n.new_row, Some(rome(25)));
        assert_eq!(hub.snapshot().unwrap(), vec![rome(25)]);

        let outcome = hub.on_source_event(ChangeEvent::deleted("Oslo", None)).await.unwrap();
        assert_eq!(outcome, EventOutcome::Unchanged);
        assert_eq!(hub.snapshot().unwrap(), vec![rome(25)]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_event_is_rejected() {
        let hub = NotificationHub::default();
        let bad = ChangeEvent {
            kind: ChangeKind::Inserted,
            key: None,
            new_row: None,
            old_row: None,
        };

        let err = hub.on_source_event(bad).await.unwrap_err();
        assert!(matches!(err, Error::Input(_)));
        assert!(err.is_recoverable());

        hub.on_source_event(ChangeEvent::inserted(rome(20))).await.unwrap();
        assert_eq!(hub.snapshot().unwrap().len(), 1);

        let stats = hub.stats();
        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_rejected, 1);
    }

    #[tokio::test]
    async fn test_key_locks_are_pruned() {
        let hub = NotificationHub::default();
        hub.on_source_event(ChangeEvent::inserted(rome(20))).await.unwrap();
        hub.on_source_event(ChangeEvent::deleted("Rome", None)).await.unwrap();
        assert!(hub.key_locks.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_subscribe() {
        use async_trait::async_trait;
        use tokio::sync::Notify;

        use crate::event::Notification;
        use crate::registry::SubscriberError;

        #[derive(Default)]
        struct SlowSeed {
            entered: Notify,
            release: Notify,
        }

        #[async_trait]
        impl Subscriber for SlowSeed {
            async fn on_snapshot(&self, _rows: &[Row]) -> std::result::Result<(), SubscriberError> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(())
            }

            async fn on_change(&self, _n: &Notification) -> std::result::Result<(), SubscriberError> {
                Ok(())
            }
        }

        let hub = Arc::new(NotificationHub::default());
        let seed = Arc::new(SlowSeed::default());

        let subscribing = {
            let hub = Arc::clone(&hub);
            let seed = Arc::clone(&seed);
            tokio::spawn(async move { hub.subscribe("late", seed).await })
        };

        seed.entered.notified().await;
        hub.shutdown();
        seed.release.notify_one();

        assert!(matches!(subscribing.await.unwrap(), Err(Error::ShutDown)));
        assert_eq!(hub.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown() {
        let hub = NotificationHub::default();
        let (_id, _rx) = hub.subscribe_channel("session-1", 4).await.unwrap();
        hub.on_source_event(ChangeEvent::inserted(rome(20))).await.unwrap();

        let stats = hub.shutdown();
        assert_eq!(stats.notifications_dispatched, 1);
        assert!(hub.is_shut_down());
        assert_eq!(hub.subscription_count(), 0);

        assert!(matches!(
            hub.on_source_event(ChangeEvent::inserted(rome(21))).await,
            Err(Error::ShutDown)
        ));
        assert!(matches!(
            hub.subscribe_channel("session-2", 4).await,
            Err(Error::ShutDown)
        ));

        // Second call is a no-op.
        hub.shutdown();
    }
}
