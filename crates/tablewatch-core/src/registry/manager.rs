//! Subscriber registry: subscribe, unsubscribe and fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::subscriber::{Subscriber, SubscriberError};
use super::subscription::{SubscriptionEntry, SubscriptionId, SubscriptionInfo};
use crate::config::HubConfig;
use crate::error::{DeliveryError, Error, Result};
use crate::event::Notification;
use crate::snapshot::SnapshotStore;
use crate::stats::HubStats;
use crate::value::Row;

/// Result of fanning one notification out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers that accepted the notification.
    pub delivered: usize,
    /// Subscribers unsubscribed before their delivery started.
    pub skipped: usize,
    /// Subscribers that exhausted the retry budget and were dropped.
    pub failed: Vec<SubscriptionId>,
}

enum Payload<'a> {
    Snapshot(&'a [Row]),
    Change(&'a Notification),
}

impl Payload<'_> {
    async fn send_to(&self, subscriber: &dyn Subscriber) -> std::result::Result<(), SubscriberError> {
        match self {
            Payload::Snapshot(rows) => subscriber.on_snapshot(rows).await,
            Payload::Change(notification) => subscriber.on_change(notification).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Payload::Snapshot(_) => "snapshot",
            Payload::Change(_) => "change",
        }
    }
}

enum Delivery {
    Delivered,
    Skipped,
    Failed(DeliveryError),
}

/// Tracks active subscribers and delivers notifications to them.
///
/// Each subscriber is delivered to independently: a failing or slow
/// subscriber costs at most `max_delivery_attempts * delivery_timeout` and
/// never blocks or corrupts deliveries to the others.
pub struct SubscriberRegistry {
    /// Active subscriptions keyed by handle.
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<SubscriptionEntry>>>,
    /// Next subscription ID.
    next_subscription_id: AtomicU64,
    max_attempts: u32,
    timeout: Duration,
    stats: Arc<HubStats>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new(config: &HubConfig, stats: Arc<HubStats>) -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_subscription_id: AtomicU64::new(1),
            max_attempts: config.max_delivery_attempts.max(1),
            timeout: config.delivery_timeout,
            stats,
        }
    }

    /// Register a subscriber and deliver the current snapshot to it.
    ///
    /// Registration happens under the snapshot's read lock, so the snapshot
    /// the subscriber receives and the notifications it is later sent never
    /// overlap and never leave a gap. The subscriber's delivery lock is held
    /// until the snapshot has been delivered, so no notification can overtake
    /// it. If the snapshot cannot be delivered the subscription is removed.
    pub async fn subscribe(
        &self,
        store: &SnapshotStore,
        label: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        let subscription_id =
            SubscriptionId::from_raw(self.next_subscription_id.fetch_add(1, Ordering::SeqCst));

        let delivery = Arc::new(Mutex::new(()));
        let seeding = Arc::clone(&delivery).lock_owned().await;

        let (entry, rows) = store.read_with(|version, rows| {
            let entry = Arc::new(SubscriptionEntry::new(
                subscription_id,
                label,
                subscriber,
                version,
                delivery,
            ));
            self.subscriptions
                .write()
                .insert(subscription_id, Arc::clone(&entry));
            (entry, rows)
        })?;

        debug!(
            subscription_id = %subscription_id,
            client = label,
            start_version = entry.start_version,
            rows = rows.len(),
            "subscription created"
        );

        let seeded = self.deliver(&entry, Payload::Snapshot(&rows)).await;
        drop(seeding);

        match seeded {
            Delivery::Delivered => Ok(subscription_id),
            // Removed while the snapshot was in flight.
            Delivery::Skipped => Err(Error::SubscriptionNotFound(subscription_id)),
            Delivery::Failed(err) => {
                self.evict(&entry, &err);
                Err(Error::Delivery(err))
            }
        }
    }

    /// Remove a subscription.
    ///
    /// A delivery already running to this subscriber finishes; none starts
    /// after this returns.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> Result<()> {
        let entry = self.subscriptions.write().remove(&subscription_id);

        let Some(entry) = entry else {
            return Err(Error::SubscriptionNotFound(subscription_id));
        };
        entry.deactivate();

        let info = entry.info();
        debug!(
            subscription_id = %subscription_id,
            client = %info.label,
            events_sent = info.events_sent,
            "subscription removed"
        );

        Ok(())
    }

    /// Deliver a notification to every subscriber seeded before it.
    pub async fn dispatch(&self, notification: &Notification) -> DispatchReport {
        // Subscribers whose snapshot already contains this version are skipped.
        let targets: Vec<Arc<SubscriptionEntry>> = self
            .subscriptions
            .read()
            .values()
            .filter(|entry| entry.start_version < notification.version)
            .cloned()
            .collect();

        if targets.is_empty() {
            return DispatchReport::default();
        }

        let outcomes = join_all(
            targets
                .iter()
                .map(|entry| self.deliver_change(entry, notification)),
        )
        .await;

        let mut report = DispatchReport::default();
        for (entry, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Skipped => report.skipped += 1,
                Delivery::Failed(err) => {
                    self.evict(entry, &err);
                    report.failed.push(entry.id);
                }
            }
        }

        trace!(
            key = %notification.key,
            kind = %notification.kind,
            version = notification.version,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed.len(),
            "notification dispatched"
        );

        report
    }

    async fn deliver_change(&self, entry: &SubscriptionEntry, notification: &Notification) -> Delivery {
        let _turn = entry.delivery.lock().await;

        let outcome = self.deliver(entry, Payload::Change(notification)).await;
        if let Delivery::Delivered = outcome {
            entry.record_event();
        }
        outcome
    }

    /// Attempt a delivery up to the retry budget.
    ///
    /// Every attempt, retries included, starts only while the subscription
    /// is still active.
    async fn deliver(&self, entry: &SubscriptionEntry, payload: Payload<'_>) -> Delivery {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if !entry.is_active() {
                return Delivery::Skipped;
            }

            match tokio::time::timeout(self.timeout, payload.send_to(entry.subscriber.as_ref())).await {
                Ok(Ok(())) => {
                    self.stats.record_delivery();
                    return Delivery::Delivered;
                }
                Ok(Err(err)) => {
                    self.stats.record_delivery_failure();
                    warn!(
                        subscription_id = %entry.id,
                        client = %entry.label,
                        payload = payload.name(),
                        attempt,
                        error = %err,
                        "delivery attempt failed"
                    );
                    last_error = Some(err);
                }
                Err(_) => {
                    self.stats.record_delivery_failure();
                    warn!(
                        subscription_id = %entry.id,
                        client = %entry.label,
                        payload = payload.name(),
                        attempt,
                        timeout_ms = self.timeout_ms(),
                        "delivery attempt timed out"
                    );
                    last_error = None;
                }
            }
        }

        Delivery::Failed(match last_error {
            Some(err) => DeliveryError::Failed {
                subscription: entry.id,
                attempts: self.max_attempts,
                reason: err.to_string(),
            },
            None => DeliveryError::TimedOut {
                subscription: entry.id,
                attempts: self.max_attempts,
                timeout_ms: self.timeout_ms(),
            },
        })
    }

    /// Drop a subscriber that exhausted its retry budget.
    fn evict(&self, entry: &SubscriptionEntry, err: &DeliveryError) {
        if !entry.deactivate() {
            return;
        }
        self.subscriptions.write().remove(&entry.id);
        self.stats.record_auto_unsubscribe();

        warn!(
            subscription_id = %entry.id,
            client = %entry.label,
            error = %err,
            "subscriber auto-unsubscribed"
        );
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Get the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Get a subscription by ID.
    pub fn get_subscription(&self, subscription_id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.subscriptions
            .read()
            .get(&subscription_id)
            .map(|entry| entry.info())
    }

    /// All active subscriptions, ordered by handle.
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .subscriptions
            .read()
            .values()
            .map(|entry| entry.info())
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Remove all subscriptions for a client. Returns how many were removed.
    pub fn remove_client_subscriptions(&self, label: &str) -> usize {
        let to_remove: Vec<SubscriptionId> = self
            .subscriptions
            .read()
            .values()
            .filter(|entry| entry.label == label)
            .map(|entry| entry.id)
            .collect();

        to_remove
            .into_iter()
            .filter(|&id| self.unsubscribe(id).is_ok())
            .count()
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<SubscriptionEntry>> =
            self.subscriptions.write().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.deactivate();
        }
        drained.len()
    }
}
