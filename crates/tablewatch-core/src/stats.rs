//! Hub counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Running counters for a notification hub.
///
/// All counters are relaxed atomics; a [`HubStatsSnapshot`] is not a
/// consistent cut across counters.
#[derive(Debug)]
pub struct HubStats {
    started_at: Instant,

    // Source side
    events_received: AtomicU64,
    events_rejected: AtomicU64,
    events_unchanged: AtomicU64,

    // Fan-out side
    notifications_dispatched: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    auto_unsubscribed: AtomicU64,
}

/// Point-in-time copy of [`HubStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStatsSnapshot {
    /// Seconds since the hub started.
    pub uptime_secs: u64,
    /// Events handed to the hub.
    pub events_received: u64,
    /// Events rejected as malformed.
    pub events_rejected: u64,
    /// Events that did not change the snapshot.
    pub events_unchanged: u64,
    /// Notifications handed to the registry.
    pub notifications_dispatched: u64,
    /// Successful deliveries (snapshots and notifications).
    pub deliveries: u64,
    /// Failed or timed-out delivery attempts.
    pub delivery_failures: u64,
    /// Subscribers dropped after exhausting the retry budget.
    pub auto_unsubscribed: u64,
}

impl HubStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            events_unchanged: AtomicU64::new(0),
            notifications_dispatched: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            auto_unsubscribed: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unchanged(&self) {
        self.events_unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self) {
        self.notifications_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_auto_unsubscribe(&self) {
        self.auto_unsubscribed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            events_received: self.events_received.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            events_unchanged: self.events_unchanged.load(Ordering::Relaxed),
            notifications_dispatched: self.notifications_dispatched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            auto_unsubscribed: self.auto_unsubscribed.load(Ordering::Relaxed),
        }
    }
}

impl Default for HubStats {
    fn default() -> Self {
        Self::new()
    }
}
