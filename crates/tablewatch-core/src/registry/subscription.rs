//! Subscription tracking.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::subscriber::Subscriber;

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw id.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered subscriber.
///
/// `delivery` serializes deliveries to this subscriber; it is held from
/// registration until the initial snapshot has been delivered.
pub(crate) struct SubscriptionEntry {
    pub(crate) id: SubscriptionId,
    pub(crate) label: String,
    pub(crate) subscriber: Arc<dyn Subscriber>,
    /// Snapshot version the subscriber was seeded with.
    pub(crate) start_version: u64,
    pub(crate) delivery: Arc<Mutex<()>>,
    active: AtomicBool,
    created_at: Instant,
    events_sent: AtomicU64,
}

impl SubscriptionEntry {
    pub(crate) fn new(
        id: SubscriptionId,
        label: impl Into<String>,
        subscriber: Arc<dyn Subscriber>,
        start_version: u64,
        delivery: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            subscriber,
            start_version,
            delivery,
            active: AtomicBool::new(true),
            created_at: Instant::now(),
            events_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if this call flipped the entry to inactive.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_event(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            label: self.label.clone(),
            start_version: self.start_version,
            age: self.created_at.elapsed(),
            events_sent: self.events_sent.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("start_version", &self.start_version)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Read-only view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Subscription handle.
    pub id: SubscriptionId,
    /// Client label given at subscribe time.
    pub label: String,
    /// Snapshot version delivered as the initial state.
    pub start_version: u64,
    /// Time since the subscription was created.
    pub age: Duration,
    /// Notifications delivered so far.
    pub events_sent: u64,
}
