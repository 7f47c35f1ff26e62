//! tablewatch core - snapshot reconciliation and change notification fan-out.
//!
//! A change source feeds row-change events into a [`NotificationHub`]. The hub
//! reconciles each event against an in-memory [`SnapshotStore`] and fans real
//! state transitions out to subscribers through the [`SubscriberRegistry`].
//! Duplicates and no-ops are absorbed by the snapshot, so subscribers only see
//! actual transitions.

pub mod config;
pub mod error;
pub mod event;
pub mod hub;
pub mod registry;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod value;

pub use config::HubConfig;
pub use error::{DeliveryError, Error, InputError, Result, SourceError, StateError};
pub use event::{Change, ChangeEvent, ChangeKind, Notification};
pub use hub::{EventOutcome, NotificationHub, SharedHub};
pub use registry::{
    ChannelSubscriber, DispatchReport, FnSubscriber, SessionUpdate, Subscriber, SubscriberError,
    SubscriberRegistry, SubscriptionId, SubscriptionInfo,
};
pub use snapshot::{Reconciled, SnapshotStore};
pub use source::{
    channel, start_pump, ChangeSource, ChannelSource, JsonLinesSource, PumpReport, SourceHandle,
    SourcePump, StopReason,
};
pub use stats::{HubStats, HubStatsSnapshot};
pub use value::{Row, Value};
