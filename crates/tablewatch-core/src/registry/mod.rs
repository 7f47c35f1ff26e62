//! Subscriber registry for change notifications.
//!
//! Subscribers are handle-based: `subscribe` hands back a [`SubscriptionId`]
//! and `unsubscribe` takes it back. There is no handler equality to get wrong.

mod manager;
mod subscriber;
mod subscription;

pub use manager::{DispatchReport, SubscriberRegistry};
pub use subscriber::{ChannelSubscriber, FnSubscriber, SessionUpdate, Subscriber, SubscriberError};
pub use subscription::{SubscriptionId, SubscriptionInfo};
