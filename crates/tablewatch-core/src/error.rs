//! Error types for the notification core.

use thiserror::Error;

use crate::event::ChangeKind;
use crate::registry::SubscriptionId;

/// A change event that cannot be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Neither the event nor its row images carry a usable key.
    #[error("change event has no key")]
    MissingKey,

    /// Inserted/Updated events must carry the new row image.
    #[error("{kind} event for key {key:?} is missing its new row image")]
    MissingRowImage {
        /// Declared event kind.
        kind: ChangeKind,
        /// Event key.
        key: String,
    },

    /// A row image names a different key than the event.
    #[error("row image key {row_key:?} does not match event key {event_key:?}")]
    KeyMismatch {
        /// Key resolved for the event.
        event_key: String,
        /// Key carried by the offending row image.
        row_key: String,
    },
}

/// A subscriber could not take a delivery within the retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The subscriber callback returned an error on every attempt.
    #[error("delivery to subscription {subscription} failed after {attempts} attempt(s): {reason}")]
    Failed {
        /// Target subscription.
        subscription: SubscriptionId,
        /// Attempts made.
        attempts: u32,
        /// Last error reported by the subscriber.
        reason: String,
    },

    /// The last attempt exceeded the delivery timeout.
    #[error("delivery to subscription {subscription} timed out after {attempts} attempt(s) ({timeout_ms}ms each)")]
    TimedOut {
        /// Target subscription.
        subscription: SubscriptionId,
        /// Attempts made.
        attempts: u32,
        /// Per-attempt timeout.
        timeout_ms: u64,
    },
}

/// An internal invariant of the snapshot was violated.
///
/// These indicate a logic bug and are surfaced to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The same key occupies two slots of the insertion order.
    #[error("key {0:?} appears more than once in the snapshot")]
    DuplicateKey(String),

    /// The insertion order references a key that has no row.
    #[error("snapshot order index references missing key {0:?}")]
    OrderIndexCorrupted(String),
}

/// Failure reading from a change source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A feed record could not be decoded into a change event.
    #[error("line {line}: cannot decode change event: {reason}")]
    Decode {
        /// 1-based line number in the feed.
        line: u64,
        /// Decoder message.
        reason: String,
    },

    /// The underlying reader failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level error for hub operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed change event.
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Subscriber delivery failure.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Snapshot invariant violation.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Change source failure.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Unknown subscription handle.
    #[error("subscription {0} not found")]
    SubscriptionNotFound(SubscriptionId),

    /// The hub no longer accepts events or subscriptions.
    #[error("notification hub is shut down")]
    ShutDown,
}

impl Error {
    /// Returns true if processing can continue with the next event or subscriber.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Input(_) | Error::Delivery(_) | Error::SubscriptionNotFound(_) => true,
            Error::Source(e) => matches!(e, SourceError::Decode { .. }),
            Error::State(_) | Error::ShutDown => false,
        }
    }
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_error_messages() {
        let err = InputError::MissingRowImage {
            kind: ChangeKind::Updated,
            key: "Rome".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("updated"));
        assert!(msg.contains("Rome"));

        let err = InputError::KeyMismatch {
            event_key: "Rome".to_string(),
            row_key: "Oslo".to_string(),
        };
        assert!(err.to_string().contains("Oslo"));
    }

    #[test]
    fn test_delivery_error_message() {
        let err = DeliveryError::TimedOut {
            subscription: SubscriptionId::from_raw(7),
            attempts: 3,
            timeout_ms: 250,
        };
        let msg = err.to_string();
        assert!(msg.contains("sub-7"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn test_recoverability() {
        let err: Error = InputError::MissingKey.into();
        assert!(err.is_recoverable());

        let err: Error = StateError::DuplicateKey("Rome".to_string()).into();
        assert!(!err.is_recoverable());

        let err: Error = SourceError::Decode {
            line: 3,
            reason: "eof".to_string(),
        }
        .into();
        assert!(err.is_recoverable());

        assert!(!Error::ShutDown.is_recoverable());
    }
}
