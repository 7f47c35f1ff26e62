//! Hub configuration.

use std::time::Duration;

/// Default number of delivery attempts before a subscriber is dropped.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 3;

/// Default per-attempt delivery timeout in milliseconds.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 5_000;

/// Default capacity of in-process change source channels.
pub const DEFAULT_SOURCE_BUFFER: usize = 1024;

/// Notification hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Immediate delivery attempts per subscriber before it is auto-unsubscribed.
    pub max_delivery_attempts: u32,

    /// Upper bound on a single delivery attempt.
    pub delivery_timeout: Duration,

    /// Capacity of change source channels.
    pub source_buffer: usize,
}

impl HubConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            source_buffer: DEFAULT_SOURCE_BUFFER,
        }
    }

    /// Set the delivery attempt budget (at least one attempt is always made).
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts.max(1);
        self
    }

    /// Set the per-attempt delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set the change source channel capacity.
    pub fn with_source_buffer(mut self, buffer: usize) -> Self {
        self.source_buffer = buffer.max(1);
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}
