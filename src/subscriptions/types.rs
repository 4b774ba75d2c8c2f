//! Subscription configuration and status types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`SubscriptionManager`](super::SubscriptionManager).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Delay before the first reconnection attempt; doubles per failure.
    /// Default: 1000
    pub base_delay_ms: u64,

    /// Failed reconnection attempts before giving up.
    /// Default: 5
    pub max_attempts: u32,

    /// Grace period after the last subscriber leaves before unsubscribing.
    /// Default: 5000
    pub cleanup_delay_ms: u64,

    /// Default budget for `wait_for_subscription`.
    /// Default: 5000
    pub wait_timeout_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_attempts: 5,
            cleanup_delay_ms: 5000,
            wait_timeout_ms: 5000,
        }
    }
}

impl SubscriptionConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Backoff before reconnection attempt `attempt` (0-indexed):
    /// `base_delay * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Observable state of one subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Handshake in flight.
    Pending,
    /// Remote acknowledged; events are flowing.
    Established,
    /// Stream failed; a backoff loop is re-establishing it.
    Reconnecting { attempts: u32 },
}
