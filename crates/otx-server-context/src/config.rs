//! # Context Configuration
//!
//! Retry, timeout and polling settings for a notary context.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default transport failures tolerated per delivery.
pub const DEFAULT_FAILURE_COUNT_LIMIT: u32 = 3;

/// Notary context configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Transport failures tolerated before a delivery resolves `NotSent`.
    pub failure_count_limit: u32,

    /// Ceiling on a single send, in milliseconds.
    pub send_timeout_ms: u64,

    /// Pause between state-machine ticks in the background driver.
    pub tick_interval_ms: u64,

    /// Push flag passed to the connection.
    pub enable_push: bool,

    /// Receipt downloads per NEEDBOXITEMS tick.
    pub max_box_receipts_per_tick: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            failure_count_limit: DEFAULT_FAILURE_COUNT_LIMIT,
            send_timeout_ms: 30_000,
            tick_interval_ms: 50,
            enable_push: true,
            max_box_receipts_per_tick: 64,
        }
    }
}

impl ContextConfig {
    /// Create a config for testing (short timeouts, no pause between ticks).
    pub fn for_testing() -> Self {
        Self {
            failure_count_limit: DEFAULT_FAILURE_COUNT_LIMIT,
            send_timeout_ms: 500,
            tick_interval_ms: 0,
            enable_push: false,
            max_box_receipts_per_tick: 8,
        }
    }

    /// Send ceiling as a `Duration`.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Tick pause as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
