use std::time::Duration;

use serde::{Deserialize, Serialize};
use trinity_types::primitives::BasisPoints;

use crate::retry::RetryPolicy;

/// Configuration for a relayer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Pause between event polls when a watcher is caught up.
    pub poll_interval_ms: u64,
    /// Maximum events read per poll.
    pub event_batch: usize,
    /// Deadline for a single validator proof query.
    pub fetch_timeout_ms: u64,
    /// Deadline for a single submission call.
    pub submit_timeout_ms: u64,
    /// Added on top of the coordinator's fee estimate.
    pub fee_margin: BasisPoints,
    /// Capacity of each bounded queue between tasks.
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            event_batch: 256,
            fetch_timeout_ms: 10_000,
            submit_timeout_ms: 15_000,
            fee_margin: BasisPoints(1_000),
            channel_capacity: 1_024,
            retry: RetryPolicy::default(),
        }
    }
}

impl RelayerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}
