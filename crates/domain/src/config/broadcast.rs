use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Status push throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Minimum spacing between non-urgent status pushes.
    #[serde(default = "d_interval")]
    pub interval_ms: u64,
    /// Per-subscriber queue depth before messages are skipped for that subscriber.
    #[serde(default = "d_queue")]
    pub subscriber_queue: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: d_interval(),
            subscriber_queue: d_queue(),
        }
    }
}

impl BroadcastConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn d_interval() -> u64 {
    1_000
}
fn d_queue() -> usize {
    32
}
