use std::time::Duration;

use tokio::time::Instant;

/// Admits at most one frame per `min_interval`; everything in between is
/// dropped rather than queued.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval: Duration,
    last_accepted: Option<Instant>,
}

impl FrameThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_accepted {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }
}
