/// What the relay should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    Retry { consecutive: u32 },
    /// The same error hit the threshold; in-process recovery is over.
    Fatal { consecutive: u32 },
}

/// Counts consecutive identical relay failures.
///
/// A different message restarts the count at 1; any success resets it.
#[derive(Debug, Clone)]
pub struct CameraFailureTracker {
    threshold: u32,
    last_error: Option<String>,
    consecutive: u32,
}

impl CameraFailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_error: None,
            consecutive: 0,
        }
    }

    pub fn record(&mut self, message: &str) -> FailureVerdict {
        if self.last_error.as_deref() == Some(message) {
            self.consecutive += 1;
        } else {
            self.last_error = Some(message.to_owned());
            self.consecutive = 1;
        }
        if self.consecutive >= self.threshold {
            FailureVerdict::Fatal {
                consecutive: self.consecutive,
            }
        } else {
            FailureVerdict::Retry {
                consecutive: self.consecutive,
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_error = None;
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_failures_reach_fatal_at_threshold() {
        let mut t = CameraFailureTracker::new(3);
        assert_eq!(t.record("refused"), FailureVerdict::Retry { consecutive: 1 });
        assert_eq!(t.record("refused"), FailureVerdict::Retry { consecutive: 2 });
        assert_eq!(t.record("refused"), FailureVerdict::Fatal { consecutive: 3 });
    }

    #[test]
    fn differing_messages_restart_the_count() {
        let mut t = CameraFailureTracker::new(3);
        t.record("refused");
        assert_eq!(t.record("timed out"), FailureVerdict::Retry { consecutive: 1 });
        assert_eq!(t.record("refused"), FailureVerdict::Retry { consecutive: 1 });
        assert_eq!(t.last_error(), Some("refused"));
    }

    #[test]
    fn success_resets() {
        let mut t = CameraFailureTracker::new(3);
        t.record("refused");
        t.record("refused");
        t.reset();
        assert_eq!(t.consecutive(), 0);
        assert_eq!(t.record("refused"), FailureVerdict::Retry { consecutive: 1 });
    }
}
