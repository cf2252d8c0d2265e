//! Failover cursor over discovered printers.

use pr_device::DiscoveredDevice;
use serde::Serialize;

/// What the auto-connect loop does after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverStep {
    /// Try the same candidate again.
    Retry { attempt: u32 },
    /// The cursor moved to the candidate at `index`.
    Advance { index: usize },
    /// Every candidate used its budget; the list is cleared.
    Exhausted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateList {
    candidates: Vec<DiscoveredDevice>,
    current_index: usize,
    consecutive_failures: u32,
    #[serde(skip)]
    retries_per_candidate: u32,
}

impl CandidateList {
    pub fn new(retries_per_candidate: u32) -> Self {
        Self {
            candidates: Vec::new(),
            current_index: 0,
            consecutive_failures: 0,
            retries_per_candidate: retries_per_candidate.max(1),
        }
    }

    /// Install a fresh discovery result; proxies are never candidates.
    pub fn replace(&mut self, found: Vec<DiscoveredDevice>) {
        self.candidates = found.into_iter().filter(|d| !d.is_proxy).collect();
        self.current_index = 0;
        self.consecutive_failures = 0;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn current(&self) -> Option<&DiscoveredDevice> {
        self.candidates.get(self.current_index)
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) -> FailoverStep {
        self.consecutive_failures += 1;
        if self.consecutive_failures < self.retries_per_candidate {
            return FailoverStep::Retry {
                attempt: self.consecutive_failures,
            };
        }
        self.consecutive_failures = 0;
        self.current_index += 1;
        if self.current_index >= self.candidates.len() {
            self.clear();
            FailoverStep::Exhausted
        } else {
            FailoverStep::Advance {
                index: self.current_index,
            }
        }
    }
}
