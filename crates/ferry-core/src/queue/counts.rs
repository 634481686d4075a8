use serde::{Deserialize, Serialize};

/// Lengths of the three lists of one queue at a single moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub failed: usize,
    pub succeeded: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.failed + self.succeeded
    }
}
