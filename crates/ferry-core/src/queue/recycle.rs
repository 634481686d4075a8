//! Recycling policy: decides where a failed task goes.

use crate::config::QueueConfig;

/// Where `Fail` routes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecycleDecision {
    /// Back onto the tail of the pending list with one more retry.
    Requeue,
    /// Onto the failed list, retries untouched.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecyclePolicy {
    pub enabled: bool,

    /// 0 = unlimited
    pub max_retries: u32,
}

impl RecyclePolicy {
    pub fn new(enabled: bool, max_retries: u32) -> Self {
        Self {
            enabled,
            max_retries,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.recycle_tasks, config.max_retries)
    }

    pub fn decide(&self, retries: u32) -> RecycleDecision {
        if self.enabled && (self.max_retries == 0 || retries < self.max_retries) {
            RecycleDecision::Requeue
        } else {
            RecycleDecision::Fail
        }
    }
}
