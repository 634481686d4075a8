//! Task record: the unit of work plus its lifecycle metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

/// Task-scoped key/value state carried across a single dispatch.
pub type TaskStorage = HashMap<String, String>;

/// Where a task sits in its lifecycle.
///
/// A recycled task goes back onto the pending list still marked `Failed`;
/// the status records the last outcome, the list records the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed,
}

/// A work item as it is stored on the queue lists.
///
/// Created by a producer, mutated only by the client holding the reservation,
/// and never touched again once it lands on a terminal list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,

    /// Logical queue name (must be non-empty to enqueue).
    pub queue: String,

    /// Opaque payload handed to the execution capability.
    pub parameters: String,

    #[serde(default)]
    pub storage: TaskStorage,

    pub status: TaskStatus,

    /// Failure reason from the last `Fail`/`CriticalFail`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Number of times this task has been recycled.
    #[serde(default)]
    pub retries: u32,

    pub created_at: DateTime<Utc>,

    /// Stamped on every terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        queue: impl Into<String>,
        parameters: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            parameters: parameters.into(),
            storage: TaskStorage::new(),
            status: TaskStatus::Pending,
            reason: None,
            retries: 0,
            created_at,
            updated_at: None,
        }
    }

    pub fn with_storage(mut self, storage: TaskStorage) -> Self {
        self.storage = storage;
        self
    }

    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Succeeded;
        self.updated_at = Some(now);
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.reason = Some(reason.into());
        self.updated_at = Some(now);
    }

    /// Bump the retry counter. `max_retries == 0` means unlimited; otherwise
    /// the counter never passes `max_retries`.
    pub fn increment_retries(&mut self, max_retries: u32) {
        if max_retries == 0 || self.retries < max_retries {
            self.retries = self.retries.saturating_add(1);
        }
    }
}
