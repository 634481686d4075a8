//! QueueClient - task reservation state machine
//!
//! ```text
//!            reserve (pending head)
//!   Ready ─────────────────────────────▶ Reserved(task)
//!     ▲                                     │
//!     └── succeed / fail / critical_fail ◀──┘
//! ```
//!
//! - One reservation per client instance; a second `reserve` is a protocol
//!   violation.
//! - Every outcome writes the task to its destination list first and only
//!   then returns to `Ready`. A failed store write leaves the reservation in
//!   place so the caller can still settle it.
//! - Dropping a client while `Reserved` fails the task with
//!   [`SERVICE_STOPPING`] on a best-effort basis; prefer [`QueueClient::close`].

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::counts::QueueCounts;
use super::recycle::{RecycleDecision, RecyclePolicy};
use super::session::ClientSession;
use crate::config::QueueConfig;
use crate::domain::{DEFAULT_KEY_PREFIX, QueueName, TaskRecord};
use crate::error::{FerryError, Result};
use crate::ports::{Clock, IdGenerator, ListStore, SystemClock, UlidGenerator};

/// Published on the queue channel by every enqueue.
pub const TASK_AVAILABLE: &str = "task available";

/// Failure reason used when a reservation is abandoned by shutdown.
pub const SERVICE_STOPPING: &str = "service stopping";

pub struct QueueClient {
    store: Arc<dyn ListStore>,
    policy: RecyclePolicy,
    purge_successful: bool,
    key_prefix: String,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    session: ClientSession,
}

impl QueueClient {
    pub fn new(store: Arc<dyn ListStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            policy: RecyclePolicy::from_config(config),
            purge_successful: config.purge_successful,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            session: ClientSession::Ready,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn derive(&self, queue: &str) -> Result<QueueName> {
        QueueName::derive_with_prefix(&self.key_prefix, queue)
    }

    // ---- producer side ----------------------------------------------------

    /// Build a pending record with a fresh id, stamped by this client's clock.
    pub fn new_task(&self, queue: impl Into<String>, parameters: impl Into<String>) -> TaskRecord {
        TaskRecord::new(
            self.ids.generate_task_id(),
            queue,
            parameters,
            self.clock.now(),
        )
    }

    /// Append to the pending tail and publish a wake-up hint. Allowed in any
    /// session state.
    pub async fn enqueue(&self, task: &TaskRecord) -> Result<()> {
        if task.queue.trim().is_empty() {
            return Err(FerryError::NoQueueSpecified);
        }
        let names = self.derive(&task.queue)?;

        let entry = serde_json::to_string(task)?;
        self.store.push_tail(names.pending(), &entry).await?;
        self.store.publish(names.channel(), TASK_AVAILABLE).await?;

        debug!(queue = %names, task_id = %task.id, "enqueued task");
        Ok(())
    }

    // ---- state machine ----------------------------------------------------

    pub fn is_reserved(&self) -> bool {
        self.session.is_reserved()
    }

    pub fn current_task(&self) -> Option<&TaskRecord> {
        self.session.current_task()
    }

    /// Mutable access to the reserved task, e.g. to write harvested storage
    /// back before settling it.
    pub fn current_task_mut(&mut self) -> Option<&mut TaskRecord> {
        self.session.current_task_mut()
    }

    /// Pop the head of the pending list. Never waits: an empty list is
    /// [`FerryError::QueueIsEmpty`].
    pub async fn reserve(&mut self, queue: &str) -> Result<TaskRecord> {
        if self.session.is_reserved() {
            return Err(FerryError::TaskAlreadyReserved);
        }
        if queue.trim().is_empty() {
            return Err(FerryError::NoQueueSpecified);
        }
        let names = self.derive(queue)?;

        let Some(entry) = self.store.pop_head(names.pending()).await? else {
            return Err(FerryError::QueueIsEmpty);
        };

        let task: TaskRecord = match serde_json::from_str(&entry) {
            Ok(task) => task,
            Err(e) => {
                // keep the bytes somewhere visible instead of dropping them
                warn!(queue = %names, error = %e, "undecodable pending entry moved to failed list");
                self.store.push_tail(names.failed(), &entry).await?;
                return Err(e.into());
            }
        };

        debug!(queue = %names, task_id = %task.id, retries = task.retries, "reserved task");
        self.session = ClientSession::Reserved(task.clone());
        Ok(task)
    }

    pub async fn succeed(&mut self) -> Result<()> {
        let mut task = self.reserved_copy()?;
        let names = self.derive(&task.queue)?;
        task.mark_succeeded(self.clock.now());

        if self.purge_successful {
            debug!(queue = %names, task_id = %task.id, "task succeeded (purged)");
        } else {
            let entry = serde_json::to_string(&task)?;
            self.store.push_tail(names.succeeded(), &entry).await?;
            debug!(queue = %names, task_id = %task.id, "task succeeded");
        }

        self.session.release();
        Ok(())
    }

    /// Fail the reserved task, recycling it when the policy allows.
    pub async fn fail(&mut self, reason: &str) -> Result<()> {
        self.settle_failure(reason, true).await
    }

    /// Fail the reserved task straight to the failed list.
    pub async fn critical_fail(&mut self, reason: &str) -> Result<()> {
        self.settle_failure(reason, false).await
    }

    async fn settle_failure(&mut self, reason: &str, recycle: bool) -> Result<()> {
        let mut task = self.reserved_copy()?;
        let list = self.route_failure(&mut task, reason, recycle)?;

        let entry = serde_json::to_string(&task)?;
        self.store.push_tail(&list, &entry).await?;

        self.session.release();
        Ok(())
    }

    /// Apply the failure to `task` and return the list it belongs on.
    fn route_failure(&self, task: &mut TaskRecord, reason: &str, recycle: bool) -> Result<String> {
        let names = self.derive(&task.queue)?;
        task.mark_failed(reason, self.clock.now());

        let decision = if recycle {
            self.policy.decide(task.retries)
        } else {
            RecycleDecision::Fail
        };

        match decision {
            RecycleDecision::Requeue => {
                task.increment_retries(self.policy.max_retries);
                info!(
                    queue = %names,
                    task_id = %task.id,
                    retries = task.retries,
                    reason,
                    "task failed, recycled to pending"
                );
                Ok(names.pending().to_string())
            }
            RecycleDecision::Fail => {
                warn!(
                    queue = %names,
                    task_id = %task.id,
                    retries = task.retries,
                    critical = !recycle,
                    reason,
                    "task failed"
                );
                Ok(names.failed().to_string())
            }
        }
    }

    fn reserved_copy(&self) -> Result<TaskRecord> {
        self.session
            .current_task()
            .cloned()
            .ok_or(FerryError::NoTaskReserved)
    }

    /// Shut the client down, failing any outstanding reservation with
    /// [`SERVICE_STOPPING`].
    pub async fn close(mut self) -> Result<()> {
        if self.session.is_reserved() {
            self.fail(SERVICE_STOPPING).await?;
        }
        Ok(())
    }

    // ---- maintenance ------------------------------------------------------

    /// Remove every entry equal to `task` from the three lists of its queue
    /// and return how many were removed.
    ///
    /// Each list is drained and rewritten without the matches. Entries pushed
    /// or popped by someone else while this runs can be reordered or lost, so
    /// only call this while nothing else writes to the queue.
    pub async fn remove_task(&self, task: &TaskRecord) -> Result<usize> {
        let names = self.derive(&task.queue)?;
        let mut removed = 0;

        for list in names.lists() {
            let mut kept = Vec::new();
            while let Some(entry) = self.store.pop_head(list).await? {
                match serde_json::from_str::<TaskRecord>(&entry) {
                    Ok(candidate) if candidate == *task => removed += 1,
                    _ => kept.push(entry),
                }
            }
            for entry in &kept {
                self.store.push_tail(list, entry).await?;
            }
        }

        info!(queue = %names, task_id = %task.id, removed, "removed task");
        Ok(removed)
    }

    // ---- read queries -----------------------------------------------------

    pub async fn pending_tasks(&self, queue: &str) -> Result<Vec<TaskRecord>> {
        let names = self.derive(queue)?;
        self.read_list(names.pending()).await
    }

    pub async fn failed_tasks(&self, queue: &str) -> Result<Vec<TaskRecord>> {
        let names = self.derive(queue)?;
        self.read_list(names.failed()).await
    }

    pub async fn succeeded_tasks(&self, queue: &str) -> Result<Vec<TaskRecord>> {
        let names = self.derive(queue)?;
        self.read_list(names.succeeded()).await
    }

    /// Union of the three lists. No ordering is promised across lists.
    pub async fn all_tasks(&self, queue: &str) -> Result<Vec<TaskRecord>> {
        let names = self.derive(queue)?;
        let mut tasks = Vec::new();
        for list in names.lists() {
            tasks.extend(self.read_list(list).await?);
        }
        Ok(tasks)
    }

    /// Distinct logical queue names that currently hold any entries.
    pub async fn all_queues(&self) -> Result<Vec<String>> {
        let keys = self.store.keys(&format!("{}:", self.key_prefix)).await?;
        let names: BTreeSet<String> = keys
            .iter()
            .filter_map(|key| QueueName::logical_name(&self.key_prefix, key))
            .map(str::to_string)
            .collect();
        Ok(names.into_iter().collect())
    }

    pub async fn pending_count(&self, queue: &str) -> Result<usize> {
        let names = self.derive(queue)?;
        Ok(self.store.list_len(names.pending()).await?)
    }

    pub async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let names = self.derive(queue)?;
        Ok(QueueCounts {
            pending: self.store.list_len(names.pending()).await?,
            failed: self.store.list_len(names.failed()).await?,
            succeeded: self.store.list_len(names.succeeded()).await?,
        })
    }

    async fn read_list(&self, list: &str) -> Result<Vec<TaskRecord>> {
        let entries = self.store.range(list).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!(list, error = %e, "skipping undecodable entry");
                    None
                }
            })
            .collect())
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        let Some(mut task) = self.session.release() else {
            return;
        };

        let routed = self
            .route_failure(&mut task, SERVICE_STOPPING, true)
            .and_then(|list| Ok((list, serde_json::to_string(&task)?)));
        let (list, entry) = match routed {
            Ok(routed) => routed,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "could not fail reservation on drop");
                return;
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                handle.spawn(async move {
                    if let Err(e) = store.push_tail(&list, &entry).await {
                        warn!(list, error = %e, "could not fail reservation on drop");
                    }
                });
            }
            Err(_) => {
                warn!(task_id = %task.id, "client dropped outside a runtime; reservation lost");
            }
        }
    }
}
