//! Capability port - the boundary into an isolated execution context.
//!
//! The worker never runs task logic itself. It asks an [`Isolation`] provider
//! to materialise a context for a code location + entry point, then drives the
//! context's [`Capability`]:
//!
//! 1. `set_task_storage` injects the task's key/value slot
//! 2. `perform` dispatches the opaque parameters (no built-in timeout)
//! 3. `take_task_storage` harvests the slot, possibly mutated
//!
//! # Implementations
//! - `ProcessIsolation`: one child process per context
//! - `InProcessIsolation`: entry points registered as factories

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{PerformResult, TaskStorage};
use crate::error::FerryError;

#[async_trait]
pub trait Capability: Send {
    /// Run the task logic once. An `Err` is a fault in the capability itself,
    /// not a task outcome.
    async fn perform(&mut self, parameters: &str) -> Result<PerformResult, FerryError>;

    fn set_task_storage(&mut self, storage: TaskStorage);

    fn take_task_storage(&mut self) -> TaskStorage;
}

/// A live isolated context.
#[async_trait]
pub trait IsolatedContext: Send {
    fn name(&self) -> &str;

    fn capability(&mut self) -> &mut dyn Capability;

    /// One teardown attempt. Errors are treated as transient by the caller,
    /// which decides whether to try again.
    async fn teardown(&mut self) -> Result<(), FerryError>;
}

#[async_trait]
pub trait Isolation: Send + Sync {
    /// Create a fresh context called `name` hosting `entry_point` from the
    /// already-resolved `location`.
    async fn load(
        &self,
        location: &Path,
        entry_point: &str,
        name: &str,
    ) -> Result<Box<dyn IsolatedContext>, FerryError>;
}
