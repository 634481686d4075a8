//! Domain model: ids, task records, dispatch outcomes, queue naming.

pub mod ids;
pub mod outcome;
pub mod queue_name;
pub mod task;

pub use ids::TaskId;
pub use outcome::{Outcome, PerformResult};
pub use queue_name::{DEFAULT_KEY_PREFIX, QueueName};
pub use task::{TaskRecord, TaskStatus, TaskStorage};
