//! Client session: Ready or Reserved(task).
//!
//! Holding the task inside the `Reserved` variant keeps "current task is set
//! iff a reservation is outstanding" true by construction.

use crate::domain::TaskRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClientSession {
    #[default]
    Ready,
    Reserved(TaskRecord),
}

impl ClientSession {
    pub fn is_reserved(&self) -> bool {
        matches!(self, ClientSession::Reserved(_))
    }

    pub fn current_task(&self) -> Option<&TaskRecord> {
        match self {
            ClientSession::Reserved(task) => Some(task),
            ClientSession::Ready => None,
        }
    }

    pub fn current_task_mut(&mut self) -> Option<&mut TaskRecord> {
        match self {
            ClientSession::Reserved(task) => Some(task),
            ClientSession::Ready => None,
        }
    }

    /// Back to `Ready`, handing out the task that was held (if any).
    pub fn release(&mut self) -> Option<TaskRecord> {
        match std::mem::take(self) {
            ClientSession::Reserved(task) => Some(task),
            ClientSession::Ready => None,
        }
    }
}
