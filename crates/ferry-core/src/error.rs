use std::path::PathBuf;

use thiserror::Error;

use crate::ports::StoreError;

pub type Result<T> = std::result::Result<T, FerryError>;

#[derive(Debug, Error)]
pub enum FerryError {
    #[error("invalid queue name: must not be empty")]
    InvalidQueueName,

    #[error("no queue specified")]
    NoQueueSpecified,

    #[error("a task is already reserved by this client")]
    TaskAlreadyReserved,

    #[error("no task is reserved by this client")]
    NoTaskReserved,

    #[error("queue is empty")]
    QueueIsEmpty,

    #[error("sandbox code location not found: {0}")]
    ResourceNotFound(PathBuf),

    #[error("failed to load sandbox: {0}")]
    SandboxLoad(String),

    #[error("duplicate entry point: {0}")]
    DuplicateEntryPoint(String),

    #[error("sandbox teardown failed after {attempts} attempts: {last_error}")]
    SandboxRelease { attempts: u32, last_error: String },

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FerryError {
    /// Caller bugs: surfaced immediately, never retried or swallowed.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            FerryError::InvalidQueueName
                | FerryError::NoQueueSpecified
                | FerryError::TaskAlreadyReserved
                | FerryError::NoTaskReserved
        )
    }

    /// "Nothing to do right now" rather than an error.
    pub fn is_queue_empty(&self) -> bool {
        matches!(self, FerryError::QueueIsEmpty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_protocol_violations() {
        assert!(FerryError::TaskAlreadyReserved.is_protocol_violation());
        assert!(FerryError::NoTaskReserved.is_protocol_violation());
        assert!(!FerryError::QueueIsEmpty.is_protocol_violation());
        assert!(FerryError::QueueIsEmpty.is_queue_empty());
    }

    #[test]
    fn release_error_mentions_attempts() {
        let err = FerryError::SandboxRelease {
            attempts: 3,
            last_error: "busy".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "sandbox teardown failed after 3 attempts: busy"
        );
    }
}
