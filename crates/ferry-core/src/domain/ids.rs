//! Task identifiers.
//!
//! A `TaskId` wraps a ULID: sortable by creation time and generated without
//! coordination, so producers on different hosts can mint ids independently.
//! Displayed with a `task-` prefix, e.g. `task-01HZX3...`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

const PREFIX: &str = "task-";

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Ulid);

impl TaskId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for TaskId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Accepts both the prefixed display form and a bare ULID.
impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(PREFIX).unwrap_or(s);
        Ulid::from_string(raw).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_task_prefix() {
        let id = TaskId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("task-"));
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = TaskId::from_ulid(Ulid::new());
        let prefixed: TaskId = id.to_string().parse().unwrap();
        let bare: TaskId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn rejects_garbage() {
        assert!("task-not-a-ulid".parse::<TaskId>().is_err());
    }
}
