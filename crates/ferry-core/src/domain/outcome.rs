//! Dispatch results reported by the execution capability.

use serde::{Deserialize, Serialize};

/// Tri-state result of one dispatch.
///
/// - `Success`: the task is done.
/// - `Failure`: recoverable; the recycling policy may re-queue it.
/// - `CriticalFailure`: unrecoverable; always lands on the failed list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    CriticalFailure,
}

/// What one dispatch produced. Read-only to the worker loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformResult {
    pub outcome: Outcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Opaque diagnostic payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl PerformResult {
    pub fn success() -> Self {
        Self {
            outcome: Outcome::Success,
            reason: None,
            data: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure,
            reason: Some(reason.into()),
            data: None,
        }
    }

    pub fn critical_failure(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::CriticalFailure,
            reason: Some(reason.into()),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Reason to record on the task; falls back to the outcome name.
    pub fn reason_or_default(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| format!("{:?}", self.outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_as_variant_names() {
        let s = serde_json::to_string(&Outcome::CriticalFailure).unwrap();
        assert_eq!(s, "\"CriticalFailure\"");
    }

    #[test]
    fn result_parses_without_optional_fields() {
        let r: PerformResult = serde_json::from_str(r#"{"outcome":"Success"}"#).unwrap();
        assert_eq!(r, PerformResult::success());
    }

    #[test]
    fn data_is_carried_on_the_wire() {
        let r = PerformResult::failure("rate limited")
            .with_data(serde_json::json!({"retry_after": 30}));
        let line = serde_json::to_string(&r).unwrap();
        assert!(line.contains("\"retry_after\":30"));

        let back: PerformResult = serde_json::from_str(&line).unwrap();
        assert_eq!(back.data, Some(serde_json::json!({"retry_after": 30})));
        assert_eq!(back.reason.as_deref(), Some("rate limited"));
    }

    #[test]
    fn reason_falls_back_to_outcome_name() {
        let r = PerformResult {
            outcome: Outcome::Failure,
            reason: None,
            data: None,
        };
        assert_eq!(r.reason_or_default(), "Failure");
        assert_eq!(PerformResult::failure("nope").reason_or_default(), "nope");
    }
}
