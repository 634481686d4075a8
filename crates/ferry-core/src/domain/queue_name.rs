//! Queue naming: one logical name, four derived store identifiers.

use std::fmt;

use crate::error::FerryError;

/// Default namespace for every key ferry writes.
pub const DEFAULT_KEY_PREFIX: &str = "ferry";

const PENDING_SUFFIX: &str = ":pending";
const FAILED_SUFFIX: &str = ":failed";
const SUCCEEDED_SUFFIX: &str = ":succeeded";
const CHANNEL_SUFFIX: &str = ":notify";

/// The derived identifiers for a logical queue.
///
/// For prefix `ferry` and name `jobs`:
/// - pending: `ferry:jobs:pending`
/// - failed: `ferry:jobs:failed`
/// - succeeded: `ferry:jobs:succeeded`
/// - channel: `ferry:jobs:notify`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName {
    name: String,
    pending: String,
    failed: String,
    succeeded: String,
    channel: String,
}

impl QueueName {
    /// Derive with the default key prefix.
    pub fn derive(name: &str) -> Result<Self, FerryError> {
        Self::derive_with_prefix(DEFAULT_KEY_PREFIX, name)
    }

    /// Blank (empty or whitespace-only) names are rejected.
    pub fn derive_with_prefix(prefix: &str, name: &str) -> Result<Self, FerryError> {
        if name.trim().is_empty() {
            return Err(FerryError::InvalidQueueName);
        }
        let base = format!("{prefix}:{name}");
        Ok(Self {
            name: name.to_string(),
            pending: format!("{base}{PENDING_SUFFIX}"),
            failed: format!("{base}{FAILED_SUFFIX}"),
            succeeded: format!("{base}{SUCCEEDED_SUFFIX}"),
            channel: format!("{base}{CHANNEL_SUFFIX}"),
        })
    }

    /// Recover the logical name from a derived list key, if `key` is one.
    pub fn logical_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(prefix)?.strip_prefix(':')?;
        [PENDING_SUFFIX, FAILED_SUFFIX, SUCCEEDED_SUFFIX]
            .iter()
            .find_map(|suffix| rest.strip_suffix(suffix))
            .filter(|name| !name.is_empty())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn failed(&self) -> &str {
        &self.failed
    }

    pub fn succeeded(&self) -> &str {
        &self.succeeded
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The three task lists, in pending/failed/succeeded order.
    pub fn lists(&self) -> [&str; 3] {
        [&self.pending, &self.failed, &self.succeeded]
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn derives_four_identifiers() {
        let q = QueueName::derive("jobs").unwrap();
        assert_eq!(q.pending(), "ferry:jobs:pending");
        assert_eq!(q.failed(), "ferry:jobs:failed");
        assert_eq!(q.succeeded(), "ferry:jobs:succeeded");
        assert_eq!(q.channel(), "ferry:jobs:notify");
    }

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(QueueName::derive("jobs").unwrap(), QueueName::derive("jobs").unwrap());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn blank_names_are_invalid(#[case] name: &str) {
        assert!(matches!(
            QueueName::derive(name),
            Err(FerryError::InvalidQueueName)
        ));
    }

    #[rstest]
    #[case("ferry:jobs:pending", Some("jobs"))]
    #[case("ferry:a:b:failed", Some("a:b"))]
    #[case("ferry:jobs:notify", None)]
    #[case("other:jobs:pending", None)]
    #[case("ferry::pending", None)]
    fn logical_name_from_key(#[case] key: &str, #[case] expected: Option<&str>) {
        assert_eq!(QueueName::logical_name("ferry", key), expected);
    }
}
