//! Strongly-typed identifiers used across the domain.

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InboxError;

/// Identifier of a source message (a Discord snowflake).
///
/// Snowflakes are decimal strings that grow with time, so ordering compares
/// digit count first and then lexicographically. Ascending order is
/// chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_snowflakes(&self.0, &other.0)
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for MessageId {
    type Err = InboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InboxError::integrity("MessageId: empty"));
        }
        Ok(Self(s.to_string()))
    }
}

/// Numeric-string comparison generalized for variable digit counts.
pub fn compare_snowflakes(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn shorter_ids_sort_first() {
        assert_eq!(compare_snowflakes("99", "100"), Ordering::Less);
        assert_eq!(compare_snowflakes("200", "100"), Ordering::Greater);
        assert_eq!(compare_snowflakes("123", "123"), Ordering::Equal);
    }

    #[test]
    fn sorting_ids_is_chronological() {
        let mut ids: Vec<MessageId> = ["300", "100", "200", "1000"]
            .into_iter()
            .map(MessageId::from)
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(MessageId::as_str).collect();
        assert_eq!(sorted, vec!["100", "200", "300", "1000"]);
    }

    #[test]
    fn blank_id_is_rejected() {
        assert!("  ".parse::<MessageId>().is_err());
        assert_eq!("42".parse::<MessageId>().unwrap().as_str(), "42");
    }

    proptest! {
        #[test]
        fn ordering_matches_numeric_ordering(a in 1u64..u64::MAX, b in 1u64..u64::MAX) {
            let left = MessageId::new(a.to_string());
            let right = MessageId::new(b.to_string());
            prop_assert_eq!(left.cmp(&right), a.cmp(&b));
        }
    }
}
