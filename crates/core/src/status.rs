//! Per-item processing status and its legal transitions.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InboxError;

/// Persisted status of an item record.
///
/// Permanent failure is not a separate status: it is `Failed` with the retry
/// budget exhausted and no next retry scheduled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Seen and recorded, processing not finished yet.
    Pending,
    /// A step before acknowledgment failed.
    Failed,
    /// Content work succeeded, only acknowledgment is missing.
    ReactionPending,
    /// Fully processed and acknowledged.
    Done,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 4] = [
        ItemStatus::Pending,
        ItemStatus::Failed,
        ItemStatus::ReactionPending,
        ItemStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Failed => "failed",
            ItemStatus::ReactionPending => "reaction_pending",
            ItemStatus::Done => "done",
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ItemStatus::Done)
    }

    /// Whether the retry command ever looks at records in this status.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ItemStatus::Failed | ItemStatus::ReactionPending)
    }

    /// Whether `self -> next` is a legal transition.
    ///
    /// Self-transitions of non-done states cover rescheduling and metadata
    /// refreshes; nothing ever leaves `Done`.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (Done, _) => false,
            (Pending, Pending | Done | Failed | ReactionPending) => true,
            (Failed, Failed | Done | ReactionPending) => true,
            (Failed, Pending) => false,
            (ReactionPending, ReactionPending | Done | Failed) => true,
            (ReactionPending, Pending) => false,
        }
    }

    /// Validate a transition, producing an integrity error when illegal.
    pub fn check_transition(&self, next: ItemStatus) -> Result<(), InboxError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(InboxError::integrity(format!(
                "illegal status transition {} -> {}",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

impl core::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = InboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "failed" => Ok(ItemStatus::Failed),
            "reaction_pending" => Ok(ItemStatus::ReactionPending),
            "done" => Ok(ItemStatus::Done),
            other => Err(InboxError::integrity(format!("unknown item status: {other:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in ItemStatus::ALL {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_integrity_error() {
        let err = "archived".parse::<ItemStatus>().unwrap_err();
        assert!(matches!(err, InboxError::Integrity(_)));
    }

    #[test]
    fn done_is_terminal() {
        for next in ItemStatus::ALL {
            assert!(!ItemStatus::Done.can_transition_to(next));
        }
    }

    #[test]
    fn failure_states_never_return_to_pending() {
        assert!(ItemStatus::Failed.check_transition(ItemStatus::Pending).is_err());
        assert!(ItemStatus::ReactionPending.check_transition(ItemStatus::Pending).is_err());
        assert!(ItemStatus::Failed.check_transition(ItemStatus::ReactionPending).is_ok());
        assert!(ItemStatus::ReactionPending.check_transition(ItemStatus::Failed).is_ok());
        assert!(ItemStatus::Pending.check_transition(ItemStatus::Done).is_ok());
    }
}
