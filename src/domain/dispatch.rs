//! Per-item dispatch lifecycle

use serde::Serialize;
use std::fmt;

use crate::domain::delta::{ArchiveEntry, DeltaEntry};
use crate::domain::product::ExternalKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Archive,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Archive => "archive",
        })
    }
}

/// One unit of remote work
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Create(DeltaEntry),
    Update(DeltaEntry),
    Archive(ArchiveEntry),
}

impl Mutation {
    pub const fn kind(&self) -> MutationKind {
        match self {
            Self::Create(_) => MutationKind::Create,
            Self::Update(_) => MutationKind::Update,
            Self::Archive(_) => MutationKind::Archive,
        }
    }

    pub const fn key(&self) -> &ExternalKey {
        match self {
            Self::Create(entry) | Self::Update(entry) => entry.key(),
            Self::Archive(entry) => &entry.remote.key,
        }
    }
}

/// `Pending -> Dispatched -> {Succeeded | Retrying -> ... | FailedPermanent}`.
/// `NotDispatched` covers items never started because the run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Dispatched,
    Retrying,
    Succeeded,
    FailedPermanent,
    FailedAfterRetries,
    NotDispatched,
}

impl DispatchState {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FailedPermanent | Self::FailedAfterRetries | Self::NotDispatched
        )
    }

    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FailedPermanent | Self::FailedAfterRetries | Self::NotDispatched
        )
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Dispatched | Self::NotDispatched)
                | (
                    Self::Dispatched,
                    Self::Succeeded | Self::Retrying | Self::FailedPermanent
                )
                | (
                    Self::Retrying,
                    Self::Dispatched | Self::FailedAfterRetries
                )
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::FailedPermanent => "failed_permanent",
            Self::FailedAfterRetries => "failed_after_retries",
            Self::NotDispatched => "not_dispatched",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result for one mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub key: ExternalKey,
    pub kind: MutationKind,
    pub state: DispatchState,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Remote id returned by a successful create
    pub remote_id: Option<String>,
}

impl DispatchOutcome {
    pub const fn not_dispatched(key: ExternalKey, kind: MutationKind) -> Self {
        Self {
            key,
            kind,
            state: DispatchState::NotDispatched,
            attempts: 0,
            last_error: None,
            remote_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == DispatchState::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use DispatchState::*;
        assert!(Pending.can_transition_to(Dispatched));
        assert!(Dispatched.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Dispatched));
        assert!(Retrying.can_transition_to(FailedAfterRetries));
        assert!(Dispatched.can_transition_to(FailedPermanent));

        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Dispatched.can_transition_to(FailedAfterRetries));
        assert!(!Succeeded.can_transition_to(Retrying));
    }

    #[test]
    fn terminal_states() {
        assert!(DispatchState::Succeeded.is_terminal());
        assert!(DispatchState::NotDispatched.is_failure());
        assert!(!DispatchState::Retrying.is_terminal());
    }
}
