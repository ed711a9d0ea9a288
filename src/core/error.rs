//! Core library errors.

use thiserror::Error;

use crate::core::types::Id;

/// Errors returned by locally initiated group management.
#[derive(Debug, Error)]
pub enum GroupError {
    /// The current user may not perform the operation.
    #[error("Permission denied for group {group}: {reason}")]
    PermissionDenied { group: Id, reason: String },

    /// The group's meta is needed for the announcement but unknown.
    #[error("Meta not found for group {0}")]
    MissingMeta(Id),

    /// The store refused to persist the new member list.
    #[error("Failed to save members of group {0}")]
    StoreWrite(Id),
}

impl GroupError {
    pub fn permission_denied(group: &Id, reason: impl Into<String>) -> Self {
        GroupError::PermissionDenied {
            group: group.clone(),
            reason: reason.into(),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, GroupError::PermissionDenied { .. })
    }
}

/// Reasons a received group command is rejected.
///
/// These are logged by the processor and never propagated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("{sender} is not a member of {group}")]
    NotMember { sender: Id, group: Id },

    #[error("{sender} is not the founder of {group}")]
    NotFounder { sender: Id, group: Id },

    #[error("founder {sender} cannot quit {group}")]
    FounderCannotQuit { sender: Id, group: Id },

    #[error("failed to save members of {0}")]
    StoreWrite(Id),
}
