//! Receiving side of the group membership protocol.
//!
//! Each command is validated against the sender's role and applied to the
//! group's stored membership. Rejections are logged and reported as `false`;
//! a bad command never interrupts processing of the messages behind it.
//!
//! | Action | Sender must be                     | Effect                          |
//! |--------|------------------------------------|---------------------------------|
//! | Invite | member (or anyone, empty group)    | `old ∪ added`, annotate `added` |
//! | Expel  | founder                            | `old − removed`, annotate       |
//! | Quit   | member, not founder                | `old − sender`                  |
//! | Reset  | founder                            | `new`, annotate both            |
//! | Query  | member                             | none                            |

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::core::commands::{
    difference_members, union_members, Content, GroupAction, GroupCommand, InstantMessage,
};
use crate::core::error::{GroupError, ProcessError};
use crate::core::events::InboundHandler;
use crate::core::group_manager::GroupManager;
use crate::core::types::Id;

/// Membership diff produced by a successful command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Option<Vec<Id>>,
    pub removed: Option<Vec<Id>>,
}

pub struct GroupCommandProcessor {
    manager: Arc<GroupManager>,
}

impl GroupCommandProcessor {
    pub fn new(manager: Arc<GroupManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<GroupManager> {
        &self.manager
    }

    /// Validate and apply `command` from `sender`.
    ///
    /// On success the command is annotated with the computed `added` and
    /// `removed` lists, if any.
    pub fn process(&self, command: &mut GroupCommand, sender: &Id) -> bool {
        let group = command.group.clone();
        let outcome = match &command.action {
            GroupAction::Invite { members } => self.process_invite(&group, members, sender),
            GroupAction::Expel { members } => self.process_expel(&group, members, sender),
            GroupAction::Quit => self.process_quit(&group, sender),
            GroupAction::Reset { members } => self.process_reset(&group, members, sender),
            GroupAction::Query => self.process_query(&group, sender),
        };

        match outcome {
            Ok(change) => {
                debug!(
                    "[process] {} on {group} from {sender}: {change:?}",
                    command.action
                );
                if change.added.is_some() {
                    command.added = change.added;
                }
                if change.removed.is_some() {
                    command.removed = change.removed;
                }
                true
            }
            Err(ProcessError::StoreWrite(group)) => {
                error!("[process] failed to persist {} on {group}", command.action);
                false
            }
            Err(reason) => {
                warn!("[process] rejected {} from {sender}: {reason}", command.action);
                false
            }
        }
    }

    fn process_invite(
        &self,
        group: &Id,
        invited: &[Id],
        sender: &Id,
    ) -> Result<MembershipChange, ProcessError> {
        let founder = self.manager.founder(group);
        let bootstrap = founder.is_none() && self.manager.members(group).is_empty();
        if bootstrap {
            // First command for an unknown group; the sender is not verified.
            info!("[process_invite] accepting first invite for {group} from {sender}");
        } else if !self.manager.contains_member(sender, group) {
            return Err(ProcessError::NotMember {
                sender: sender.clone(),
                group: group.clone(),
            });
        }

        // A founder inviting itself is a full roster reset.
        if invited.contains(sender) && self.manager.is_founder(sender, group) {
            return self.process_reset(group, invited, sender);
        }

        let mut added = Vec::new();
        self.manager
            .update_members(group, |old| {
                added = difference_members(invited, old);
                (!added.is_empty()).then(|| union_members(old, &added))
            })
            .map_err(|e| store_error(group, e))?;

        Ok(MembershipChange {
            added: (!added.is_empty()).then_some(added),
            removed: None,
        })
    }

    fn process_expel(
        &self,
        group: &Id,
        expelled: &[Id],
        sender: &Id,
    ) -> Result<MembershipChange, ProcessError> {
        self.require_founder(group, sender)?;

        let mut removed = Vec::new();
        self.manager
            .update_members(group, |old| {
                removed = union_members(expelled, &[])
                    .into_iter()
                    .filter(|id| old.contains(id))
                    .collect();
                (!removed.is_empty()).then(|| difference_members(old, &removed))
            })
            .map_err(|e| store_error(group, e))?;

        Ok(MembershipChange {
            added: None,
            removed: (!removed.is_empty()).then_some(removed),
        })
    }

    fn process_quit(&self, group: &Id, sender: &Id) -> Result<MembershipChange, ProcessError> {
        if self.manager.is_founder(sender, group) {
            return Err(ProcessError::FounderCannotQuit {
                sender: sender.clone(),
                group: group.clone(),
            });
        }
        let removed = self
            .manager
            .update_members(group, |old| {
                old.contains(sender)
                    .then(|| difference_members(old, std::slice::from_ref(sender)))
            })
            .map_err(|e| store_error(group, e))?;
        if !removed {
            return Err(ProcessError::NotMember {
                sender: sender.clone(),
                group: group.clone(),
            });
        }
        Ok(MembershipChange::default())
    }

    fn process_reset(
        &self,
        group: &Id,
        new_members: &[Id],
        sender: &Id,
    ) -> Result<MembershipChange, ProcessError> {
        self.require_founder(group, sender)?;

        let new_members = union_members(new_members, &[]);
        let mut added = Vec::new();
        let mut removed = Vec::new();
        self.manager
            .update_members(group, |old| {
                added = difference_members(&new_members, old);
                removed = difference_members(old, &new_members);
                (!added.is_empty() || !removed.is_empty()).then(|| new_members.clone())
            })
            .map_err(|e| store_error(group, e))?;

        if added.is_empty() && removed.is_empty() {
            return Ok(MembershipChange::default());
        }
        Ok(MembershipChange {
            added: Some(added),
            removed: Some(removed),
        })
    }

    fn process_query(&self, group: &Id, sender: &Id) -> Result<MembershipChange, ProcessError> {
        if !self.manager.contains_member(sender, group) {
            return Err(ProcessError::NotMember {
                sender: sender.clone(),
                group: group.clone(),
            });
        }
        Ok(MembershipChange::default())
    }

    fn require_founder(&self, group: &Id, sender: &Id) -> Result<(), ProcessError> {
        if self.manager.is_founder(sender, group) {
            Ok(())
        } else {
            Err(ProcessError::NotFounder {
                sender: sender.clone(),
                group: group.clone(),
            })
        }
    }
}

fn store_error(group: &Id, err: GroupError) -> ProcessError {
    debug!("[store_error] {err}");
    ProcessError::StoreWrite(group.clone())
}

impl InboundHandler for GroupCommandProcessor {
    fn handle(&self, message: &mut InstantMessage) -> bool {
        let sender = message.sender.clone();
        match &mut message.content {
            Content::Group(command) => {
                self.process(command, &sender);
                true
            }
            Content::Handshake(_) | Content::Document(_) | Content::Text { .. } => false,
        }
    }
}
