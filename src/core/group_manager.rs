//! Locally initiated group management.
//!
//! [`GroupManager`] keeps a per-group cache of founder, owner, members and
//! assistants in front of a [`GroupStore`], and implements the sending side
//! of the membership protocol.
//!
//! ```text
//!              invite / expel / quit / query
//!                          │
//!                   ┌──────▼───────┐  send_content  ┌───────────┐
//!                   │ GroupManager ├───────────────►│ Messenger │
//!                   └──────┬───────┘                └───────────┘
//!                          │ cache miss / write
//!                   ┌──────▼───────┐
//!                   │  GroupStore  │
//!                   └──────────────┘
//! ```
//!
//! # Cache discipline
//!
//! Every write to the store happens while the cache lock is held, and a
//! successful write evicts the group's entry before the lock is released.
//! Readers therefore either see the old cached value with the old stored
//! value, or reload after the write. A miss caches an empty placeholder so
//! unknown groups do not hit the store on every read.

use std::collections::HashMap;
use std::sync::Arc;

use log::{error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::core::commands::{
    difference_members, union_members, Content, DocumentCommand, GroupCommand,
};
use crate::core::error::GroupError;
use crate::core::events::Messenger;
use crate::core::store::{EntityDirectory, GroupStore};
use crate::core::types::Id;
use crate::ds::Priority;

/// Member count at or below which a group is treated as newly created.
pub const DEFAULT_NEW_GROUP_THRESHOLD: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupManagerConfig {
    /// Invites to groups with at most this many members broadcast the full
    /// roster to everyone at once.
    pub new_group_threshold: usize,
    /// Assistants used for groups that have none of their own.
    pub default_assistants: Vec<Id>,
}

impl Default for GroupManagerConfig {
    fn default() -> Self {
        Self {
            new_group_threshold: DEFAULT_NEW_GROUP_THRESHOLD,
            default_assistants: Vec::new(),
        }
    }
}

#[derive(Default)]
struct GroupCache {
    founders: HashMap<Id, Option<Id>>,
    owners: HashMap<Id, Option<Id>>,
    members: HashMap<Id, Vec<Id>>,
    assistants: HashMap<Id, Vec<Id>>,
}

impl GroupCache {
    fn evict(&mut self, group: &Id) {
        self.members.remove(group);
        self.assistants.remove(group);
    }
}

pub struct GroupManager {
    store: Arc<dyn GroupStore>,
    directory: Arc<dyn EntityDirectory>,
    messenger: Arc<dyn Messenger>,
    new_group_threshold: usize,
    default_assistants: RwLock<Vec<Id>>,
    cache: Mutex<GroupCache>,
}

impl GroupManager {
    pub fn new(
        store: Arc<dyn GroupStore>,
        directory: Arc<dyn EntityDirectory>,
        messenger: Arc<dyn Messenger>,
        config: GroupManagerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            messenger,
            new_group_threshold: config.new_group_threshold,
            default_assistants: RwLock::new(config.default_assistants),
            cache: Mutex::new(GroupCache::default()),
        }
    }

    pub fn messenger(&self) -> &Arc<dyn Messenger> {
        &self.messenger
    }

    pub fn set_default_assistants(&self, assistants: Vec<Id>) {
        *self.default_assistants.write() = assistants;
    }

    // ─────────────────────────── Lookups ───────────────────────────

    pub fn founder(&self, group: &Id) -> Option<Id> {
        let mut cache = self.cache.lock();
        cache
            .founders
            .entry(group.clone())
            .or_insert_with(|| self.store.founder(group).filter(|id| !id.is_broadcast()))
            .clone()
    }

    pub fn owner(&self, group: &Id) -> Option<Id> {
        let mut cache = self.cache.lock();
        cache
            .owners
            .entry(group.clone())
            .or_insert_with(|| self.store.owner(group).filter(|id| !id.is_broadcast()))
            .clone()
    }

    pub fn members(&self, group: &Id) -> Vec<Id> {
        let mut cache = self.cache.lock();
        self.cached_members(&mut cache, group)
    }

    /// Assistants of the group, or the default assistants if it has none.
    pub fn assistants(&self, group: &Id) -> Vec<Id> {
        let stored = {
            let mut cache = self.cache.lock();
            self.cached_assistants(&mut cache, group)
        };
        if stored.is_empty() {
            self.default_assistants.read().clone()
        } else {
            stored
        }
    }

    fn cached_members(&self, cache: &mut GroupCache, group: &Id) -> Vec<Id> {
        cache
            .members
            .entry(group.clone())
            .or_insert_with(|| real_ids(self.store.members(group)))
            .clone()
    }

    fn cached_assistants(&self, cache: &mut GroupCache, group: &Id) -> Vec<Id> {
        cache
            .assistants
            .entry(group.clone())
            .or_insert_with(|| real_ids(self.store.assistants(group)))
            .clone()
    }

    // ─────────────────────────── Writes ───────────────────────────

    pub fn save_members(&self, members: &[Id], group: &Id) -> bool {
        let mut cache = self.cache.lock();
        let saved = self.store.save_members(members, group);
        if saved {
            cache.evict(group);
        } else {
            error!("[save_members] failed to save {} members of {group}", members.len());
        }
        saved
    }

    pub fn save_assistants(&self, assistants: &[Id], group: &Id) -> bool {
        let mut cache = self.cache.lock();
        let saved = self.store.save_assistants(assistants, group);
        if saved {
            cache.evict(group);
        } else {
            error!("[save_assistants] failed to save assistants of {group}");
        }
        saved
    }

    /// Read-modify-write of the member list under the cache lock.
    ///
    /// `update` receives the current members and returns the new list, or
    /// `None` to leave the group untouched. Returns whether a write happened.
    pub fn update_members(
        &self,
        group: &Id,
        update: impl FnOnce(&[Id]) -> Option<Vec<Id>>,
    ) -> Result<bool, GroupError> {
        let mut cache = self.cache.lock();
        let current = self.cached_members(&mut cache, group);
        let Some(updated) = update(&current) else {
            return Ok(false);
        };
        if !self.store.save_members(&updated, group) {
            error!("[update_members] failed to save members of {group}");
            return Err(GroupError::StoreWrite(group.clone()));
        }
        cache.evict(group);
        Ok(true)
    }

    pub fn add_members(&self, new_members: &[Id], group: &Id) -> Result<bool, GroupError> {
        self.update_members(group, |current| {
            let merged = union_members(current, new_members);
            (merged.len() != current.len()).then_some(merged)
        })
    }

    pub fn remove_members(&self, out_members: &[Id], group: &Id) -> Result<bool, GroupError> {
        self.update_members(group, |current| {
            let remaining = difference_members(current, out_members);
            (remaining.len() != current.len()).then_some(remaining)
        })
    }

    pub fn add_member(&self, member: &Id, group: &Id) -> Result<bool, GroupError> {
        self.add_members(std::slice::from_ref(member), group)
    }

    pub fn remove_member(&self, member: &Id, group: &Id) -> Result<bool, GroupError> {
        self.remove_members(std::slice::from_ref(member), group)
    }

    pub fn add_assistant(&self, bot: &Id, group: &Id) -> bool {
        let mut cache = self.cache.lock();
        let mut bots = self.cached_assistants(&mut cache, group);
        if bots.contains(bot) {
            return true;
        }
        bots.push(bot.clone());
        let saved = self.store.save_assistants(&bots, group);
        if saved {
            cache.evict(group);
        }
        saved
    }

    // ─────────────────────────── Roles ───────────────────────────

    /// Members and the owner.
    pub fn contains_member(&self, member: &Id, group: &Id) -> bool {
        self.members(group).contains(member) || self.owner(group).as_ref() == Some(member)
    }

    /// Only assistants stored for the group; defaults do not count.
    pub fn contains_assistant(&self, bot: &Id, group: &Id) -> bool {
        let mut cache = self.cache.lock();
        self.cached_assistants(&mut cache, group).contains(bot)
    }

    pub fn is_founder(&self, member: &Id, group: &Id) -> bool {
        if let Some(founder) = self.founder(group) {
            return founder == *member;
        }
        // Founder unknown: a group's meta is generated from its founder's key.
        match (self.directory.meta(group), self.directory.meta(member)) {
            (Some(group_meta), Some(member_meta)) => group_meta.matches(&member_meta),
            _ => false,
        }
    }

    pub fn is_owner(&self, member: &Id, group: &Id) -> bool {
        match self.owner(group) {
            Some(owner) => owner == *member,
            None => self.is_founder(member, group),
        }
    }

    // ─────────────────────────── Protocol ───────────────────────────

    /// Invite `new_members` and make sure every party ends up with the full
    /// roster. Returns whether the stored membership changed.
    pub fn invite(&self, new_members: &[Id], group: &Id) -> Result<bool, GroupError> {
        let meta = self
            .directory
            .meta(group)
            .ok_or_else(|| GroupError::MissingMeta(group.clone()))?;
        let announcement = Content::Document(match self.directory.document(group) {
            Some(document) => DocumentCommand::with_document(group.clone(), meta, document),
            None => DocumentCommand::meta_only(group.clone(), meta),
        });

        if !self
            .messenger
            .send_to_station(announcement.clone(), Priority::Normal)
        {
            warn!("[invite] failed to announce {group} to the station");
        }
        let bots = self.assistants(group);
        self.send_to(&bots, &announcement);

        let old_members = self.members(group);
        if old_members.len() <= self.new_group_threshold {
            info!(
                "[invite] {} members into new group {group}",
                new_members.len()
            );
            let changed = self.add_members(new_members, group)?;
            let all = self.members(group);
            self.send_to(&all, &announcement);

            let invite = Content::Group(GroupCommand::invite(group, &all));
            self.send_to(&bots, &invite);
            self.send_to(&all, &invite);
            return Ok(changed);
        }

        info!(
            "[invite] {} members into group {group} of {}",
            new_members.len(),
            old_members.len()
        );
        self.send_to(new_members, &announcement);

        let invite = Content::Group(GroupCommand::invite(group, new_members));
        self.send_to(&bots, &invite);
        self.send_to(&old_members, &invite);

        let changed = self.add_members(new_members, group)?;
        let all = self.members(group);
        let roster = Content::Group(GroupCommand::invite(group, &all));
        self.send_to(new_members, &roster);
        Ok(changed)
    }

    /// Remove `out_members` and notify assistants, the remaining members and
    /// the expelled members. Returns whether the stored membership changed.
    pub fn expel(&self, out_members: &[Id], group: &Id) -> Result<bool, GroupError> {
        let bots = self.assistants(group);
        for member in out_members {
            if bots.contains(member) {
                return Err(GroupError::permission_denied(
                    group,
                    format!("cannot expel assistant {member}"),
                ));
            }
            if self.is_owner(member, group) {
                return Err(GroupError::permission_denied(
                    group,
                    format!("cannot expel owner {member}"),
                ));
            }
        }

        let changed = self.remove_members(out_members, group)?;
        info!(
            "[expel] {} members from {group}, changed: {changed}",
            out_members.len()
        );

        let expel = Content::Group(GroupCommand::expel(group, out_members));
        self.send_to(&bots, &expel);
        self.send_to(&self.members(group), &expel);
        self.send_to(out_members, &expel);
        Ok(changed)
    }

    /// Leave the group as the current user.
    ///
    /// The `Quit` command is broadcast even if the user was not a member.
    /// Returns whether the stored membership changed.
    ///
    /// # Panics
    ///
    /// Panics if the messenger has no current user.
    pub fn quit(&self, group: &Id) -> Result<bool, GroupError> {
        let Some(me) = self.messenger.current_user() else {
            panic!("[quit] no current user while quitting group {group}");
        };

        let bots = self.assistants(group);
        if bots.contains(&me) {
            return Err(GroupError::permission_denied(
                group,
                format!("assistant {me} cannot quit"),
            ));
        }
        if self.is_owner(&me, group) {
            return Err(GroupError::permission_denied(
                group,
                format!("owner {me} cannot quit"),
            ));
        }

        let changed = self.remove_member(&me, group)?;
        if !changed {
            warn!("[quit] {me} is not a member of {group}");
        }

        let quit = Content::Group(GroupCommand::quit(group));
        self.send_to(&bots, &quit);
        self.send_to(&self.members(group), &quit);
        Ok(changed)
    }

    pub fn query(&self, group: &Id) -> bool {
        let bots = self.assistants(group);
        self.messenger.query_group_info(group, &bots)
    }

    /// Relay `content` to the group through the first assistant that takes it.
    pub fn send_content(&self, content: Content, group: &Id) -> bool {
        for bot in self.assistants(group) {
            if self
                .messenger
                .send_content(&bot, content.clone(), Priority::Normal)
            {
                return true;
            }
        }
        warn!("[send_content] no assistant accepted content for {group}");
        false
    }

    fn send_to(&self, receivers: &[Id], content: &Content) {
        for receiver in receivers {
            if !self
                .messenger
                .send_content(receiver, content.clone(), Priority::Normal)
            {
                warn!(
                    "[send_to] failed to send {} to {receiver}",
                    content.type_name()
                );
            }
        }
    }
}

fn real_ids(ids: Option<Vec<Id>>) -> Vec<Id> {
    ids.unwrap_or_default()
        .into_iter()
        .filter(|id| !id.is_broadcast())
        .collect()
}
