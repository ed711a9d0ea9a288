//! Storage abstraction for group membership and identity artifacts.
//!
//! Use [`MemoryGroupStore`] for development/testing, or implement the traits
//! over your own persistence.
//!
//! Lookups return `None` when nothing is stored; they never fail. Saves
//! report success as a `bool`.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`. Internal synchronization is the
//! implementation's responsibility.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::core::types::{Document, Id, Meta};

/// Persistent membership data, one record per group.
pub trait GroupStore: Send + Sync {
    fn founder(&self, group: &Id) -> Option<Id>;

    fn owner(&self, group: &Id) -> Option<Id>;

    fn members(&self, group: &Id) -> Option<Vec<Id>>;

    fn save_members(&self, members: &[Id], group: &Id) -> bool;

    fn assistants(&self, group: &Id) -> Option<Vec<Id>>;

    fn save_assistants(&self, assistants: &[Id], group: &Id) -> bool;
}

/// Read access to identity artifacts managed by the identity SDK.
pub trait EntityDirectory: Send + Sync {
    fn meta(&self, entity: &Id) -> Option<Meta>;

    fn document(&self, entity: &Id) -> Option<Document>;
}

#[derive(Debug, Default, Clone)]
struct GroupRecord {
    founder: Option<Id>,
    owner: Option<Id>,
    members: Option<Vec<Id>>,
    assistants: Option<Vec<Id>>,
}

/// In-memory store for development and testing.
///
/// All data is lost on restart.
#[derive(Default)]
pub struct MemoryGroupStore {
    groups: RwLock<HashMap<Id, GroupRecord>>,
    metas: RwLock<HashMap<Id, Meta>>,
    documents: RwLock<HashMap<Id, Document>>,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryGroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_founder(&self, group: &Id, founder: &Id) {
        self.groups.write().entry(group.clone()).or_default().founder = Some(founder.clone());
    }

    pub fn set_owner(&self, group: &Id, owner: &Id) {
        self.groups.write().entry(group.clone()).or_default().owner = Some(owner.clone());
    }

    pub fn set_meta(&self, entity: &Id, meta: Meta) {
        self.metas.write().insert(entity.clone(), meta);
    }

    pub fn set_document(&self, entity: &Id, document: Document) {
        self.documents.write().insert(entity.clone(), document);
    }

    /// Number of membership lookups served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Make every subsequent save report failure.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read_record<T>(&self, group: &Id, f: impl FnOnce(&GroupRecord) -> Option<T>) -> Option<T> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.groups.read().get(group).and_then(f)
    }

    fn write_record(&self, group: &Id, f: impl FnOnce(&mut GroupRecord)) -> bool {
        if self.fail_writes.load(Ordering::SeqCst) {
            return false;
        }
        f(self.groups.write().entry(group.clone()).or_default());
        true
    }
}

impl GroupStore for MemoryGroupStore {
    fn founder(&self, group: &Id) -> Option<Id> {
        self.read_record(group, |r| r.founder.clone())
    }

    fn owner(&self, group: &Id) -> Option<Id> {
        self.read_record(group, |r| r.owner.clone())
    }

    fn members(&self, group: &Id) -> Option<Vec<Id>> {
        self.read_record(group, |r| r.members.clone())
    }

    fn save_members(&self, members: &[Id], group: &Id) -> bool {
        self.write_record(group, |r| r.members = Some(members.to_vec()))
    }

    fn assistants(&self, group: &Id) -> Option<Vec<Id>> {
        self.read_record(group, |r| r.assistants.clone())
    }

    fn save_assistants(&self, assistants: &[Id], group: &Id) -> bool {
        self.write_record(group, |r| r.assistants = Some(assistants.to_vec()))
    }
}

impl EntityDirectory for MemoryGroupStore {
    fn meta(&self, entity: &Id) -> Option<Meta> {
        self.metas.read().get(entity).cloned()
    }

    fn document(&self, entity: &Id) -> Option<Document> {
        self.documents.read().get(entity).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_group_is_none() {
        let store = MemoryGroupStore::new();
        let group = Id::from("g@x");
        assert_eq!(store.members(&group), None);
        assert_eq!(store.founder(&group), None);
        assert_eq!(store.reads(), 2);
    }

    #[test]
    fn test_save_and_fail_writes() {
        let store = MemoryGroupStore::new();
        let group = Id::from("g@x");
        let members = vec![Id::from("a@x")];
        assert!(store.save_members(&members, &group));
        assert_eq!(store.members(&group), Some(members.clone()));

        store.fail_writes(true);
        assert!(!store.save_members(&[], &group));
        assert_eq!(store.members(&group), Some(members));
    }
}
