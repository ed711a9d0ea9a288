//! Integration tests for processing received group commands.

use std::collections::HashSet;
use std::sync::Arc;

use sechat::core::{
    Content, GroupCommand, GroupCommandProcessor, GroupManager, GroupManagerConfig, GroupStore,
    Id, InboundHandler, InstantMessage, MemoryGroupStore, Messenger,
};
use sechat::ds::Priority;

struct Silent;

impl Messenger for Silent {
    fn current_user(&self) -> Option<Id> {
        Some(Id::from("me@x"))
    }

    fn send_content(&self, _receiver: &Id, _content: Content, _priority: Priority) -> bool {
        true
    }

    fn send_to_station(&self, _content: Content, _priority: Priority) -> bool {
        true
    }

    fn query_group_info(&self, _group: &Id, _members: &[Id]) -> bool {
        false
    }
}

struct Fixture {
    store: Arc<MemoryGroupStore>,
    processor: GroupCommandProcessor,
    group: Id,
}

impl Fixture {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let store = Arc::new(MemoryGroupStore::new());
        let manager = Arc::new(GroupManager::new(
            store.clone(),
            store.clone(),
            Arc::new(Silent),
            GroupManagerConfig::default(),
        ));
        Self {
            store,
            processor: GroupCommandProcessor::new(manager),
            group: Id::from("team@x"),
        }
    }

    /// Group founded by `founder@x` with the given members.
    fn founded(members: &[&str]) -> Self {
        let f = Self::new();
        f.store.set_founder(&f.group, &Id::from("founder@x"));
        f.store.save_members(&ids(members), &f.group);
        f
    }

    fn members(&self) -> Vec<Id> {
        self.processor.manager().members(&self.group)
    }
}

fn ids(names: &[&str]) -> Vec<Id> {
    names.iter().map(|name| Id::from(*name)).collect()
}

fn as_set(list: &[Id]) -> HashSet<Id> {
    list.iter().cloned().collect()
}

// ─────────────────────────── Invite ───────────────────────────

#[test]
fn test_first_invite_bootstraps_unknown_group() {
    let f = Fixture::new();
    let mut cmd = GroupCommand::invite(&f.group, &ids(&["a@x", "b@x"]));

    assert!(f.processor.process(&mut cmd, &Id::from("a@x")));
    assert_eq!(f.members(), ids(&["a@x", "b@x"]));
    assert_eq!(cmd.added, Some(ids(&["a@x", "b@x"])));
}

#[test]
fn test_invite_from_member_adds_only_new() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    let mut cmd = GroupCommand::invite(&f.group, &ids(&["a@x", "c@x"]));

    assert!(f.processor.process(&mut cmd, &Id::from("a@x")));
    assert_eq!(f.members(), ids(&["founder@x", "a@x", "c@x"]));
    assert_eq!(cmd.added, Some(ids(&["c@x"])));
}

#[test]
fn test_invite_from_stranger_is_rejected() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    let mut cmd = GroupCommand::invite(&f.group, &ids(&["eve@x"]));

    assert!(!f.processor.process(&mut cmd, &Id::from("eve@x")));
    assert_eq!(f.members(), ids(&["founder@x", "a@x"]));
    assert_eq!(cmd.added, None);
}

#[test]
fn test_founder_inviting_itself_resets_roster() {
    let f = Fixture::founded(&["founder@x", "a@x", "b@x"]);
    let mut cmd = GroupCommand::invite(&f.group, &ids(&["founder@x", "a@x", "c@x"]));

    assert!(f.processor.process(&mut cmd, &Id::from("founder@x")));
    assert_eq!(f.members(), ids(&["founder@x", "a@x", "c@x"]));
    assert_eq!(cmd.added, Some(ids(&["c@x"])));
    assert_eq!(cmd.removed, Some(ids(&["b@x"])));
}

// ─────────────────────────── Expel / Quit ───────────────────────────

#[test]
fn test_expel_requires_founder() {
    let f = Fixture::founded(&["founder@x", "a@x", "b@x"]);
    let mut cmd = GroupCommand::expel(&f.group, &ids(&["b@x"]));

    assert!(!f.processor.process(&mut cmd, &Id::from("a@x")));
    assert_eq!(f.members().len(), 3);

    assert!(f.processor.process(&mut cmd, &Id::from("founder@x")));
    assert_eq!(f.members(), ids(&["founder@x", "a@x"]));
    assert_eq!(cmd.removed, Some(ids(&["b@x"])));
}

#[test]
fn test_expel_ignores_non_members() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    let mut cmd = GroupCommand::expel(&f.group, &ids(&["ghost@x"]));

    assert!(f.processor.process(&mut cmd, &Id::from("founder@x")));
    assert_eq!(cmd.removed, None);
    assert_eq!(f.members().len(), 2);
}

#[test]
fn test_founder_quit_is_rejected() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    let mut cmd = GroupCommand::quit(&f.group);

    assert!(!f.processor.process(&mut cmd, &Id::from("founder@x")));
    assert_eq!(f.members().len(), 2);
}

#[test]
fn test_member_quit_and_stranger_quit() {
    let f = Fixture::founded(&["founder@x", "a@x"]);

    let mut cmd = GroupCommand::quit(&f.group);
    assert!(f.processor.process(&mut cmd, &Id::from("a@x")));
    assert_eq!(f.members(), ids(&["founder@x"]));

    let mut again = GroupCommand::quit(&f.group);
    assert!(!f.processor.process(&mut again, &Id::from("a@x")));
}

// ─────────────────────────── Reset ───────────────────────────

#[test]
fn test_reset_from_non_founder_is_rejected() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    let mut cmd = GroupCommand::reset(&f.group, &ids(&["a@x"]));

    assert!(!f.processor.process(&mut cmd, &Id::from("a@x")));
    assert_eq!(f.members(), ids(&["founder@x", "a@x"]));
    assert_eq!(cmd.removed, None);
}

#[test]
fn test_reset_difference_law() {
    let old = ["founder@x", "a@x", "b@x", "c@x"];
    let cases: &[&[&str]] = &[
        &["founder@x", "a@x", "d@x"],
        &["founder@x"],
        &["x@x", "y@x", "x@x"],
        &["founder@x", "a@x", "b@x", "c@x"],
    ];

    for new in cases {
        let f = Fixture::founded(&old);
        let mut cmd = GroupCommand::reset(&f.group, &ids(new));
        assert!(f.processor.process(&mut cmd, &Id::from("founder@x")));

        let added = cmd.added.clone().unwrap_or_default();
        let removed = cmd.removed.clone().unwrap_or_default();
        let mut expected = as_set(&ids(&old));
        for id in &removed {
            expected.remove(id);
        }
        expected.extend(added);
        assert_eq!(expected, as_set(&f.members()), "reset to {new:?}");
        assert_eq!(as_set(&f.members()), as_set(&ids(new)));
    }
}

#[test]
fn test_failed_store_write_rejects_command() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    f.store.fail_writes(true);
    let mut cmd = GroupCommand::reset(&f.group, &ids(&["founder@x"]));

    assert!(!f.processor.process(&mut cmd, &Id::from("founder@x")));
    assert_eq!(f.members().len(), 2);
}

// ─────────────────────────── Query / dispatch ───────────────────────────

#[test]
fn test_query_requires_membership() {
    let f = Fixture::founded(&["founder@x", "a@x"]);
    assert!(f
        .processor
        .process(&mut GroupCommand::query(&f.group), &Id::from("a@x")));
    assert!(!f
        .processor
        .process(&mut GroupCommand::query(&f.group), &Id::from("eve@x")));
}

#[test]
fn test_handler_consumes_only_group_content() {
    let f = Fixture::new();
    let mut text = InstantMessage::new(
        Id::from("a@x"),
        Id::from("me@x"),
        Content::Text {
            group: None,
            text: "hi".to_string(),
        },
    );
    assert!(!f.processor.handle(&mut text));

    let mut invite = InstantMessage::new(
        Id::from("a@x"),
        Id::from("me@x"),
        Content::Group(GroupCommand::invite(&f.group, &ids(&["a@x", "me@x"]))),
    );
    assert!(f.processor.handle(&mut invite));
    match invite.content {
        Content::Group(cmd) => assert_eq!(cmd.added, Some(ids(&["a@x", "me@x"]))),
        other => panic!("unexpected content {other:?}"),
    }
}
