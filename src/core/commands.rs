//! Message content exchanged with the station and group peers.

use std::collections::HashSet;
use std::fmt;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::types::{Document, Id, Meta};

/// Names used in logs and in the `type` tag of serialized content.
pub mod content_types {
    pub const HANDSHAKE: &str = "handshake";
    pub const DOCUMENT: &str = "document";
    pub const GROUP: &str = "group";
    pub const TEXT: &str = "text";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStage {
    /// C -> S: "Hello world!"
    Start,
    /// S -> C: "DIM?", retry with the enclosed session key.
    Again,
    /// S -> C: "DIM!", session accepted.
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeCommand {
    pub stage: HandshakeStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// Time of the last message received, so the station can replay newer ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_time: Option<i64>,
}

impl HandshakeCommand {
    pub fn start(session_key: Option<String>, last_time: Option<i64>) -> Self {
        Self {
            stage: HandshakeStage::Start,
            session_key,
            last_time,
        }
    }

    pub fn again(session_key: &str) -> Self {
        Self {
            stage: HandshakeStage::Again,
            session_key: Some(session_key.to_string()),
            last_time: None,
        }
    }

    pub fn success(session_key: Option<String>) -> Self {
        Self {
            stage: HandshakeStage::Success,
            session_key,
            last_time: None,
        }
    }
}

/// Meta announcement, with the document attached when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentCommand {
    pub identifier: Id,
    pub meta: Meta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
}

impl DocumentCommand {
    pub fn meta_only(identifier: Id, meta: Meta) -> Self {
        Self {
            identifier,
            meta,
            document: None,
        }
    }

    pub fn with_document(identifier: Id, meta: Meta, document: Document) -> Self {
        Self {
            identifier,
            meta,
            document: Some(document),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum GroupAction {
    Invite { members: Vec<Id> },
    Expel { members: Vec<Id> },
    Quit,
    Reset { members: Vec<Id> },
    Query,
}

impl fmt::Display for GroupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupAction::Invite { .. } => "invite",
            GroupAction::Expel { .. } => "expel",
            GroupAction::Quit => "quit",
            GroupAction::Reset { .. } => "reset",
            GroupAction::Query => "query",
        };
        write!(f, "{name}")
    }
}

/// Group membership command. `added`/`removed` are filled in by processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCommand {
    pub group: Id,
    #[serde(flatten)]
    pub action: GroupAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<Id>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<Id>>,
}

impl GroupCommand {
    pub fn new(group: Id, action: GroupAction) -> Self {
        Self {
            group,
            action,
            added: None,
            removed: None,
        }
    }

    pub fn invite(group: &Id, members: &[Id]) -> Self {
        Self::new(
            group.clone(),
            GroupAction::Invite {
                members: members.to_vec(),
            },
        )
    }

    pub fn expel(group: &Id, members: &[Id]) -> Self {
        Self::new(
            group.clone(),
            GroupAction::Expel {
                members: members.to_vec(),
            },
        )
    }

    pub fn quit(group: &Id) -> Self {
        Self::new(group.clone(), GroupAction::Quit)
    }

    pub fn reset(group: &Id, members: &[Id]) -> Self {
        Self::new(
            group.clone(),
            GroupAction::Reset {
                members: members.to_vec(),
            },
        )
    }

    pub fn query(group: &Id) -> Self {
        Self::new(group.clone(), GroupAction::Query)
    }

    /// Member list carried by the action, empty for `Quit` and `Query`.
    pub fn members(&self) -> &[Id] {
        match &self.action {
            GroupAction::Invite { members }
            | GroupAction::Expel { members }
            | GroupAction::Reset { members } => members,
            GroupAction::Quit | GroupAction::Query => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Handshake(HandshakeCommand),
    Document(DocumentCommand),
    Group(GroupCommand),
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<Id>,
        text: String,
    },
}

impl Content {
    pub fn type_name(&self) -> &'static str {
        match self {
            Content::Handshake(_) => content_types::HANDSHAKE,
            Content::Document(_) => content_types::DOCUMENT,
            Content::Group(_) => content_types::GROUP,
            Content::Text { .. } => content_types::TEXT,
        }
    }

    /// Group the content belongs to, if any.
    pub fn group(&self) -> Option<&Id> {
        match self {
            Content::Group(cmd) => Some(&cmd.group),
            Content::Text { group, .. } => group.as_ref(),
            Content::Handshake(_) | Content::Document(_) => None,
        }
    }
}

/// Plain message before packing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantMessage {
    pub sender: Id,
    pub receiver: Id,
    /// Unix time in seconds.
    pub time: i64,
    pub serial: u32,
    pub content: Content,
}

impl InstantMessage {
    pub fn new(sender: Id, receiver: Id, content: Content) -> Self {
        Self {
            sender,
            receiver,
            time: Utc::now().timestamp(),
            serial: rand::thread_rng().gen(),
            content,
        }
    }
}

/// Deduplicated union of `base` and `extra`, keeping first-seen order.
pub fn union_members(base: &[Id], extra: &[Id]) -> Vec<Id> {
    let mut seen = HashSet::new();
    base.iter()
        .chain(extra.iter())
        .filter(|id| seen.insert((*id).clone()))
        .cloned()
        .collect()
}

/// Members of `base` not contained in `other`, keeping order.
pub fn difference_members(base: &[Id], other: &[Id]) -> Vec<Id> {
    let other: HashSet<&Id> = other.iter().collect();
    let mut seen = HashSet::new();
    base.iter()
        .filter(|id| !other.contains(id) && seen.insert((*id).clone()))
        .cloned()
        .collect()
}
