//! Protocol core: message model, packing boundary, storage boundary and the
//! group membership protocol.
//!
//! # Key Components
//!
//! - [`GroupManager`] - Locally initiated invite/expel/quit/query with a
//!   per-group cache
//! - [`GroupCommandProcessor`] - Validates and applies received group commands
//! - [`Packer`] - Boundary to the signing/encryption layer
//! - [`GroupStore`] / [`EntityDirectory`] - Boundary to persistence
//! - [`Messenger`] - "send to these recipients" primitive used by the manager

mod commands;
mod error;
mod events;
mod group_manager;
mod group_processor;
mod packer;
mod store;
mod types;

pub use commands::{
    content_types, difference_members, union_members, Content, DocumentCommand, GroupAction,
    GroupCommand, HandshakeCommand, HandshakeStage, InstantMessage,
};
pub use error::{GroupError, ProcessError};
pub use events::{InboundHandler, Messenger};
pub use group_manager::{GroupManager, GroupManagerConfig, DEFAULT_NEW_GROUP_THRESHOLD};
pub use group_processor::{GroupCommandProcessor, MembershipChange};
pub use packer::{JsonPacker, PackError, Packer};
pub use store::{EntityDirectory, GroupStore, MemoryGroupStore};
pub use types::{Document, Id, Meta};
