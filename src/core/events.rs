use crate::core::commands::{Content, InstantMessage};
use crate::core::types::Id;
use crate::ds::Priority;

/// Outbound side of the messaging layer, as seen by group management.
///
/// Implementations pack the content for `receiver` and hand it to the
/// delivery queue. `send_content` returns `false` only when the message was
/// dropped; a message parked until the receiver's keys are known counts as
/// accepted.
pub trait Messenger: Send + Sync {
    fn current_user(&self) -> Option<Id>;

    fn send_content(&self, receiver: &Id, content: Content, priority: Priority) -> bool;

    /// Send `content` to the station the client is connected to.
    fn send_to_station(&self, content: Content, priority: Priority) -> bool;

    /// Ask `members` for the latest membership of `group`.
    fn query_group_info(&self, group: &Id, members: &[Id]) -> bool;
}

/// Consumer of inbound messages that are not part of the handshake.
///
/// Returns `true` when the message was handled and should not be offered to
/// further handlers.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, message: &mut InstantMessage) -> bool;
}
