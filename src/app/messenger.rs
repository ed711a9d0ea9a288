//! Client messenger: the "send to these recipients" primitive.
//!
//! Outbound content is wrapped in an [`InstantMessage`] from the current
//! user, packed and queued on the [`Session`]. When the packer cannot find
//! the receiver's key the message is suspended under that identity and sent
//! again by [`ClientMessenger::resume_suspended`] once the key is known.
//!
//! Inbound packages arrive through [`StationDelegate`]. Handshake responses
//! are applied to the session here; everything else is offered to the
//! registered [`InboundHandler`]s in registration order.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::app::delivery_queue::CompletionHandler;
use crate::app::session::{Session, StationDelegate};
use crate::core::{
    Content, GroupCommand, HandshakeCommand, HandshakeStage, Id, InboundHandler, InstantMessage,
    Messenger, PackError,
};
use crate::ds::{DeliveryServiceError, Priority};

/// Minimum time between two group queries to the same member (2 minutes).
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(120);

struct SuspendedMessage {
    message: InstantMessage,
    priority: Priority,
    handler: Option<CompletionHandler>,
}

pub struct ClientMessenger {
    session: Arc<Session>,
    query_interval: Duration,
    suspended: Mutex<HashMap<Id, Vec<SuspendedMessage>>>,
    /// group -> member -> earliest time of the next query
    query_expires: Mutex<HashMap<Id, HashMap<Id, Instant>>>,
    handlers: RwLock<Vec<Weak<dyn InboundHandler>>>,
}

impl ClientMessenger {
    /// Create the messenger and register it as the session's delegate.
    pub fn new(session: Arc<Session>, query_interval: Duration) -> Arc<Self> {
        let messenger = Arc::new(Self {
            session: session.clone(),
            query_interval,
            suspended: Mutex::new(HashMap::new()),
            query_expires: Mutex::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
        });
        let delegate: Weak<dyn StationDelegate> = Arc::downgrade(&messenger) as Weak<Self>;
        session.set_delegate(delegate);
        messenger
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Offer inbound content to `handler`. Only a weak reference is kept.
    pub fn add_handler<H: InboundHandler + 'static>(&self, handler: &Arc<H>) {
        let weak: Weak<dyn InboundHandler> = Arc::downgrade(handler) as Weak<H>;
        self.handlers.write().push(weak);
    }

    /// Pack and queue `message`.
    ///
    /// Returns `false` only if the message was dropped.
    pub fn send_message(
        &self,
        message: InstantMessage,
        priority: Priority,
        handler: Option<CompletionHandler>,
    ) -> bool {
        match self.session.packer().pack(&message) {
            Ok(payload) => {
                self.session.enqueue_or_send(payload, priority, handler);
                true
            }
            Err(PackError::MissingKey(waiting)) => {
                info!(
                    "[send_message] suspending {} for {waiting} until its key is known",
                    message.content.type_name()
                );
                self.suspended
                    .lock()
                    .entry(waiting)
                    .or_default()
                    .push(SuspendedMessage {
                        message,
                        priority,
                        handler,
                    });
                true
            }
            Err(e) => {
                error!("[send_message] failed to pack message: {e}");
                if let Some(handler) = handler {
                    handler(Err(DeliveryServiceError::SendFailed(e.to_string())));
                }
                false
            }
        }
    }

    /// Send `content` from the current user with a completion handler.
    pub fn send_content_with_handler(
        &self,
        receiver: &Id,
        content: Content,
        priority: Priority,
        handler: CompletionHandler,
    ) -> bool {
        let Some(sender) = self.session.current_user() else {
            error!("[send_content_with_handler] no current user");
            return false;
        };
        let message = InstantMessage::new(sender, receiver.clone(), content);
        self.send_message(message, priority, Some(handler))
    }

    /// Retry messages that waited for `identity`. Returns how many were queued.
    pub fn resume_suspended(&self, identity: &Id) -> usize {
        let parked = self.suspended.lock().remove(identity).unwrap_or_default();
        if parked.is_empty() {
            return 0;
        }
        info!(
            "[resume_suspended] retrying {} messages for {identity}",
            parked.len()
        );
        let mut queued = 0;
        for entry in parked {
            match self.session.packer().pack(&entry.message) {
                Ok(payload) => {
                    self.session
                        .enqueue_or_send(payload, entry.priority, entry.handler);
                    queued += 1;
                }
                Err(PackError::MissingKey(waiting)) => {
                    self.suspended.lock().entry(waiting).or_default().push(entry);
                }
                Err(e) => {
                    error!("[resume_suspended] dropping message: {e}");
                    if let Some(handler) = entry.handler {
                        handler(Err(DeliveryServiceError::SendFailed(e.to_string())));
                    }
                }
            }
        }
        queued
    }

    pub fn suspended_count(&self, identity: &Id) -> usize {
        self.suspended.lock().get(identity).map_or(0, Vec::len)
    }

    fn process_package(&self, data: &[u8]) {
        let mut message = match self.session.packer().unpack(data) {
            Ok(message) => message,
            Err(e) => {
                warn!("[process_package] failed to unpack package: {e}");
                return;
            }
        };

        if let Content::Handshake(command) = &message.content {
            self.process_handshake(command);
            return;
        }
        self.session.record_received_time(message.time);

        let handlers: Vec<Arc<dyn InboundHandler>> = self
            .handlers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for handler in handlers {
            if handler.handle(&mut message) {
                return;
            }
        }
        debug!(
            "[process_package] unhandled {} from {}",
            message.content.type_name(),
            message.sender
        );
    }

    fn process_handshake(&self, command: &HandshakeCommand) {
        match command.stage {
            HandshakeStage::Success => {
                self.session.handshake_accepted(command.session_key.clone());
            }
            HandshakeStage::Again => match command.session_key.as_deref() {
                Some(session_key) => self.session.handshake_again(session_key),
                None => warn!("[process_handshake] station asked again without a key"),
            },
            HandshakeStage::Start => {
                warn!("[process_handshake] unexpected handshake start from station");
            }
        }
    }
}

impl Messenger for ClientMessenger {
    fn current_user(&self) -> Option<Id> {
        self.session.current_user()
    }

    fn send_content(&self, receiver: &Id, content: Content, priority: Priority) -> bool {
        let Some(sender) = self.session.current_user() else {
            error!("[send_content] no current user");
            return false;
        };
        let message = InstantMessage::new(sender, receiver.clone(), content);
        self.send_message(message, priority, None)
    }

    fn send_to_station(&self, content: Content, priority: Priority) -> bool {
        let station = self.session.station().clone();
        self.send_content(&station, content, priority)
    }

    fn query_group_info(&self, group: &Id, members: &[Id]) -> bool {
        if group.is_broadcast() || members.is_empty() {
            return false;
        }
        let now = Instant::now();
        let due: Vec<Id> = {
            let mut expires = self.query_expires.lock();
            let times = expires.entry(group.clone()).or_default();
            members
                .iter()
                .filter(|member| match times.get(*member) {
                    Some(next) if now < *next => false,
                    _ => {
                        times.insert((*member).clone(), now + self.query_interval);
                        true
                    }
                })
                .cloned()
                .collect()
        };

        let mut checking = false;
        for member in due {
            info!("[query_group_info] querying {group} from {member}");
            let query = Content::Group(GroupCommand::query(group));
            if self.send_content(&member, query, Priority::Normal) {
                checking = true;
            }
        }
        checking
    }
}

impl StationDelegate for ClientMessenger {
    fn on_receive_package(&self, data: Vec<u8>) {
        self.process_package(&data);
    }

    fn on_handshake_accepted(&self, _session_key: &str) {
        info!(
            "[on_handshake_accepted] session with {} is ready",
            self.session.station()
        );
    }

    fn did_fail_to_send_package(&self, payload: &[u8], error: &DeliveryServiceError) {
        warn!(
            "[did_fail_to_send_package] {} bytes not delivered: {error}",
            payload.len()
        );
    }
}
