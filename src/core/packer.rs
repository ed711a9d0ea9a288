//! Packing boundary between logical messages and wire payloads.
//!
//! Signing, encryption and the real wire format belong to the identity SDK.
//! The core only needs the two calls on [`Packer`] and one distinguishable
//! failure: [`PackError::MissingKey`], raised when the receiver's encryption
//! key is not known yet. Callers react to it by suspending the message.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::core::commands::InstantMessage;
use crate::core::types::Id;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Encryption key for {0} is not available")]
    MissingKey(Id),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("An unknown error occurred: {0}")]
    Other(anyhow::Error),
}

impl PackError {
    /// Resolution faults are retried later, everything else is dropped.
    pub fn is_resolution_fault(&self) -> bool {
        matches!(self, PackError::MissingKey(_))
    }
}

pub trait Packer: Send + Sync {
    fn pack(&self, message: &InstantMessage) -> Result<Vec<u8>, PackError>;

    fn unpack(&self, data: &[u8]) -> Result<InstantMessage, PackError>;
}

/// Unsigned JSON packer for development and tests.
///
/// With a key registry enabled, packing for a receiver that was never
/// [`register`](JsonPacker::register)ed fails with `MissingKey`, the same way
/// a real packer fails before the receiver's visa arrives.
#[derive(Default)]
pub struct JsonPacker {
    known: RwLock<Option<HashSet<Id>>>,
}

impl JsonPacker {
    /// Packer that can reach every receiver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Packer that can only reach registered receivers.
    pub fn with_key_registry() -> Self {
        Self {
            known: RwLock::new(Some(HashSet::new())),
        }
    }

    pub fn register(&self, id: &Id) {
        if let Some(known) = self.known.write().as_mut() {
            known.insert(id.clone());
        }
    }

    pub fn has_key(&self, id: &Id) -> bool {
        if id.is_broadcast() {
            return true;
        }
        match self.known.read().as_ref() {
            Some(known) => known.contains(id),
            None => true,
        }
    }
}

impl Packer for JsonPacker {
    fn pack(&self, message: &InstantMessage) -> Result<Vec<u8>, PackError> {
        if !self.has_key(&message.receiver) {
            return Err(PackError::MissingKey(message.receiver.clone()));
        }
        Ok(serde_json::to_vec(message)?)
    }

    fn unpack(&self, data: &[u8]) -> Result<InstantMessage, PackError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::commands::{Content, HandshakeCommand};

    fn message_to(receiver: &str) -> InstantMessage {
        InstantMessage::new(
            Id::from("alice@x"),
            Id::from(receiver),
            Content::Handshake(HandshakeCommand::start(None, None)),
        )
    }

    #[test]
    fn test_open_packer_round_trip() {
        let packer = JsonPacker::new();
        let msg = message_to("station@x");
        let data = packer.pack(&msg).unwrap();
        assert_eq!(packer.unpack(&data).unwrap(), msg);
    }

    #[test]
    fn test_registry_reports_missing_key() {
        let packer = JsonPacker::with_key_registry();
        let err = packer.pack(&message_to("bob@x")).unwrap_err();
        assert!(err.is_resolution_fault());
        assert!(matches!(err, PackError::MissingKey(id) if id == Id::from("bob@x")));

        packer.register(&Id::from("bob@x"));
        assert!(packer.pack(&message_to("bob@x")).is_ok());
        assert!(packer.pack(&message_to("everyone@everywhere")).is_ok());
    }

    #[test]
    fn test_garbage_is_not_a_resolution_fault() {
        let err = JsonPacker::new().unpack(b"not json").unwrap_err();
        assert!(!err.is_resolution_fault());
    }
}
