//! Outbound payload bookkeeping for a session.
//!
//! Payloads wait in a FIFO list until the session is running. Once handed
//! to the gate, a payload's completion handler is parked in the in-flight
//! table under [`payload_key`] until the gate reports the outcome. Both
//! structures live behind one lock.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::ds::{DeliveryServiceError, Priority};

/// Called once with the final outcome of a send.
pub type CompletionHandler = Box<dyn FnOnce(Result<(), DeliveryServiceError>) + Send + 'static>;

/// Lookup key of an in-flight payload: Base64 of its SHA-256 digest.
pub fn payload_key(payload: &[u8]) -> String {
    BASE64.encode(Sha256::digest(payload))
}

pub struct PendingRequest {
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub handler: Option<CompletionHandler>,
}

impl PendingRequest {
    pub fn new(payload: Vec<u8>, priority: Priority, handler: Option<CompletionHandler>) -> Self {
        Self {
            priority,
            payload,
            handler,
        }
    }

    pub fn key(&self) -> String {
        payload_key(&self.payload)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("priority", &self.priority)
            .field("len", &self.payload.len())
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Default)]
struct QueueInner {
    waiting: VecDeque<PendingRequest>,
    /// Same-key payloads complete in the order they were sent.
    in_flight: HashMap<String, VecDeque<CompletionHandler>>,
}

#[derive(Default)]
pub struct DeliveryQueue {
    inner: Mutex<QueueInner>,
}

impl DeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, request: PendingRequest) {
        self.inner.lock().waiting.push_back(request);
    }

    /// Return a request that could not be sent to the head of the line.
    pub fn push_front(&self, request: PendingRequest) {
        self.inner.lock().waiting.push_front(request);
    }

    pub fn pop_front(&self) -> Option<PendingRequest> {
        self.inner.lock().waiting.pop_front()
    }

    /// Park `handler` until the outcome for `payload` is reported.
    pub fn register_in_flight(&self, payload: &[u8], handler: CompletionHandler) {
        self.inner
            .lock()
            .in_flight
            .entry(payload_key(payload))
            .or_default()
            .push_back(handler);
    }

    /// Remove the oldest handler registered for `payload`.
    pub fn take_in_flight(&self, payload: &[u8]) -> Option<CompletionHandler> {
        let key = payload_key(payload);
        let mut inner = self.inner.lock();
        let handlers = inner.in_flight.get_mut(&key)?;
        let handler = handlers.pop_front();
        if handlers.is_empty() {
            inner.in_flight.remove(&key);
        }
        handler
    }

    /// Fire the handler for `payload`, outside the lock.
    pub fn complete(&self, payload: &[u8], result: Result<(), DeliveryServiceError>) -> bool {
        match self.take_in_flight(payload) {
            Some(handler) => {
                handler(result);
                true
            }
            None => false,
        }
    }

    pub fn waiting_len(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.values().map(VecDeque::len).sum()
    }
}
