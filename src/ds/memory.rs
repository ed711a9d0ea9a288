//! In-process gate.
//!
//! No socket is opened. Status changes, inbound packages and send outcomes
//! are injected by the caller, which makes the gate suitable for tests and
//! for embedding the core behind a custom transport loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, info};
use parking_lot::Mutex;

use crate::ds::{
    DeliveryServiceError, Gate, GateDelegate, GateFactory, GateOptions, GateStatus, Priority,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub payload: Vec<u8>,
    pub priority: Priority,
}

pub struct MemoryGate {
    delegate: Weak<dyn GateDelegate>,
    status: Mutex<GateStatus>,
    options: Mutex<Option<GateOptions>>,
    sent: Mutex<Vec<SentPacket>>,
    reject_sends: AtomicBool,
    drop_after: AtomicUsize,
    background: AtomicBool,
}

impl MemoryGate {
    pub fn new(delegate: Weak<dyn GateDelegate>) -> Self {
        Self {
            delegate,
            status: Mutex::new(GateStatus::Connecting),
            options: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            reject_sends: AtomicBool::new(false),
            drop_after: AtomicUsize::new(0),
            background: AtomicBool::new(false),
        }
    }

    /// Change the status and notify the delegate if it actually changed.
    pub fn set_status(&self, status: GateStatus) {
        let previous = {
            let mut current = self.status.lock();
            std::mem::replace(&mut *current, status)
        };
        if previous == status {
            return;
        }
        debug!("[set_status] {previous} -> {status}");
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_status_changed(previous, status);
        }
    }

    /// Deliver an inbound package to the delegate.
    pub fn receive(&self, payload: Vec<u8>) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_received(payload);
        }
    }

    /// Report the final outcome of an earlier send.
    pub fn complete(&self, payload: &[u8], result: Result<(), DeliveryServiceError>) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_sent(payload, result);
        }
    }

    /// Make subsequent `send` calls fail synchronously.
    pub fn reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Lose the connection right after the `count`-th next accepted send.
    /// Zero disables it.
    pub fn drop_after_sends(&self, count: usize) {
        self.drop_after.store(count, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<SentPacket> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn options(&self) -> Option<GateOptions> {
        self.options.lock().clone()
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::SeqCst)
    }
}

impl Gate for MemoryGate {
    fn status(&self) -> GateStatus {
        *self.status.lock()
    }

    fn connect(&self, options: &GateOptions) -> Result<(), DeliveryServiceError> {
        info!("[connect] connecting to {}", options.addresses().join(", "));
        *self.options.lock() = Some(options.clone());
        self.set_status(GateStatus::Connecting);
        Ok(())
    }

    fn disconnect(&self) {
        info!("[disconnect] closing gate");
        self.set_status(GateStatus::Error);
    }

    fn send(&self, payload: &[u8], priority: Priority) -> Result<(), DeliveryServiceError> {
        if self.reject_sends.load(Ordering::SeqCst) {
            return Err(DeliveryServiceError::SendFailed(
                "memory gate rejects sends".to_string(),
            ));
        }
        let status = self.status();
        if status != GateStatus::Connected {
            return Err(DeliveryServiceError::NotConnected(status.to_string()));
        }
        self.sent.lock().push(SentPacket {
            payload: payload.to_vec(),
            priority,
        });
        let countdown = self
            .drop_after
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if countdown == Ok(1) {
            debug!("[send] dropping connection after send");
            self.set_status(GateStatus::Error);
        }
        Ok(())
    }

    fn enter_background(&self) {
        self.background.store(true, Ordering::SeqCst);
    }

    fn enter_foreground(&self) {
        self.background.store(false, Ordering::SeqCst);
    }
}

/// Factory that keeps every gate it created, newest last.
#[derive(Default)]
pub struct MemoryGateFactory {
    gates: Mutex<Vec<Arc<MemoryGate>>>,
}

impl MemoryGateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<Arc<MemoryGate>> {
        self.gates.lock().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.gates.lock().len()
    }
}

impl GateFactory for MemoryGateFactory {
    fn create(&self, delegate: Weak<dyn GateDelegate>) -> Arc<dyn Gate> {
        let gate = Arc::new(MemoryGate::new(delegate));
        self.gates.lock().push(gate.clone());
        gate
    }
}
