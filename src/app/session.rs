//! One logical connection to a station.
//!
//! A [`Session`] owns the transport gate, the [`ConnectionStateMachine`] and
//! the [`DeliveryQueue`]. Gate status changes tick the machine, and entering
//! a state performs that state's side effect inside the same tick:
//!
//! | Entered       | Side effect                                           |
//! |---------------|-------------------------------------------------------|
//! | `Handshaking` | pack a handshake command and send it straight away    |
//! | `Running`     | flush the waiting list                                |
//! | `Error`       | drop the gate and reconnect with the last options     |
//!
//! A session key present means the station accepted the handshake. It is
//! cleared whenever the current user changes, which sends a running session
//! back through `Default` and into a fresh handshake.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::app::delivery_queue::{CompletionHandler, DeliveryQueue, PendingRequest};
use crate::app::state_machine::{
    ConnectionState, ConnectionStateMachine, MachineContext, MachineStatus, StateChange,
    StateChangeHandler, HANDSHAKE_TIMEOUT,
};
use crate::core::{Content, HandshakeCommand, Id, InstantMessage, Packer};
use crate::ds::{
    DeliveryServiceError, Gate, GateDelegate, GateFactory, GateOptions, GateStatus, Priority,
};

/// Receives what the station sends and how handshakes and sends end.
pub trait StationDelegate: Send + Sync {
    fn on_receive_package(&self, data: Vec<u8>);

    fn on_handshake_accepted(&self, _session_key: &str) {}

    fn did_send_package(&self, _payload: &[u8]) {}

    fn did_fail_to_send_package(&self, _payload: &[u8], _error: &DeliveryServiceError) {}
}

#[derive(Debug, Default)]
struct SessionKeys {
    identity: Option<Id>,
    /// Set once the station accepted the handshake.
    session_key: Option<String>,
    /// Key offered in the handshake currently in progress.
    offered_key: Option<String>,
    last_received: Option<i64>,
}

pub struct Session {
    station: Id,
    handshake_timeout: Duration,
    packer: Arc<dyn Packer>,
    factory: Arc<dyn GateFactory>,
    gate: RwLock<Option<Arc<dyn Gate>>>,
    options: RwLock<Option<GateOptions>>,
    keys: RwLock<SessionKeys>,
    fsm: Mutex<ConnectionStateMachine>,
    ticking: Mutex<()>,
    tick_requested: AtomicBool,
    flushing: Mutex<()>,
    flush_requested: AtomicBool,
    queue: DeliveryQueue,
    delegate: RwLock<Option<Weak<dyn StationDelegate>>>,
    state_handler: RwLock<Option<Arc<dyn StateChangeHandler>>>,
    this: Weak<Session>,
}

impl Session {
    pub fn new(
        station: Id,
        packer: Arc<dyn Packer>,
        factory: Arc<dyn GateFactory>,
        handshake_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            station,
            handshake_timeout,
            packer,
            factory,
            gate: RwLock::new(None),
            options: RwLock::new(None),
            keys: RwLock::new(SessionKeys::default()),
            fsm: Mutex::new(ConnectionStateMachine::new()),
            ticking: Mutex::new(()),
            tick_requested: AtomicBool::new(false),
            flushing: Mutex::new(()),
            flush_requested: AtomicBool::new(false),
            queue: DeliveryQueue::new(),
            delegate: RwLock::new(None),
            state_handler: RwLock::new(None),
            this: this.clone(),
        })
    }

    /// Session with the default 120 s handshake timeout.
    pub fn with_defaults(
        station: Id,
        packer: Arc<dyn Packer>,
        factory: Arc<dyn GateFactory>,
    ) -> Arc<Self> {
        Self::new(station, packer, factory, HANDSHAKE_TIMEOUT)
    }

    pub fn station(&self) -> &Id {
        &self.station
    }

    pub fn packer(&self) -> &Arc<dyn Packer> {
        &self.packer
    }

    pub fn set_delegate(&self, delegate: Weak<dyn StationDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    pub fn set_state_handler(&self, handler: Arc<dyn StateChangeHandler>) {
        *self.state_handler.write() = Some(handler);
    }

    fn delegate(&self) -> Option<Arc<dyn StationDelegate>> {
        self.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    // ─────────────────────────── Accessors ───────────────────────────

    pub fn current_state(&self) -> ConnectionState {
        self.fsm.lock().current_state()
    }

    pub fn machine_status(&self) -> MachineStatus {
        self.fsm.lock().status()
    }

    pub fn is_running(&self) -> bool {
        self.current_state() == ConnectionState::Running
    }

    /// Gate status, `Error` when there is no gate.
    pub fn status(&self) -> GateStatus {
        self.gate
            .read()
            .as_ref()
            .map(|gate| gate.status())
            .unwrap_or(GateStatus::Error)
    }

    pub fn current_user(&self) -> Option<Id> {
        self.keys.read().identity.clone()
    }

    /// Switch user. A different user invalidates the session key.
    pub fn set_current_user(&self, user: Option<Id>) {
        let mut keys = self.keys.write();
        if keys.identity == user {
            return;
        }
        info!(
            "[set_current_user] {} -> {}",
            display_id(keys.identity.as_ref()),
            display_id(user.as_ref())
        );
        keys.identity = user;
        keys.session_key = None;
        keys.offered_key = None;
    }

    pub fn session_key(&self) -> Option<String> {
        self.keys.read().session_key.clone()
    }

    /// Remember the newest message time for the next handshake.
    pub fn record_received_time(&self, time: i64) {
        let mut keys = self.keys.write();
        if keys.last_received.map_or(true, |last| time > last) {
            keys.last_received = Some(time);
        }
    }

    pub fn waiting_len(&self) -> usize {
        self.queue.waiting_len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.queue.in_flight_len()
    }

    // ─────────────────────────── Lifecycle ───────────────────────────

    pub fn start(&self, options: GateOptions) {
        info!("[start] Starting session with {}", self.station);
        *self.options.write() = Some(options.clone());
        // Stop first so closing the previous gate is not evaluated.
        self.fsm.lock().stop();
        let old = self.gate.write().take();
        if let Some(old) = old {
            old.disconnect();
        }
        self.fsm.lock().start(Instant::now());
        self.connect_gate(&options);
        self.tick();
    }

    pub fn stop(&self) {
        info!("[stop] Stopping session with {}", self.station);
        self.fsm.lock().stop();
        let gate = self.gate.write().take();
        if let Some(gate) = gate {
            gate.disconnect();
        }
    }

    /// Replace the gate and reconnect with the last used options.
    pub fn restart(&self) {
        let options = self.options.read().clone().unwrap_or_default();
        info!("[restart] Reconnecting to {}:{}", options.host, options.port);
        let old = self.gate.write().take();
        if let Some(old) = old {
            old.disconnect();
        }
        self.connect_gate(&options);
    }

    pub fn pause(&self) {
        let gate = self.gate.read().clone();
        if let Some(gate) = gate {
            gate.enter_background();
        }
        self.fsm.lock().pause();
    }

    pub fn resume(&self) {
        let gate = self.gate.read().clone();
        if let Some(gate) = gate {
            gate.enter_foreground();
        }
        self.fsm.lock().resume();
        self.tick();
    }

    fn connect_gate(&self, options: &GateOptions) {
        let delegate: Weak<dyn GateDelegate> = self.this.clone();
        let gate = self.factory.create(delegate);
        *self.gate.write() = Some(gate.clone());
        if let Err(e) = gate.connect(options) {
            error!("[connect_gate] {e}");
        }
    }

    // ─────────────────────────── Ticking ───────────────────────────

    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    /// Evaluate the state machine as of `now`.
    ///
    /// Ticks never overlap. A tick requested while another one runs is
    /// served by the running one before it returns.
    pub fn tick_at(&self, now: Instant) {
        self.tick_requested.store(true, Ordering::SeqCst);
        loop {
            {
                let Some(_ticking) = self.ticking.try_lock() else {
                    return;
                };
                while self.tick_requested.swap(false, Ordering::SeqCst) {
                    self.step(now);
                }
            }
            if !self.tick_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn step(&self, now: Instant) {
        let (has_identity, has_session_key) = {
            let keys = self.keys.read();
            (keys.identity.is_some(), keys.session_key.is_some())
        };
        let status = self.status();
        let change = {
            let mut fsm = self.fsm.lock();
            let ctx = MachineContext {
                has_identity,
                status,
                has_session_key,
                time_in_state: fsm.time_in_state(now),
                handshake_timeout: self.handshake_timeout,
            };
            fsm.evaluate(&ctx, now)
        };
        if let Some(change) = change {
            self.enter_state(change);
        }
    }

    fn enter_state(&self, change: StateChange) {
        match change.to {
            ConnectionState::Handshaking => {
                let session_key = {
                    let mut keys = self.keys.write();
                    keys.session_key.take().or_else(|| keys.offered_key.clone())
                };
                self.handshake(session_key);
            }
            ConnectionState::Running => self.flush(),
            ConnectionState::Error => self.restart(),
            ConnectionState::Default | ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        let handler = self.state_handler.read().clone();
        if let Some(handler) = handler {
            handler.on_state_changed(change.from, change.to);
        }
    }

    // ─────────────────────────── Handshake ───────────────────────────

    /// Send a handshake offering `session_key`.
    ///
    /// Ignored unless the session is handshaking over a connected gate.
    pub fn handshake(&self, session_key: Option<String>) {
        let state = self.current_state();
        let status = self.status();
        if state != ConnectionState::Handshaking || status != GateStatus::Connected {
            debug!("[handshake] skipped in state {state} with gate {status}");
            return;
        }
        let (user, last_time) = {
            let mut keys = self.keys.write();
            keys.offered_key = session_key.clone();
            (keys.identity.clone(), keys.last_received)
        };
        let Some(user) = user else {
            error!("[handshake] no current user");
            return;
        };

        let command = HandshakeCommand::start(session_key, last_time);
        let message = InstantMessage::new(user, self.station.clone(), Content::Handshake(command));
        let payload = match self.packer.pack(&message) {
            Ok(payload) => payload,
            Err(e) => {
                error!("[handshake] failed to pack handshake: {e}");
                return;
            }
        };
        info!("[handshake] Sending handshake to {}", self.station);
        if let Err(e) = self.send_direct(&payload, Priority::Urgent) {
            warn!("[handshake] failed to send handshake: {e}");
        }
    }

    /// The station asked to handshake again with a key it issued.
    pub fn handshake_again(&self, session_key: &str) {
        info!("[handshake_again] Station issued a new session key");
        self.handshake(Some(session_key.to_string()));
    }

    /// The station accepted the handshake.
    pub fn handshake_accepted(&self, session_key: Option<String>) {
        let state = self.current_state();
        if state != ConnectionState::Handshaking {
            warn!("[handshake_accepted] accepted while {state}");
        }
        let accepted = {
            let mut keys = self.keys.write();
            let key = session_key.or_else(|| keys.offered_key.take());
            keys.session_key = key.clone();
            key
        };
        let Some(key) = accepted else {
            warn!("[handshake_accepted] no session key to accept");
            return;
        };
        info!(
            "[handshake_accepted] Handshake accepted for {}",
            display_id(self.current_user().as_ref())
        );
        if let Some(delegate) = self.delegate() {
            delegate.on_handshake_accepted(&key);
        }
        self.tick();
    }

    // ─────────────────────────── Delivery ───────────────────────────

    /// Send `payload` once the session is running.
    ///
    /// The payload always joins the back of the waiting list, so it cannot
    /// overtake payloads queued before it. While running, the list is
    /// flushed right away.
    pub fn enqueue_or_send(
        &self,
        payload: Vec<u8>,
        priority: Priority,
        handler: Option<CompletionHandler>,
    ) {
        self.queue
            .push_back(PendingRequest::new(payload, priority, handler));
        if self.is_running() {
            self.flush();
        } else {
            debug!(
                "[enqueue_or_send] Queued while {}, {} waiting",
                self.current_state(),
                self.queue.waiting_len()
            );
        }
    }

    /// Send waiting payloads in order while the session stays running.
    pub fn flush(&self) {
        self.flush_requested.store(true, Ordering::SeqCst);
        loop {
            {
                let Some(_flushing) = self.flushing.try_lock() else {
                    return;
                };
                while self.flush_requested.swap(false, Ordering::SeqCst) {
                    self.drain_waiting();
                }
            }
            if !self.flush_requested.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    fn drain_waiting(&self) {
        let mut sent = 0usize;
        while self.is_running() && self.status() == GateStatus::Connected {
            let Some(request) = self.queue.pop_front() else {
                break;
            };
            match self.dispatch(request) {
                Ok(()) => sent += 1,
                Err(request) => {
                    self.queue.push_front(request);
                    break;
                }
            }
        }
        if sent > 0 {
            info!(
                "[flush] Sent {sent} payloads, {} still waiting",
                self.queue.waiting_len()
            );
        }
    }

    /// Hand one request to the gate. On failure the request is returned intact.
    fn dispatch(&self, mut request: PendingRequest) -> Result<(), PendingRequest> {
        // Registered first: a gate may report the outcome before `send` returns.
        let has_handler = match request.handler.take() {
            Some(handler) => {
                self.queue.register_in_flight(&request.payload, handler);
                true
            }
            None => false,
        };
        match self.send_direct(&request.payload, request.priority) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("[dispatch] gate refused payload {}: {e}", request.key());
                if has_handler {
                    request.handler = self.queue.take_in_flight(&request.payload);
                }
                Err(request)
            }
        }
    }

    fn send_direct(&self, payload: &[u8], priority: Priority) -> Result<(), DeliveryServiceError> {
        let gate = self
            .gate
            .read()
            .clone()
            .ok_or(DeliveryServiceError::NoGate)?;
        gate.send(payload, priority)
    }

    /// Outcome of a payload handed to the gate earlier.
    pub fn on_send_result(&self, payload: &[u8], result: Result<(), DeliveryServiceError>) {
        if let Some(delegate) = self.delegate() {
            match &result {
                Ok(()) => delegate.did_send_package(payload),
                Err(e) => delegate.did_fail_to_send_package(payload, e),
            }
        }
        if !self.queue.complete(payload, result) {
            debug!("[on_send_result] no handler registered for payload");
        }
    }
}

impl GateDelegate for Session {
    fn on_status_changed(&self, previous: GateStatus, current: GateStatus) {
        info!("[on_status_changed] Gate {previous} -> {current}");
        self.tick();
    }

    fn on_received(&self, payload: Vec<u8>) {
        match self.delegate() {
            Some(delegate) => delegate.on_receive_package(payload),
            None => warn!("[on_received] dropping package, no delegate"),
        }
    }

    fn on_sent(&self, payload: &[u8], result: Result<(), DeliveryServiceError>) {
        self.on_send_result(payload, result);
    }
}

fn display_id(id: Option<&Id>) -> String {
    id.map(Id::to_string).unwrap_or_else(|| "<none>".to_string())
}
