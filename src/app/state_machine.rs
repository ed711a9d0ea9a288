//! Connection state machine for one station session.
//!
//! ```text
//!            ┌─────────┐ identity && (connecting|connected)  ┌────────────┐
//!     ┌─────►│ Default ├────────────────────────────────────►│ Connecting │
//!     │      └─────────┘                                     └──┬──────┬──┘
//!     │           ▲                                     connected│      │error
//!     │ !error    │ no session key                               ▼      │
//!     │      ┌────┴────┐ session key  ┌─────────────┐ identity ┌───────────┐
//!     │      │ Running │◄─────────────┤ Handshaking │◄─────────┤ Connected │
//!     │      └────┬────┘              └──┬───────┬──┘          └───────────┘
//!     │           │ !connected  !connected│       │ timeout && connected ▲
//!     │           ▼                       ▼       └──────────────────────┘
//!     │      ┌─────────┐◄─────────────────┘
//!     └──────┤  Error  │◄───────────────────────────── (from Connecting)
//!            └─────────┘
//! ```
//!
//! Transitions are plain data: each state owns an ordered table of
//! [`Transition`]s whose guards are pure functions of a [`MachineContext`].
//! [`ConnectionStateMachine::evaluate`] takes the first transition whose
//! guard holds, and never more than one per call. Side effects of entering a
//! state are the owner's business (see `Session`).

use std::fmt::Display;
use std::time::{Duration, Instant};

use log::info;

use crate::ds::GateStatus;

/// How long a handshake may stay unanswered before it is retried.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(120);

/// Receives every state entry, e.g. to show a "reconnecting" status.
pub trait StateChangeHandler: Send + Sync {
    fn on_state_changed(&self, previous: ConnectionState, current: ConnectionState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Default,
    Connecting,
    Connected,
    Handshaking,
    Running,
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            ConnectionState::Default => "default",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Running => "running",
            ConnectionState::Error => "error",
        };
        write!(f, "{state}")
    }
}

/// Everything a guard may look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineContext {
    pub has_identity: bool,
    pub status: GateStatus,
    pub has_session_key: bool,
    pub time_in_state: Duration,
    pub handshake_timeout: Duration,
}

pub type Guard = fn(&MachineContext) -> bool;

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub target: ConnectionState,
    pub guard: Guard,
}

fn default_to_connecting(ctx: &MachineContext) -> bool {
    ctx.has_identity && matches!(ctx.status, GateStatus::Connecting | GateStatus::Connected)
}

fn connecting_to_connected(ctx: &MachineContext) -> bool {
    ctx.status == GateStatus::Connected
}

fn connecting_to_error(ctx: &MachineContext) -> bool {
    ctx.status == GateStatus::Error
}

fn connected_to_handshaking(ctx: &MachineContext) -> bool {
    ctx.has_identity
}

fn handshaking_to_running(ctx: &MachineContext) -> bool {
    ctx.has_session_key
}

fn handshaking_to_connected(ctx: &MachineContext) -> bool {
    ctx.time_in_state > ctx.handshake_timeout && ctx.status == GateStatus::Connected
}

fn lost_connection(ctx: &MachineContext) -> bool {
    ctx.status != GateStatus::Connected
}

fn running_to_default(ctx: &MachineContext) -> bool {
    !ctx.has_session_key
}

fn error_to_default(ctx: &MachineContext) -> bool {
    ctx.status != GateStatus::Error
}

const DEFAULT_TRANSITIONS: &[Transition] = &[Transition {
    target: ConnectionState::Connecting,
    guard: default_to_connecting,
}];

const CONNECTING_TRANSITIONS: &[Transition] = &[
    Transition {
        target: ConnectionState::Connected,
        guard: connecting_to_connected,
    },
    Transition {
        target: ConnectionState::Error,
        guard: connecting_to_error,
    },
];

const CONNECTED_TRANSITIONS: &[Transition] = &[Transition {
    target: ConnectionState::Handshaking,
    guard: connected_to_handshaking,
}];

const HANDSHAKING_TRANSITIONS: &[Transition] = &[
    Transition {
        target: ConnectionState::Running,
        guard: handshaking_to_running,
    },
    Transition {
        target: ConnectionState::Connected,
        guard: handshaking_to_connected,
    },
    Transition {
        target: ConnectionState::Error,
        guard: lost_connection,
    },
];

const RUNNING_TRANSITIONS: &[Transition] = &[
    Transition {
        target: ConnectionState::Error,
        guard: lost_connection,
    },
    Transition {
        target: ConnectionState::Default,
        guard: running_to_default,
    },
];

const ERROR_TRANSITIONS: &[Transition] = &[Transition {
    target: ConnectionState::Default,
    guard: error_to_default,
}];

impl ConnectionState {
    /// Outgoing transitions in evaluation order.
    pub fn transitions(self) -> &'static [Transition] {
        match self {
            ConnectionState::Default => DEFAULT_TRANSITIONS,
            ConnectionState::Connecting => CONNECTING_TRANSITIONS,
            ConnectionState::Connected => CONNECTED_TRANSITIONS,
            ConnectionState::Handshaking => HANDSHAKING_TRANSITIONS,
            ConnectionState::Running => RUNNING_TRANSITIONS,
            ConnectionState::Error => ERROR_TRANSITIONS,
        }
    }

    /// First target whose guard holds for `ctx`.
    pub fn next(self, ctx: &MachineContext) -> Option<ConnectionState> {
        self.transitions()
            .iter()
            .find(|transition| (transition.guard)(ctx))
            .map(|transition| transition.target)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    /// When the current state was entered.
    entered_at: Instant,
    status: MachineStatus,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Default,
            entered_at: Instant::now(),
            status: MachineStatus::Stopped,
        }
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> MachineStatus {
        self.status
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.entered_at)
    }

    /// Enter `Default` and begin evaluating transitions.
    pub fn start(&mut self, now: Instant) {
        info!("[start] Starting connection state machine");
        self.state = ConnectionState::Default;
        self.entered_at = now;
        self.status = MachineStatus::Running;
    }

    pub fn stop(&mut self) {
        info!("[stop] Stopping connection state machine in {}", self.state);
        self.status = MachineStatus::Stopped;
    }

    pub fn pause(&mut self) {
        if self.status == MachineStatus::Running {
            info!("[pause] Pausing in {}", self.state);
            self.status = MachineStatus::Paused;
        }
    }

    pub fn resume(&mut self) {
        if self.status == MachineStatus::Paused {
            info!("[resume] Resuming in {}", self.state);
            self.status = MachineStatus::Running;
        }
    }

    /// Take at most one transition. Does nothing unless running.
    pub fn evaluate(&mut self, ctx: &MachineContext, now: Instant) -> Option<StateChange> {
        if self.status != MachineStatus::Running {
            return None;
        }
        let target = self.state.next(ctx)?;
        let change = StateChange {
            from: self.state,
            to: target,
        };
        info!("[evaluate] Transitioning {} -> {}", change.from, change.to);
        self.state = target;
        self.entered_at = now;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(status: GateStatus, has_session_key: bool) -> MachineContext {
        MachineContext {
            has_identity: true,
            status,
            has_session_key,
            time_in_state: Duration::ZERO,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    fn running_machine() -> ConnectionStateMachine {
        let mut fsm = ConnectionStateMachine::new();
        fsm.start(Instant::now());
        fsm
    }

    #[test]
    fn test_stopped_machine_does_not_move() {
        let mut fsm = ConnectionStateMachine::new();
        assert_eq!(fsm.status(), MachineStatus::Stopped);
        assert!(fsm
            .evaluate(&ctx(GateStatus::Connected, false), Instant::now())
            .is_none());
        assert_eq!(fsm.current_state(), ConnectionState::Default);
    }

    #[test]
    fn test_happy_path_one_step_per_evaluation() {
        let mut fsm = running_machine();
        let now = Instant::now();
        let connected = ctx(GateStatus::Connected, false);

        let steps = [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Handshaking,
        ];
        for expected in steps {
            fsm.evaluate(&connected, now);
            assert_eq!(fsm.current_state(), expected);
        }
        // Waiting for the handshake response.
        assert!(fsm.evaluate(&connected, now).is_none());

        fsm.evaluate(&ctx(GateStatus::Connected, true), now);
        assert_eq!(fsm.current_state(), ConnectionState::Running);
    }

    #[test]
    fn test_no_identity_stays_default() {
        let mut fsm = running_machine();
        let mut anonymous = ctx(GateStatus::Connected, false);
        anonymous.has_identity = false;
        assert!(fsm.evaluate(&anonymous, Instant::now()).is_none());
        assert_eq!(fsm.current_state(), ConnectionState::Default);
    }

    #[test]
    fn test_handshake_timeout_falls_back_to_connected() {
        let mut fsm = running_machine();
        fsm.state = ConnectionState::Handshaking;
        fsm.entered_at = Instant::now() - Duration::from_secs(121);

        let now = Instant::now();
        let mut stalled = ctx(GateStatus::Connected, false);
        stalled.time_in_state = fsm.time_in_state(now);

        let change = fsm.evaluate(&stalled, now).unwrap();
        assert_eq!(change.to, ConnectionState::Connected);
    }

    #[test]
    fn test_handshake_not_expired_yet() {
        let mut fsm = running_machine();
        fsm.state = ConnectionState::Handshaking;
        fsm.entered_at = Instant::now() - Duration::from_secs(60);

        let now = Instant::now();
        let mut waiting = ctx(GateStatus::Connected, false);
        waiting.time_in_state = fsm.time_in_state(now);

        assert!(fsm.evaluate(&waiting, now).is_none());
        assert_eq!(fsm.current_state(), ConnectionState::Handshaking);
    }

    #[test]
    fn test_session_key_wins_over_timeout() {
        let mut expired = ctx(GateStatus::Connected, true);
        expired.time_in_state = Duration::from_secs(500);
        assert_eq!(
            ConnectionState::Handshaking.next(&expired),
            Some(ConnectionState::Running)
        );
    }

    #[test]
    fn test_running_prefers_error_over_default() {
        assert_eq!(
            ConnectionState::Running.next(&ctx(GateStatus::Error, false)),
            Some(ConnectionState::Error)
        );
        assert_eq!(
            ConnectionState::Running.next(&ctx(GateStatus::Connected, false)),
            Some(ConnectionState::Default)
        );
        assert_eq!(
            ConnectionState::Running.next(&ctx(GateStatus::Connected, true)),
            None
        );
    }

    #[test]
    fn test_pause_and_resume_keep_state() {
        let mut fsm = running_machine();
        let now = Instant::now();
        fsm.evaluate(&ctx(GateStatus::Connecting, false), now);
        assert_eq!(fsm.current_state(), ConnectionState::Connecting);

        fsm.pause();
        assert!(fsm.evaluate(&ctx(GateStatus::Connected, false), now).is_none());
        assert_eq!(fsm.current_state(), ConnectionState::Connecting);

        fsm.resume();
        fsm.evaluate(&ctx(GateStatus::Connected, false), now);
        assert_eq!(fsm.current_state(), ConnectionState::Connected);
    }

    /// Every transition taken must be the first one whose guard holds.
    #[test]
    fn test_all_status_sequences_respect_guards() {
        let statuses = [
            GateStatus::Connecting,
            GateStatus::Connected,
            GateStatus::Error,
        ];
        let length = 6;
        let total = statuses.len().pow(length);
        for seq in 0..total {
            let mut fsm = running_machine();
            let mut code = seq;
            for step in 0..length {
                let status = statuses[code % statuses.len()];
                code /= statuses.len();
                let context = ctx(status, step % 4 == 3);
                let before = fsm.current_state();
                match fsm.evaluate(&context, Instant::now()) {
                    Some(change) => {
                        assert_eq!(change.from, before);
                        let first = before
                            .transitions()
                            .iter()
                            .find(|t| (t.guard)(&context))
                            .map(|t| t.target);
                        assert_eq!(first, Some(change.to));
                        assert_eq!(fsm.current_state(), change.to);
                    }
                    None => {
                        assert_eq!(fsm.current_state(), before);
                        assert!(before.transitions().iter().all(|t| !(t.guard)(&context)));
                    }
                }
            }
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Handshaking.to_string(), "handshaking");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
