//! Client application layer.
//!
//! Wires the protocol core to a station connection:
//!
//! - [`Session`] - Gate, connection state machine and delivery queue for one
//!   station
//! - [`ConnectionStateMachine`] - Table-driven connection states
//! - [`DeliveryQueue`] - Waiting list plus in-flight completion handlers
//! - [`ClientMessenger`] - Packs outbound content, dispatches inbound content
//! - [`spawn_ticker`] - Periodic ticking driven by a [`TickScheduler`]
//!
//! # Usage
//!
//! ```ignore
//! use sechat::app::{ClientMessenger, Session};
//!
//! let session = Session::with_defaults(station, packer, factory);
//! let messenger = ClientMessenger::new(session.clone(), DEFAULT_QUERY_INTERVAL);
//! session.set_current_user(Some(me));
//! session.start(options);
//! ```

mod delivery_queue;
mod messenger;
mod scheduler;
mod session;
mod state_machine;

pub use delivery_queue::{payload_key, CompletionHandler, DeliveryQueue, PendingRequest};
pub use messenger::{ClientMessenger, DEFAULT_QUERY_INTERVAL};
pub use scheduler::{
    spawn_ticker, IntervalScheduler, TickScheduler, TickSchedulerConfig, DEFAULT_TICK_INTERVAL,
};
pub use session::{Session, StationDelegate};
pub use state_machine::{
    ConnectionState, ConnectionStateMachine, Guard, MachineContext, MachineStatus, StateChange,
    StateChangeHandler, Transition, HANDSHAKE_TIMEOUT,
};
