//! Sechat client protocol core.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ app: Session · ConnectionStateMachine · DeliveryQueue        │
//! │      ClientMessenger · spawn_ticker                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │ core: GroupManager · GroupCommandProcessor · Packer          │
//! │       GroupStore · EntityDirectory · message model           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ds: Gate · GateFactory · GateDelegate · MemoryGate           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `core` layer has no knowledge of connections; it talks to the
//! outside world through the [`crate::core::Messenger`] trait, which
//! [`app::ClientMessenger`] implements on top of a [`app::Session`].

pub mod app;
pub mod config;
pub mod core;
pub mod ds;

pub use config::{ClientConfig, ConfigError};

/// Initialize `env_logger` from `RUST_LOG`, defaulting to `info`.
///
/// Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
