//! Transport-agnostic gate interface.
//!
//! A [`Gate`] owns the socket towards one station. The core never blocks on
//! it: `send` only initiates a transfer and the final outcome is reported
//! back through [`GateDelegate::on_sent`]. Status changes are reported through
//! [`GateDelegate::on_status_changed`], which is what drives the connection
//! state machine.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::ds::DeliveryServiceError;

pub const DEFAULT_STATION_HOST: &str = "127.0.0.1";
pub const DEFAULT_STATION_PORT: u16 = 9394;

/// Connection status as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateStatus {
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStatus::Connecting => "connecting",
            GateStatus::Connected => "connected",
            GateStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Framing-level priority. Lower values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Priority {
    Urgent,
    #[default]
    Normal,
    Slower,
}

impl Priority {
    pub fn value(self) -> i32 {
        match self {
            Priority::Urgent => -1,
            Priority::Normal => 0,
            Priority::Slower => 1,
        }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateOptions {
    pub host: String,
    pub port: u16,
    /// Host name to address overrides, consulted before system DNS.
    pub dns_overrides: HashMap<String, String>,
    /// Fallback `host:port` entries tried after the primary address.
    pub alternates: Vec<String>,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_STATION_HOST.to_string(),
            port: DEFAULT_STATION_PORT,
            dns_overrides: HashMap::new(),
            alternates: Vec::new(),
        }
    }
}

impl GateOptions {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Host after applying DNS overrides.
    pub fn resolved_host(&self) -> &str {
        self.dns_overrides
            .get(&self.host)
            .map(String::as_str)
            .unwrap_or(&self.host)
    }

    /// Primary address first, then alternates.
    pub fn addresses(&self) -> Vec<String> {
        let mut all = vec![format!("{}:{}", self.resolved_host(), self.port)];
        all.extend(self.alternates.iter().cloned());
        all
    }
}

/// Callbacks from a gate to its owner.
pub trait GateDelegate: Send + Sync {
    fn on_status_changed(&self, previous: GateStatus, current: GateStatus);

    /// A complete package arrived from the station.
    fn on_received(&self, payload: Vec<u8>);

    /// Final outcome of an earlier [`Gate::send`].
    fn on_sent(&self, payload: &[u8], result: Result<(), DeliveryServiceError>);
}

pub trait Gate: Send + Sync {
    fn status(&self) -> GateStatus;

    fn connect(&self, options: &GateOptions) -> Result<(), DeliveryServiceError>;

    fn disconnect(&self);

    /// Initiate sending `payload`. An `Ok` only means the transfer was accepted.
    fn send(&self, payload: &[u8], priority: Priority) -> Result<(), DeliveryServiceError>;

    fn enter_background(&self) {}

    fn enter_foreground(&self) {}
}

/// Creates gates for the session, once per (re)start.
pub trait GateFactory: Send + Sync {
    fn create(&self, delegate: Weak<dyn GateDelegate>) -> Arc<dyn Gate>;
}
