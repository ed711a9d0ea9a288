mod error;
mod memory;
mod transport;

pub use error::DeliveryServiceError;
pub use memory::{MemoryGate, MemoryGateFactory, SentPacket};
pub use transport::{
    Gate, GateDelegate, GateFactory, GateOptions, GateStatus, Priority, DEFAULT_STATION_HOST,
    DEFAULT_STATION_PORT,
};
