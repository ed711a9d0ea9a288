/// Errors originating from the transport gate.
///
/// Transport faults never cross the core boundary as errors: the session
/// observes them through [`GateStatus`](crate::ds::GateStatus). These values
/// only describe why a single `send` could not be initiated or completed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryServiceError {
    #[error("Gate is not connected (status: {0})")]
    NotConnected(String),
    #[error("No gate available")]
    NoGate,
    #[error("Gate send failed: {0}")]
    SendFailed(String),
    #[error("Gate connect failed: {0}")]
    ConnectFailed(String),
}
