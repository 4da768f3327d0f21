use corelib::NodeId;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Frame of {0} bytes is shorter than the message header")]
    FrameTooShort(usize),

    #[error("Message type {0} is not a lookup message")]
    UnknownType(u8),

    #[error("Header subtype {header} does not match payload subtype {payload}")]
    SubtypeMismatch { header: u8, payload: u8 },
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("Request to node {0} timed out")]
    Timeout(NodeId),

    #[error("Node {0} answered without a response message")]
    NoResponse(NodeId),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to start dispatcher: {0}")]
    Spawn(#[from] std::io::Error),
}

impl TransportError {
    /// True for errors that mean the remote node could not be reached.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Timeout(_) | TransportError::NoResponse(_)
        )
    }
}
