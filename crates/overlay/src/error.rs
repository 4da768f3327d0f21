use corelib::NodeId;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, OverlayError>;

#[derive(thiserror::Error, Debug)]
pub enum OverlayError {
    #[error("Transport error: {0}")]
    Transport(#[from] protocol::TransportError),

    #[error("Core error: {0}")]
    Core(#[from] corelib::Error),

    #[error("Failed to start thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Gave up after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("No superpeer available")]
    NoSuperpeer,

    #[error("Failed to join the overlay: {0}")]
    JoinFailed(String),

    #[error("Lookup tree of {0} is not initialized")]
    UninitializedTree(NodeId),

    #[error("Superpeer {0} rejected the write")]
    Rejected(NodeId),

    #[error("Unexpected response {got} to {request}")]
    UnexpectedResponse { request: &'static str, got: &'static str },
}

impl OverlayError {
    /// True for errors that end a retry loop for good.
    ///
    /// Only an unreachable superpeer or an empty superpeer list is worth
    /// another attempt after re-resolving.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OverlayError::Transport(_) | OverlayError::NoSuperpeer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::TransportError;

    #[test]
    fn test_terminal_errors() {
        assert!(!OverlayError::NoSuperpeer.is_terminal());
        assert!(!OverlayError::Transport(TransportError::Unreachable(NodeId(1))).is_terminal());
        assert!(OverlayError::Cancelled.is_terminal());
        assert!(OverlayError::RetriesExhausted(3).is_terminal());
        assert!(OverlayError::UninitializedTree(NodeId(1)).is_terminal());
        assert!(OverlayError::Core(corelib::Error::InvalidNameserviceId(-1)).is_terminal());
    }
}
