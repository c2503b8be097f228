/*
    errors.rs - Peer transport errors
*/

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Socket-level failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Remote endpoint could not be reached (unknown, partitioned, refused)
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    #[error("No link to peer {0}")]
    PeerNotFound(String),

    /// Outbound queue full; frame dropped
    #[error("Send queue full for peer {0}")]
    QueueFull(String),

    #[error("Link closed")]
    Closed,

    #[error("Driver shut down")]
    Shutdown,
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
