//! Error types surfaced by a live session

use super::access::Rejection;
use super::invite::InviteError;
use super::permissions::Action;
use crate::config::ConfigError;
use crate::core_crypto::CryptoError;
use crate::core_doc::DocError;
use crate::core_relay::RelayError;
use crate::core_transport::TransportError;
use crate::logging::LoggingError;
use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Bad proof, banned participant, unusable invite
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Room is full")]
    RoomFull,

    #[error("Room is locked")]
    Locked,

    /// AEAD check failed (wrong key, tampered frame)
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Signaling failure: {0}")]
    SignalingFailure(String),

    #[error("Malformed update: {0}")]
    MalformedUpdate(String),

    #[error("Only the host may do this")]
    NotHost,

    #[error("Permission denied: {0:?}")]
    PermissionDenied(Action),

    #[error("Room has ended")]
    RoomEnded,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    /// The session task is gone (left, kicked, ended)
    #[error("Session closed")]
    SessionClosed,
}

impl SessionError {
    /// Access-control failures end the join attempt; nothing retries them
    pub fn is_access_failure(&self) -> bool {
        matches!(
            self,
            SessionError::AccessDenied(_)
                | SessionError::RoomFull
                | SessionError::Locked
                | SessionError::RoomEnded
                | SessionError::RoomNotFound(_)
        )
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailed | CryptoError::InvalidCiphertext(_) => {
                SessionError::AuthenticationFailed
            }
            other => SessionError::InvalidInput(other.to_string()),
        }
    }
}

impl From<DocError> for SessionError {
    fn from(err: DocError) -> Self {
        match err {
            DocError::MalformedUpdate(msg) => SessionError::MalformedUpdate(msg),
            other => SessionError::InvalidInput(other.to_string()),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::PeerNotFound(peer) => SessionError::PeerNotFound(peer),
            other => SessionError::Transport(other.to_string()),
        }
    }
}

impl From<RelayError> for SessionError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::RoomFull => SessionError::RoomFull,
            RelayError::Locked => SessionError::Locked,
            RelayError::RoomEnded => SessionError::RoomEnded,
            RelayError::AccessDenied(msg) => SessionError::AccessDenied(msg),
            RelayError::RoomNotFound(room) => SessionError::RoomNotFound(room),
            RelayError::NotHost(_) => SessionError::NotHost,
            other => SessionError::Relay(other.to_string()),
        }
    }
}

impl From<Rejection> for SessionError {
    fn from(rejection: Rejection) -> Self {
        RelayError::from(rejection).into()
    }
}

impl From<InviteError> for SessionError {
    fn from(err: InviteError) -> Self {
        SessionError::AccessDenied(err.to_string())
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<LoggingError> for SessionError {
    fn from(err: LoggingError) -> Self {
        SessionError::Logging(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(SessionError::RoomFull.to_string(), "Room is full");
        assert_eq!(
            SessionError::PermissionDenied(Action::Chat).to_string(),
            "Permission denied: Chat"
        );
    }

    #[test]
    fn test_relay_errors_keep_their_meaning() {
        assert_eq!(SessionError::from(RelayError::RoomFull), SessionError::RoomFull);
        assert_eq!(SessionError::from(RelayError::Locked), SessionError::Locked);
        assert_eq!(
            SessionError::from(RelayError::NotHost("lock".into())),
            SessionError::NotHost
        );
        assert!(matches!(
            SessionError::from(RelayError::Unavailable("down".into())),
            SessionError::Relay(_)
        ));
        assert!(matches!(
            SessionError::from(Rejection::Banned),
            SessionError::AccessDenied(_)
        ));
    }

    #[test]
    fn test_crypto_and_doc_conversions() {
        assert_eq!(
            SessionError::from(CryptoError::AuthenticationFailed),
            SessionError::AuthenticationFailed
        );
        assert!(matches!(
            SessionError::from(DocError::MalformedUpdate("empty".into())),
            SessionError::MalformedUpdate(_)
        ));
    }

    #[test]
    fn test_access_failures_are_terminal() {
        assert!(SessionError::Locked.is_access_failure());
        assert!(SessionError::AccessDenied("banned".into()).is_access_failure());
        assert!(!SessionError::Transport("reset".into()).is_access_failure());
    }
}
