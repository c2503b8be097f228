/*
    errors.rs - Relay/metadata service errors
*/

use crate::core_session::access::Rejection;
use crate::core_session::invite::InviteError;
use crate::core_session::participant::ParticipantStatus;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Bad proof, banned participant, unusable invite
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Room is full")]
    RoomFull,

    #[error("Room is locked")]
    Locked,

    #[error("Room has ended")]
    RoomEnded,

    #[error("Only the host may {0}")]
    NotHost(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: ParticipantStatus,
        to: ParticipantStatus,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Service could not be reached; callers retry
    #[error("Relay unavailable: {0}")]
    Unavailable(String),
}

impl From<Rejection> for RelayError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Ended => RelayError::RoomEnded,
            Rejection::Locked => RelayError::Locked,
            Rejection::Full => RelayError::RoomFull,
            other => RelayError::AccessDenied(other.to_string()),
        }
    }
}

impl From<InviteError> for RelayError {
    fn from(err: InviteError) -> Self {
        RelayError::AccessDenied(err.to_string())
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_mapping() {
        assert_eq!(RelayError::from(Rejection::Full), RelayError::RoomFull);
        assert_eq!(RelayError::from(Rejection::Locked), RelayError::Locked);
        assert!(matches!(
            RelayError::from(Rejection::Banned),
            RelayError::AccessDenied(_)
        ));
        assert!(matches!(
            RelayError::from(InviteError::InviteExpired),
            RelayError::AccessDenied(msg) if msg.contains("expired")
        ));
    }
}
