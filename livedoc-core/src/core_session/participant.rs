//! Participant records and their status lifecycle
//!
//! ```text
//! (new) -> pending -> approved -> kicked -> pending (new invite)
//!             |          |          |
//!             +----------+----------+--> banned (terminal)
//! ```

use crate::core_model::{PeerId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantStatus {
    /// Waiting for host approval
    Pending,
    Approved,
    /// Terminal; survives reconnection
    Banned,
    /// Removed by the host; needs a new invite to come back
    Kicked,
}

impl ParticipantStatus {
    /// Whether the host may move a participant from `self` to `next`
    pub fn can_become(self, next: ParticipantStatus) -> bool {
        use ParticipantStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Banned, _) => false,
            (Pending, Approved) | (Pending, Banned) => true,
            (Approved, Kicked) | (Approved, Banned) => true,
            (Kicked, Pending) | (Kicked, Banned) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantStatus::Pending => "pending",
            ParticipantStatus::Approved => "approved",
            ParticipantStatus::Banned => "banned",
            ParticipantStatus::Kicked => "kicked",
        };
        f.write_str(s)
    }
}

/// A participant as stored by the relay, keyed by the stable user id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub user_id: UserId,
    /// Current session's peer id; changes on every reconnect
    pub peer_id: PeerId,
    pub display_name: String,
    pub role: Role,
    pub status: ParticipantStatus,
    pub online: bool,
    pub joined_at: Timestamp,
}

impl ParticipantRecord {
    pub fn host(user_id: UserId, peer_id: PeerId, display_name: impl Into<String>) -> Self {
        ParticipantRecord {
            user_id,
            peer_id,
            display_name: display_name.into(),
            role: Role::Host,
            status: ParticipantStatus::Approved,
            online: true,
            joined_at: Timestamp::now(),
        }
    }

    pub fn guest(
        user_id: UserId,
        peer_id: PeerId,
        display_name: impl Into<String>,
        status: ParticipantStatus,
    ) -> Self {
        ParticipantRecord {
            user_id,
            peer_id,
            display_name: display_name.into(),
            role: Role::Guest,
            status,
            online: true,
            joined_at: Timestamp::now(),
        }
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    pub fn is_approved(&self) -> bool {
        self.status == ParticipantStatus::Approved
    }

    /// Approved and currently online
    pub fn holds_seat(&self) -> bool {
        self.is_approved() && self.online
    }
}
