//! Room records

use crate::core_crypto::AccessProof;
use crate::core_model::{RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Smallest room the host may configure
pub const MIN_PEERS: u8 = 2;

/// Hard upper bound on participants per room
pub const MAX_PEERS: u8 = 8;

/// Room configuration as stored by the relay.
///
/// Never carries document content or key material: password rooms store a
/// salt and a one-way proof, link rooms store nothing secret at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub id: RoomId,
    pub host_id: UserId,
    /// Host-set capacity; see [`RoomRecord::effective_max_peers`]
    pub max_peers: u8,
    pub locked: bool,
    /// Guests must redeem an invite and wait for approval
    pub invite_only: bool,
    /// Hex salt for password mode
    pub password_salt: Option<String>,
    pub password_proof: Option<AccessProof>,
    pub expires_at: Option<Timestamp>,
    pub ended: bool,
    pub created_at: Timestamp,
}

/// Lifecycle phase of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomPhase {
    Open,
    Locked,
    /// Terminal: explicitly ended or expired
    Ended,
}

impl RoomRecord {
    pub fn new(id: RoomId, host_id: UserId, max_peers: u8) -> Self {
        RoomRecord {
            id,
            host_id,
            max_peers,
            locked: false,
            invite_only: false,
            password_salt: None,
            password_proof: None,
            expires_at: None,
            ended: false,
            created_at: Timestamp::now(),
        }
    }

    /// Switch the room to password mode
    pub fn with_password(mut self, salt: String, proof: AccessProof) -> Self {
        self.password_salt = Some(salt);
        self.password_proof = Some(proof);
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_invite_only(mut self, invite_only: bool) -> Self {
        self.invite_only = invite_only;
        self
    }

    /// Capacity actually enforced, clamped to the supported range
    pub fn effective_max_peers(&self) -> u8 {
        self.max_peers.clamp(MIN_PEERS, MAX_PEERS)
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_salt.is_some() && self.password_proof.is_some()
    }

    pub fn is_host(&self, user_id: &UserId) -> bool {
        &self.host_id == user_id
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|at| at.has_passed(now))
    }

    pub fn phase(&self, now: Timestamp) -> RoomPhase {
        if self.ended || self.is_expired(now) {
            RoomPhase::Ended
        } else if self.locked {
            RoomPhase::Locked
        } else {
            RoomPhase::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn room(max_peers: u8) -> RoomRecord {
        RoomRecord::new(RoomId::new("r"), UserId::new("host"), max_peers)
    }

    #[test]
    fn test_effective_max_peers_is_clamped() {
        assert_eq!(room(0).effective_max_peers(), 2);
        assert_eq!(room(5).effective_max_peers(), 5);
        assert_eq!(room(200).effective_max_peers(), 8);
    }

    #[test]
    fn test_phase_transitions() {
        let now = Timestamp::now();
        let mut r = room(4);
        assert_eq!(r.phase(now), RoomPhase::Open);

        r.locked = true;
        assert_eq!(r.phase(now), RoomPhase::Locked);

        r.ended = true;
        assert_eq!(r.phase(now), RoomPhase::Ended);
    }

    #[test]
    fn test_expiry_ends_room() {
        let now = Timestamp::now();
        let r = room(4).with_expiry(now.after(Duration::from_secs(60)));
        assert_eq!(r.phase(now), RoomPhase::Open);
        assert_eq!(
            r.phase(now.after(Duration::from_secs(61))),
            RoomPhase::Ended
        );
    }
}
