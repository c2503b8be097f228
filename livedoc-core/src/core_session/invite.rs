//! Room invites

use crate::core_model::{RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};

/// Invite code handed out by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInvite {
    /// Code the guest presents when joining
    pub code: String,

    pub room_id: RoomId,

    /// Who created the invite (always the host)
    pub created_by: UserId,

    pub created_at: Timestamp,

    /// Optional expiration time
    pub expires_at: Option<Timestamp>,

    /// Maximum number of redemptions (None = unlimited)
    pub max_uses: Option<u32>,

    pub uses_consumed: u32,

    pub revoked: bool,
}

impl RoomInvite {
    pub fn new(
        room_id: RoomId,
        created_by: UserId,
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
    ) -> Self {
        RoomInvite {
            code: Self::generate_invite_code(),
            room_id,
            created_by,
            created_at: Timestamp::now(),
            expires_at,
            max_uses,
            uses_consumed: 0,
            revoked: false,
        }
    }

    /// Check if the invite can still be redeemed at `now`
    pub fn check(&self, now: Timestamp) -> Result<(), InviteError> {
        if self.revoked {
            return Err(InviteError::InviteRevoked);
        }

        if let Some(expires_at) = self.expires_at {
            if expires_at.has_passed(now) {
                return Err(InviteError::InviteExpired);
            }
        }

        if let Some(max_uses) = self.max_uses {
            if self.uses_consumed >= max_uses {
                return Err(InviteError::InviteMaxUsesReached);
            }
        }

        Ok(())
    }

    /// Consume one use. Fails without side effects once exhausted or expired.
    pub fn redeem(&mut self, now: Timestamp) -> Result<(), InviteError> {
        self.check(now)?;
        self.uses_consumed += 1;
        Ok(())
    }

    pub fn revoke(&mut self) {
        self.revoked = true;
    }

    pub fn remaining_uses(&self) -> Option<u32> {
        self.max_uses
            .map(|max| max.saturating_sub(self.uses_consumed))
    }

    /// Generate a random invite code
    fn generate_invite_code() -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        const CODE_LEN: usize = 8;

        let mut rng = rand::rng();
        (0..CODE_LEN)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

/// Invite redemption errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InviteError {
    #[error("Invite has been revoked")]
    InviteRevoked,

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invite has reached maximum uses")]
    InviteMaxUsesReached,

    #[error("Invite not found")]
    InviteNotFound,

    #[error("Invite belongs to another room")]
    WrongRoom,
}
