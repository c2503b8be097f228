/*
    traits.rs - Relay/metadata service contract

    The relay stores room configuration, participant records, invites and
    permission grants, and offers a broadcast primitive keyed by room id for
    signaling. It never sees document content or keys.

    Operations taking an `actor` are host-only: the relay rejects them with
    `NotHost` unless `actor` is the room's host.
*/

use super::errors::RelayResult;
use crate::core_crypto::AccessProof;
use crate::core_model::{PeerId, RoomId, Timestamp, UserId};
use crate::core_session::invite::RoomInvite;
use crate::core_session::participant::{ParticipantRecord, ParticipantStatus};
use crate::core_session::permissions::PermissionGrant;
use crate::core_session::room::RoomRecord;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A join attempt presented to the relay
#[derive(Debug, Clone)]
pub struct SeatClaim {
    pub user_id: UserId,
    pub peer_id: PeerId,
    pub display_name: String,
    /// Proof for password rooms
    pub proof: Option<AccessProof>,
    /// Invite presented with this attempt; one use is consumed only when
    /// the seat is granted
    pub invite_code: Option<String>,
}

#[async_trait]
pub trait Relay: Send + Sync {
    async fn get_room(&self, room_id: &RoomId) -> RelayResult<RoomRecord>;

    /// Create or replace the room record (host-only once the room exists)
    async fn upsert_room(&self, actor: &UserId, record: RoomRecord) -> RelayResult<()>;

    async fn set_room_locked(&self, actor: &UserId, room_id: &RoomId, locked: bool) -> RelayResult<()>;

    /// Check a client-computed proof; answers only yes/no
    async fn verify_proof(&self, room_id: &RoomId, proof: &AccessProof) -> RelayResult<bool>;

    /// Atomically admit a participant (capacity, lock, ban and proof checks)
    async fn claim_seat(&self, room_id: &RoomId, claim: SeatClaim) -> RelayResult<ParticipantRecord>;

    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> RelayResult<Option<ParticipantRecord>>;

    async fn list_participants(&self, room_id: &RoomId) -> RelayResult<Vec<ParticipantRecord>>;

    async fn set_participant_status(
        &self,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        status: ParticipantStatus,
    ) -> RelayResult<ParticipantRecord>;

    /// Mark the caller's own record online/offline
    async fn set_presence(&self, room_id: &RoomId, user_id: &UserId, online: bool) -> RelayResult<()>;

    async fn create_invite(
        &self,
        actor: &UserId,
        room_id: &RoomId,
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
    ) -> RelayResult<RoomInvite>;

    async fn redeem_invite(&self, room_id: &RoomId, code: &str) -> RelayResult<RoomInvite>;

    async fn revoke_invite(&self, actor: &UserId, room_id: &RoomId, code: &str) -> RelayResult<()>;

    async fn get_grants(&self, room_id: &RoomId) -> RelayResult<Vec<PermissionGrant>>;

    /// Store a grant, replacing any grant with the same target
    async fn put_grant(&self, actor: &UserId, room_id: &RoomId, grant: PermissionGrant) -> RelayResult<()>;

    /// Broadcast an opaque signaling payload to every subscriber of the room
    async fn publish_signal(&self, room_id: &RoomId, payload: String) -> RelayResult<()>;

    async fn subscribe_signals(&self, room_id: &RoomId) -> RelayResult<broadcast::Receiver<String>>;

    /// Mark the room ended and drop its participant, invite and grant records
    async fn end_room(&self, actor: &UserId, room_id: &RoomId) -> RelayResult<()>;
}

pub type SharedRelay = Arc<dyn Relay>;
