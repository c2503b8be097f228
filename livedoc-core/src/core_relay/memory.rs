/*
    memory.rs - In-process relay

    Implements the full relay contract over shared in-memory maps so that a
    whole room (host plus guests) can run inside one process. Every
    operation takes the lock once, which makes seat claims and approvals
    atomic with respect to each other.
*/

use super::errors::{RelayError, RelayResult};
use super::traits::{Relay, SeatClaim, SharedRelay};
use crate::core_crypto::AccessProof;
use crate::core_model::{RoomId, Timestamp, UserId};
use crate::core_session::access;
use crate::core_session::invite::{InviteError, RoomInvite};
use crate::core_session::participant::{ParticipantRecord, ParticipantStatus, Role};
use crate::core_session::permissions::PermissionGrant;
use crate::core_session::room::RoomRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

/// Signaling messages buffered per subscriber
const SIGNAL_CAPACITY: usize = 256;

struct RoomEntry {
    record: RoomRecord,
    participants: Vec<ParticipantRecord>,
    invites: HashMap<String, RoomInvite>,
    grants: Vec<PermissionGrant>,
    signals: broadcast::Sender<String>,
}

impl RoomEntry {
    fn new(record: RoomRecord) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        RoomEntry {
            record,
            participants: Vec::new(),
            invites: HashMap::new(),
            grants: Vec::new(),
            signals,
        }
    }

    fn require_host(&self, actor: &UserId, what: &str) -> RelayResult<()> {
        if self.record.is_host(actor) {
            Ok(())
        } else {
            Err(RelayError::NotHost(what.to_string()))
        }
    }

    fn require_live(&self, now: Timestamp) -> RelayResult<()> {
        if self.record.ended || self.record.is_expired(now) {
            Err(RelayError::RoomEnded)
        } else {
            Ok(())
        }
    }

    fn position(&self, user_id: &UserId) -> Option<usize> {
        self.participants.iter().position(|p| &p.user_id == user_id)
    }
}

/// In-memory relay shared by every session in the process
#[derive(Clone, Default)]
pub struct MemoryRelay {
    rooms: Arc<RwLock<HashMap<RoomId, RoomEntry>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> SharedRelay {
        Arc::new(self.clone())
    }

    /// Simulate an outage: every call fails with `Unavailable` until restored
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> RelayResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RelayError::Unavailable("relay is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn not_found(room_id: &RoomId) -> RelayError {
    RelayError::RoomNotFound(room_id.to_string())
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn get_room(&self, room_id: &RoomId) -> RelayResult<RoomRecord> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        rooms
            .get(room_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| not_found(room_id))
    }

    async fn upsert_room(&self, actor: &UserId, record: RoomRecord) -> RelayResult<()> {
        self.ensure_available()?;
        if !record.id.is_valid() {
            return Err(RelayError::InvalidRequest(format!(
                "invalid room id '{}'",
                record.id
            )));
        }

        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(&record.id) {
            Some(entry) => {
                entry.require_host(actor, "update the room")?;
                entry.require_live(Timestamp::now())?;
                if entry.record.host_id != record.host_id {
                    return Err(RelayError::InvalidRequest(
                        "host cannot be reassigned".to_string(),
                    ));
                }
                debug!(room_id = %record.id, locked = record.locked, "Room updated");
                entry.record = record;
            }
            None => {
                if !record.is_host(actor) {
                    return Err(RelayError::NotHost("create the room".to_string()));
                }
                info!(
                    room_id = %record.id,
                    max_peers = record.effective_max_peers(),
                    password = record.is_password_protected(),
                    "Room created"
                );
                rooms.insert(record.id.clone(), RoomEntry::new(record));
            }
        }
        Ok(())
    }

    async fn set_room_locked(&self, actor: &UserId, room_id: &RoomId, locked: bool) -> RelayResult<()> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "lock the room")?;
        entry.require_live(Timestamp::now())?;
        entry.record.locked = locked;
        info!(room_id = %room_id, locked, "Room lock changed");
        Ok(())
    }

    async fn verify_proof(&self, room_id: &RoomId, proof: &AccessProof) -> RelayResult<bool> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        let valid = entry
            .record
            .password_proof
            .as_ref()
            .is_some_and(|stored| stored.matches(proof));
        debug!(room_id = %room_id, valid, "Access proof verified");
        Ok(valid)
    }

    async fn claim_seat(&self, room_id: &RoomId, claim: SeatClaim) -> RelayResult<ParticipantRecord> {
        self.ensure_available()?;
        let now = Timestamp::now();
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;

        let is_host = entry.record.is_host(&claim.user_id);
        if entry.record.is_password_protected() && !is_host {
            let valid = match (&entry.record.password_proof, &claim.proof) {
                (Some(stored), Some(presented)) => stored.matches(presented),
                _ => false,
            };
            if !valid {
                warn!(room_id = %room_id, user_id = %claim.user_id, "Seat claim with invalid access proof");
                return Err(RelayError::AccessDenied("invalid access proof".to_string()));
            }
        }

        if let Some(code) = &claim.invite_code {
            entry.require_live(now)?;
            entry
                .invites
                .get(code)
                .ok_or(InviteError::InviteNotFound)?
                .check(now)?;
        }

        let status = access::admit(
            &entry.record,
            &entry.participants,
            &claim.user_id,
            claim.invite_code.is_some(),
            now,
        )
        .map_err(|rejection| {
            info!(room_id = %room_id, user_id = %claim.user_id, reason = %rejection, "Seat claim rejected");
            RelayError::from(rejection)
        })?;

        if let Some(invite) = claim.invite_code.as_ref().and_then(|code| entry.invites.get_mut(code)) {
            invite.redeem(now)?;
            debug!(room_id = %room_id, uses = invite.uses_consumed, "Invite redeemed by seat claim");
        }

        let record = match entry.position(&claim.user_id) {
            Some(idx) => {
                let existing = &mut entry.participants[idx];
                existing.peer_id = claim.peer_id;
                existing.display_name = claim.display_name;
                existing.status = status;
                existing.online = true;
                existing.clone()
            }
            None => {
                let record = if is_host {
                    ParticipantRecord::host(claim.user_id, claim.peer_id, claim.display_name)
                } else {
                    ParticipantRecord::guest(claim.user_id, claim.peer_id, claim.display_name, status)
                };
                entry.participants.push(record.clone());
                record
            }
        };

        info!(
            room_id = %room_id,
            user_id = %record.user_id,
            peer_id = %record.peer_id,
            status = %record.status,
            "Seat claimed"
        );
        Ok(record)
    }

    async fn get_participant(
        &self,
        room_id: &RoomId,
        user_id: &UserId,
    ) -> RelayResult<Option<ParticipantRecord>> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        Ok(entry
            .participants
            .iter()
            .find(|p| &p.user_id == user_id)
            .cloned())
    }

    async fn list_participants(&self, room_id: &RoomId) -> RelayResult<Vec<ParticipantRecord>> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        Ok(entry.participants.clone())
    }

    async fn set_participant_status(
        &self,
        actor: &UserId,
        room_id: &RoomId,
        user_id: &UserId,
        status: ParticipantStatus,
    ) -> RelayResult<ParticipantRecord> {
        self.ensure_available()?;
        let now = Timestamp::now();
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "change participant status")?;
        entry.require_live(now)?;

        let idx = entry
            .position(user_id)
            .ok_or_else(|| RelayError::ParticipantNotFound(user_id.to_string()))?;
        let current = &entry.participants[idx];
        if current.role == Role::Host {
            return Err(RelayError::InvalidRequest(
                "host status cannot change".to_string(),
            ));
        }
        if !current.status.can_become(status) {
            return Err(RelayError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }
        if status == ParticipantStatus::Approved && current.status != ParticipantStatus::Approved {
            access::check_approval(&entry.record, &entry.participants, now)?;
        }

        let participant = &mut entry.participants[idx];
        participant.status = status;
        info!(room_id = %room_id, user_id = %user_id, status = %status, "Participant status changed");
        Ok(participant.clone())
    }

    async fn set_presence(&self, room_id: &RoomId, user_id: &UserId, online: bool) -> RelayResult<()> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        let idx = entry
            .position(user_id)
            .ok_or_else(|| RelayError::ParticipantNotFound(user_id.to_string()))?;
        entry.participants[idx].online = online;
        debug!(room_id = %room_id, user_id = %user_id, online, "Presence updated");
        Ok(())
    }

    async fn create_invite(
        &self,
        actor: &UserId,
        room_id: &RoomId,
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
    ) -> RelayResult<RoomInvite> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "create invites")?;
        entry.require_live(Timestamp::now())?;

        let invite = RoomInvite::new(room_id.clone(), actor.clone(), max_uses, expires_at);
        entry.invites.insert(invite.code.clone(), invite.clone());
        info!(room_id = %room_id, max_uses = ?max_uses, "Invite created");
        Ok(invite)
    }

    async fn redeem_invite(&self, room_id: &RoomId, code: &str) -> RelayResult<RoomInvite> {
        self.ensure_available()?;
        let now = Timestamp::now();
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_live(now)?;

        let invite = entry
            .invites
            .get_mut(code)
            .ok_or(InviteError::InviteNotFound)?;
        invite.redeem(now)?;
        debug!(room_id = %room_id, uses = invite.uses_consumed, "Invite redeemed");
        Ok(invite.clone())
    }

    async fn revoke_invite(&self, actor: &UserId, room_id: &RoomId, code: &str) -> RelayResult<()> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "revoke invites")?;

        entry
            .invites
            .get_mut(code)
            .ok_or(InviteError::InviteNotFound)?
            .revoke();
        info!(room_id = %room_id, "Invite revoked");
        Ok(())
    }

    async fn get_grants(&self, room_id: &RoomId) -> RelayResult<Vec<PermissionGrant>> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        Ok(entry.grants.clone())
    }

    async fn put_grant(&self, actor: &UserId, room_id: &RoomId, grant: PermissionGrant) -> RelayResult<()> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "change permissions")?;
        entry.require_live(Timestamp::now())?;

        entry.grants.retain(|g| g.granted_to != grant.granted_to);
        info!(room_id = %room_id, target = ?grant.granted_to, actions = ?grant.actions, "Permission grant stored");
        entry.grants.push(grant);
        Ok(())
    }

    async fn publish_signal(&self, room_id: &RoomId, payload: String) -> RelayResult<()> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_live(Timestamp::now())?;
        // No subscribers is not an error
        let _ = entry.signals.send(payload);
        Ok(())
    }

    async fn subscribe_signals(&self, room_id: &RoomId) -> RelayResult<broadcast::Receiver<String>> {
        self.ensure_available()?;
        let rooms = self.rooms.read().await;
        let entry = rooms.get(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_live(Timestamp::now())?;
        Ok(entry.signals.subscribe())
    }

    async fn end_room(&self, actor: &UserId, room_id: &RoomId) -> RelayResult<()> {
        self.ensure_available()?;
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(room_id).ok_or_else(|| not_found(room_id))?;
        entry.require_host(actor, "end the room")?;

        entry.record.ended = true;
        entry.participants.clear();
        entry.invites.clear();
        entry.grants.clear();
        // Dropping the old sender closes every signaling subscription
        entry.signals = broadcast::channel(SIGNAL_CAPACITY).0;
        info!(room_id = %room_id, "Room ended");
        Ok(())
    }
}
