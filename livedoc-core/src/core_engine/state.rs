//! Reactive view of a running session
//!
//! The session task recomputes a [`SessionSnapshot`] after every event and
//! publishes it on a `watch` channel when it changed. Readers never touch
//! the task's state directly.

use crate::core_model::{PeerId, RoomId, UserId};
use crate::core_presence::{ChatMessage, CursorPresence};
use crate::core_session::{AllowedActions, ParticipantRecord, ParticipantStatus};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub room_id: RoomId,
    pub local_peer_id: PeerId,
    pub local_user_id: UserId,
    pub display_name: String,

    /// Materialized document text
    pub text: String,

    /// Participants holding or waiting for a seat (banned and kicked
    /// records are left out)
    pub participants: Vec<ParticipantRecord>,
    /// Guests waiting for approval; only populated for the host
    pub pending_participants: Vec<ParticipantRecord>,

    pub effective_max_peers: u8,
    pub is_room_full: bool,
    pub room_locked: bool,
    /// The room is locked and this participant is not admitted
    pub blocked_by_lock: bool,
    /// Removed (kicked or banned) by the host; terminal
    pub kicked: bool,
    /// Room ended or expired; terminal
    pub ended: bool,
    pub is_host: bool,
    /// Own status as last seen on the relay
    pub approval: ParticipantStatus,

    pub connected_peer_ids: Vec<PeerId>,
    pub presence_peer_ids: Vec<PeerId>,
    pub typing_peer_ids: Vec<PeerId>,
    pub remote_cursors: Vec<CursorPresence>,
    pub chat_messages: Vec<ChatMessage>,

    pub allowed_actions: AllowedActions,
    /// Connected peers plus self fit within the room capacity
    pub is_within_capacity: bool,
    /// Too many consecutive frames failed to decrypt
    pub desynchronized: bool,
    /// The host replaced the room key; a new link is needed
    pub key_rotated: bool,
}

impl SessionSnapshot {
    /// Whether the session can no longer do anything useful
    pub fn is_terminal(&self) -> bool {
        self.kicked || self.ended
    }

    pub fn is_approved(&self) -> bool {
        self.approval == ParticipantStatus::Approved
    }

    /// Participant currently using `peer_id`
    pub fn participant_by_peer(&self, peer_id: &PeerId) -> Option<&ParticipantRecord> {
        self.participants.iter().find(|p| &p.peer_id == peer_id)
    }
}
