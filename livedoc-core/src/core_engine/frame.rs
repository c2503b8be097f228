/*
    frame.rs - Peer link frames

    Every frame is bincode-encoded and then sealed with the room envelope
    before it reaches the transport. Frames are routed by kind:

      DocUpdate / DocState / SyncRequest  -> CRDT document
      Control                             -> session state machine (host only)
      Presence / Chat                     -> presence hub
      Hello / Bye                         -> link lifecycle

    The first frame on every link must be Hello. A link whose first frame
    does not decrypt under the room key is dropped.
*/

use crate::core_crypto::{CryptoError, Envelope};
use crate::core_doc::{DocState, DocUpdate};
use crate::core_model::{PeerId, UserId};
use crate::core_presence::ChatMessage;
use crate::core_session::{SessionError, SessionResult};
use crate::core_transport::TransportError;
use serde::{Deserialize, Serialize};

/// Host-issued room events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlFrame {
    RoomLocked { locked: bool },
    /// `peer_id` was removed (kicked, or banned when `banned`); everyone
    /// drops its link
    Kicked {
        user_id: UserId,
        peer_id: PeerId,
        banned: bool,
    },
    /// Terminal: release every connection
    RoomEnded,
    /// Grants changed on the relay; refetch them
    PermissionsChanged,
    /// The room key was replaced; this link will stop working
    KeyRotated,
    /// Participant records changed (approval); refetch them
    ParticipantsChanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PresenceFrame {
    Heartbeat { display_name: String },
    Cursor { x: f32, y: f32, display_name: String },
    CursorCleared,
    Typing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    Hello {
        peer_id: PeerId,
        user_id: UserId,
        display_name: String,
    },
    DocUpdate(DocUpdate),
    DocState(DocState),
    /// Ask the receiver for its full document state
    SyncRequest,
    Control(ControlFrame),
    Presence(PresenceFrame),
    Chat(ChatMessage),
    Bye,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Hello { .. } => "hello",
            Frame::DocUpdate(_) => "doc_update",
            Frame::DocState(_) => "doc_state",
            Frame::SyncRequest => "sync_request",
            Frame::Control(_) => "control",
            Frame::Presence(_) => "presence",
            Frame::Chat(_) => "chat",
            Frame::Bye => "bye",
        }
    }

    /// Encode and encrypt for the wire
    pub fn seal(&self, envelope: &Envelope) -> SessionResult<Vec<u8>> {
        let plain = bincode::serialize(self)
            .map_err(|e| SessionError::InvalidInput(format!("frame encoding: {}", e)))?;
        Ok(envelope.encrypt(&plain)?)
    }

    /// Seal into one or more wire frames of at most `max_len` bytes each.
    /// Document frames are split by operations or characters; the replica
    /// buffers pieces that arrive before their anchors. Any other frame
    /// that does not fit is refused.
    pub fn seal_chunked(&self, envelope: &Envelope, max_len: usize) -> SessionResult<Vec<Vec<u8>>> {
        let sealed = self.seal(envelope)?;
        if sealed.len() <= max_len {
            return Ok(vec![sealed]);
        }

        let parts = sealed.len().div_ceil(max_len.max(1)) + 1;
        let pieces: Vec<Frame> = match self {
            Frame::DocUpdate(update) if update.len() > 1 => {
                update.split(parts).into_iter().map(Frame::DocUpdate).collect()
            }
            Frame::DocState(state) if state.chars.len() > 1 => {
                state.split(parts).into_iter().map(Frame::DocState).collect()
            }
            _ => {
                return Err(SessionError::from(TransportError::FrameTooLarge {
                    size: sealed.len(),
                    max: max_len,
                }))
            }
        };

        let mut out = Vec::with_capacity(pieces.len());
        for piece in &pieces {
            out.extend(piece.seal_chunked(envelope, max_len)?);
        }
        Ok(out)
    }

    /// Decrypt and decode a frame. AEAD failures map to
    /// `AuthenticationFailed`, undecodable plaintext to `MalformedUpdate`.
    pub fn open(envelope: &Envelope, sealed: &[u8]) -> SessionResult<Frame> {
        let plain = envelope.decrypt(sealed).map_err(|e| match e {
            CryptoError::AuthenticationFailed | CryptoError::InvalidCiphertext(_) => {
                SessionError::AuthenticationFailed
            }
            other => SessionError::from(other),
        })?;
        bincode::deserialize(&plain).map_err(|e| SessionError::MalformedUpdate(format!("frame: {}", e)))
    }
}
