/*
    hub.rs - Ephemeral per-session presence state

    Owns the local throttles and the receiver-side boards. None of this is
    part of the document: it is overwritten freely and expires on silence.
    The session drives it with explicit `now` instants so expiry follows
    the runtime clock.
*/

use super::chat::{prepare_text, ChatLog, ChatMessage};
use super::color::color_for;
use super::cursor::{normalize, CursorPresence};
use super::expiry::ExpiringMap;
use super::throttle::Throttle;
use crate::config::PresenceConfig;
use crate::core_model::PeerId;
use crate::core_session::SessionResult;
use tokio::time::Instant;
use tracing::{debug, trace};

/// What a remote peer advertises in its heartbeat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPresence {
    pub display_name: String,
    pub color: String,
}

/// Work produced by one housekeeping tick
#[derive(Debug, Default, PartialEq)]
pub struct PresenceTick {
    /// Trailing cursor position to broadcast
    pub cursor: Option<(f32, f32)>,
    /// Something visible expired
    pub changed: bool,
}

pub struct PresenceHub {
    local: PeerId,
    display_name: String,
    max_chat_length: usize,
    cursor_throttle: Throttle<(f32, f32)>,
    typing_throttle: Throttle<()>,
    cursors: ExpiringMap<CursorPresence>,
    typing: ExpiringMap<()>,
    peers: ExpiringMap<PeerPresence>,
    chat: ChatLog,
}

impl PresenceHub {
    pub fn new(local: PeerId, display_name: impl Into<String>, config: &PresenceConfig) -> Self {
        PresenceHub {
            local,
            display_name: display_name.into(),
            max_chat_length: config.max_chat_length,
            cursor_throttle: Throttle::new(config.cursor_throttle),
            typing_throttle: Throttle::new(config.typing_throttle),
            cursors: ExpiringMap::new(config.cursor_ttl),
            typing: ExpiringMap::new(config.typing_ttl),
            peers: ExpiringMap::new(config.presence_ttl),
            chat: ChatLog::new(config.chat_history),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn color(&self) -> &'static str {
        color_for(&self.local)
    }

    /// Local cursor moved; returns the position to broadcast now, if any
    pub fn set_cursor(&mut self, x: f32, y: f32, now: Instant) -> SessionResult<Option<(f32, f32)>> {
        let position = normalize(x, y)?;
        Ok(self.cursor_throttle.offer(position, now))
    }

    /// Local cursor left the document; a pending trailing update is dropped
    pub fn clear_cursor(&mut self) {
        self.cursor_throttle.reset();
    }

    /// A local edit happened; returns true if a typing notice should go out
    pub fn note_local_edit(&mut self, now: Instant) -> bool {
        self.typing_throttle.offer((), now).is_some()
    }

    /// Returns true if the visible cursor set changed
    pub fn on_cursor(&mut self, peer_id: &PeerId, x: f32, y: f32, display_name: &str, now: Instant) -> bool {
        let Ok((x, y)) = normalize(x, y) else {
            debug!(peer_id = %peer_id, "Ignoring cursor with invalid coordinates");
            return false;
        };
        let cursor = CursorPresence::new(peer_id.clone(), x, y, display_name);
        let changed = self.cursors.get(peer_id) != Some(&cursor);
        self.cursors.insert(peer_id.clone(), cursor, now);
        changed
    }

    pub fn on_cursor_cleared(&mut self, peer_id: &PeerId) -> bool {
        self.cursors.remove(peer_id)
    }

    pub fn on_typing(&mut self, peer_id: &PeerId, now: Instant) -> bool {
        self.typing.insert(peer_id.clone(), (), now)
    }

    pub fn on_heartbeat(&mut self, peer_id: &PeerId, display_name: &str, now: Instant) -> bool {
        let presence = PeerPresence {
            display_name: display_name.to_string(),
            color: color_for(peer_id).to_string(),
        };
        self.peers.insert(peer_id.clone(), presence, now)
    }

    /// Drop everything known about a peer (disconnect, kick, bye)
    pub fn forget_peer(&mut self, peer_id: &PeerId) -> bool {
        let cursor = self.cursors.remove(peer_id);
        let typing = self.typing.remove(peer_id);
        let present = self.peers.remove(peer_id);
        cursor || typing || present
    }

    pub fn tick(&mut self, now: Instant) -> PresenceTick {
        let cursor = self.cursor_throttle.flush(now);
        let expired_cursors = self.cursors.expire(now);
        let expired_typing = self.typing.expire(now);
        let expired_peers = self.peers.expire(now);
        if !expired_peers.is_empty() {
            trace!(peers = ?expired_peers, "Presence expired");
        }
        PresenceTick {
            cursor,
            changed: !(expired_cursors.is_empty() && expired_typing.is_empty() && expired_peers.is_empty()),
        }
    }

    pub fn remote_cursors(&self) -> Vec<CursorPresence> {
        self.cursors.values().into_iter().cloned().collect()
    }

    pub fn typing_peer_ids(&self) -> Vec<PeerId> {
        self.typing.peers()
    }

    pub fn presence_peer_ids(&self) -> Vec<PeerId> {
        self.peers.peers()
    }

    pub fn peer_presence(&self, peer_id: &PeerId) -> Option<&PeerPresence> {
        self.peers.get(peer_id)
    }

    /// Build and record an outgoing chat message
    pub fn send_chat(&mut self, text: &str) -> SessionResult<ChatMessage> {
        let text = prepare_text(text, self.max_chat_length)?;
        let message = ChatMessage::new(self.local.clone(), self.display_name.clone(), text);
        self.chat.push(message.clone());
        Ok(message)
    }

    /// Record an incoming chat message; returns false if it was dropped
    pub fn on_chat(&mut self, sender: &PeerId, message: ChatMessage) -> bool {
        if &message.from_peer_id != sender {
            debug!(peer_id = %sender, "Dropping chat message with forged sender");
            return false;
        }
        if prepare_text(&message.text, self.max_chat_length).is_err() {
            debug!(peer_id = %sender, "Dropping oversized or empty chat message");
            return false;
        }
        self.chat.push(message)
    }

    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.chat.messages()
    }

    /// Forget every remote peer (session torn down)
    pub fn clear_remote(&mut self) {
        self.cursors.clear();
        self.typing.clear();
        self.peers.clear();
        self.cursor_throttle.reset();
    }
}
