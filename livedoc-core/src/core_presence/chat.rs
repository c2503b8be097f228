/*
    chat.rs - Room chat log

    Append-only in receipt order, bounded to the most recent messages.
    Ordering is per receiver; there is no global order across peers.
*/

use crate::core_model::{PeerId, Timestamp};
use crate::core_session::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from_peer_id: PeerId,
    pub display_name: String,
    pub text: String,
    pub timestamp: Timestamp,
}

impl ChatMessage {
    pub fn new(from_peer_id: PeerId, display_name: impl Into<String>, text: impl Into<String>) -> Self {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            from_peer_id,
            display_name: display_name.into(),
            text: text.into(),
            timestamp: Timestamp::now(),
        }
    }
}

/// Trim and bound outgoing (and incoming) chat text
pub fn prepare_text(text: &str, max_chars: usize) -> SessionResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidInput("chat message is empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > max_chars {
        return Err(SessionError::InvalidInput(format!(
            "chat message has {} characters, limit is {}",
            chars, max_chars
        )));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug)]
pub struct ChatLog {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
    ids: HashSet<String>,
}

impl ChatLog {
    pub fn new(capacity: usize) -> Self {
        ChatLog {
            capacity: capacity.max(1),
            messages: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Append a message; returns false for a duplicate id
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.ids.remove(&evicted.id);
            }
        }
        true
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
