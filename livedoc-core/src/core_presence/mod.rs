//! Presence and chat
//!
//! Cursor and typing broadcast with throttling on the sender and expiry on
//! the receiver, a heartbeat-driven presence set, and the bounded chat log.

pub mod chat;
pub mod color;
pub mod cursor;
pub mod expiry;
pub mod hub;
pub mod throttle;

pub use chat::{prepare_text, ChatLog, ChatMessage};
pub use color::color_for;
pub use cursor::{normalize, CursorPresence};
pub use expiry::ExpiringMap;
pub use hub::{PeerPresence, PresenceHub, PresenceTick};
pub use throttle::Throttle;
