//! Remote cursor positions

use super::color::color_for;
use crate::core_model::PeerId;
use crate::core_session::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};

/// A peer's cursor in normalized coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPresence {
    pub peer_id: PeerId,
    pub x: f32,
    pub y: f32,
    pub display_name: String,
    pub color: String,
}

impl CursorPresence {
    pub fn new(peer_id: PeerId, x: f32, y: f32, display_name: impl Into<String>) -> Self {
        let color = color_for(&peer_id).to_string();
        CursorPresence {
            peer_id,
            x,
            y,
            display_name: display_name.into(),
            color,
        }
    }
}

/// Validate a position: finite values, clamped into [0, 1]
pub fn normalize(x: f32, y: f32) -> SessionResult<(f32, f32)> {
    if !x.is_finite() || !y.is_finite() {
        return Err(SessionError::InvalidInput(format!(
            "cursor position ({}, {}) is not finite",
            x, y
        )));
    }
    Ok((x.clamp(0.0, 1.0), y.clamp(0.0, 1.0)))
}
