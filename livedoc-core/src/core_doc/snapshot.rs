/*
    snapshot.rs - Self-describing backup of a document

    {
      "version": 1,
      "roomId": "...",
      "timestampMs": 1700000000000,
      "crdtStateEncoded": "<base64 of the bincode DocState>",
      "materializedText": "..."
    }

    Used for backup/restore, not for live sync.
*/

use super::errors::{DocError, DocResult};
use super::text_crdt::TextDocument;
use super::update::DocState;
use crate::core_model::{PeerId, RoomId, Timestamp};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocSnapshot {
    pub version: u32,
    pub room_id: RoomId,
    pub timestamp_ms: u64,
    pub crdt_state_encoded: String,
    pub materialized_text: String,
}

impl DocSnapshot {
    /// Capture the current state of `doc`
    pub fn capture(room_id: &RoomId, doc: &TextDocument) -> DocResult<Self> {
        let state = doc.export_state().encode()?;
        Ok(DocSnapshot {
            version: SNAPSHOT_VERSION,
            room_id: room_id.clone(),
            timestamp_ms: Timestamp::now().as_millis(),
            crdt_state_encoded: STANDARD.encode(state),
            materialized_text: doc.materialize(),
        })
    }

    /// Decode the embedded CRDT state
    pub fn decode_state(&self) -> DocResult<DocState> {
        let bytes = STANDARD
            .decode(self.crdt_state_encoded.as_bytes())
            .map_err(|e| DocError::Encoding(format!("crdtStateEncoded: {}", e)))?;
        Ok(DocState::decode(&bytes)?)
    }

    /// Decode the embedded state and check that it materializes to
    /// `materialized_text`. A snapshot whose two halves disagree was edited
    /// or corrupted and is rejected.
    pub fn verified_state(&self) -> DocResult<DocState> {
        let state = self.decode_state()?;
        let replica = TextDocument::from_state(PeerId::new("snapshot"), &state)?;
        if replica.text() != self.materialized_text {
            warn!(
                room_id = %self.room_id,
                state_chars = replica.text().chars().count(),
                text_chars = self.materialized_text.chars().count(),
                "Snapshot text does not match its CRDT state"
            );
            return Err(DocError::MalformedUpdate(
                "materializedText does not match crdtStateEncoded".to_string(),
            ));
        }
        Ok(state)
    }

    pub fn to_json(&self) -> DocResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> DocResult<Self> {
        let snapshot: DocSnapshot = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DocError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> DocResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> DocResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> (RoomId, TextDocument) {
        let mut doc = TextDocument::new(PeerId::new("host"));
        doc.set_text("backup me").unwrap();
        doc.local_delete(0, 1).unwrap();
        (RoomId::new("room-7"), doc)
    }

    #[test]
    fn test_json_field_names() {
        let (room, doc) = sample();
        let json = DocSnapshot::capture(&room, &doc).unwrap().to_json().unwrap();
        for field in ["version", "roomId", "timestampMs", "crdtStateEncoded", "materializedText"] {
            assert!(json.contains(field), "missing {}", field);
        }
    }

    #[test]
    fn test_restore_preserves_tombstones() {
        let (room, doc) = sample();
        let snapshot = DocSnapshot::capture(&room, &doc).unwrap();
        assert_eq!(snapshot.materialized_text, "ackup me");

        let state = snapshot.decode_state().unwrap();
        assert_eq!(state.chars.iter().filter(|c| c.deleted).count(), 1);
        let restored = TextDocument::from_state(PeerId::new("guest"), &state).unwrap();
        assert_eq!(restored.text(), "ackup me");
    }

    #[test]
    fn test_verified_state_rejects_edited_text() {
        let (room, doc) = sample();
        let mut snapshot = DocSnapshot::capture(&room, &doc).unwrap();
        assert_eq!(snapshot.verified_state().unwrap(), doc.export_state());

        snapshot.materialized_text = "backup me".to_string();
        assert!(matches!(
            snapshot.verified_state(),
            Err(DocError::MalformedUpdate(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let (room, doc) = sample();
        let snapshot = DocSnapshot::capture(&room, &doc).unwrap();
        snapshot.save_to_file(&path).unwrap();
        assert_eq!(DocSnapshot::load_from_file(&path).unwrap(), snapshot);
    }

    #[test]
    fn test_rejects_unknown_version_and_garbage() {
        let (room, doc) = sample();
        let mut snapshot = DocSnapshot::capture(&room, &doc).unwrap();
        snapshot.version = 99;
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(
            DocSnapshot::from_json(&json),
            Err(DocError::UnsupportedVersion(99))
        );

        assert!(DocSnapshot::from_json("{not json").is_err());

        snapshot.version = SNAPSHOT_VERSION;
        snapshot.crdt_state_encoded = "%%%".to_string();
        assert!(snapshot.decode_state().is_err());
    }
}
