/*
    message.rs - Signaling wire format

    Messages travel through the relay as JSON strings. They carry only
    connection-setup metadata: display names, session nonces and link
    candidates. No document content and no key material ever goes here.

    ```json
    {
        "room_id": "team-notes",
        "from": "3f2a…",
        "to": "9c1b…",
        "payload": { "type": "candidate", "session": 7, "candidate": { "kind": "Host", "address": "10.0.0.5:4100" } }
    }
    ```
*/

use crate::core_model::{PeerId, RoomId};
use crate::core_transport::Candidate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    /// "I am here"; broadcast on join, answered with a directed announce
    Announce { display_name: String },
    /// Opens negotiation `session` (sent by the smaller peer id)
    Offer { session: u64 },
    Answer { session: u64 },
    /// One reachable address of the answering peer
    Candidate { session: u64, candidate: Candidate },
    /// The sender is leaving the room
    Bye,
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Announce { .. } => "announce",
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
            SignalPayload::Bye => "bye",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub room_id: RoomId,
    pub from: PeerId,
    /// `None` for room-wide broadcasts
    pub to: Option<PeerId>,
    pub payload: SignalPayload,
}

impl SignalMessage {
    pub fn broadcast(room_id: RoomId, from: PeerId, payload: SignalPayload) -> Self {
        SignalMessage {
            room_id,
            from,
            to: None,
            payload,
        }
    }

    pub fn directed(room_id: RoomId, from: PeerId, to: PeerId, payload: SignalPayload) -> Self {
        SignalMessage {
            room_id,
            from,
            to: Some(to),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Whether `peer` should look at this message at all
    pub fn is_for(&self, peer: &PeerId) -> bool {
        &self.from != peer && self.to.as_ref().map_or(true, |to| to == peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_transport::CandidateKind;

    #[test]
    fn test_json_shape_is_tagged() {
        let msg = SignalMessage::directed(
            RoomId::new("room"),
            PeerId::new("a"),
            PeerId::new("b"),
            SignalPayload::Candidate {
                session: 7,
                candidate: Candidate::new(CandidateKind::Host, "127.0.0.1:4100"),
            },
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"candidate\""));
        assert_eq!(SignalMessage::from_json(&json).unwrap(), msg);

        let bye = SignalMessage::broadcast(RoomId::new("room"), PeerId::new("a"), SignalPayload::Bye);
        assert!(bye.to_json().unwrap().contains("\"type\":\"bye\""));
    }

    #[test]
    fn test_addressing() {
        let me = PeerId::new("me");
        let room = RoomId::new("room");
        let all = SignalMessage::broadcast(room.clone(), PeerId::new("x"), SignalPayload::Bye);
        let mine = SignalMessage::directed(room.clone(), PeerId::new("x"), me.clone(), SignalPayload::Bye);
        let other = SignalMessage::directed(room.clone(), PeerId::new("x"), PeerId::new("y"), SignalPayload::Bye);
        let echo = SignalMessage::broadcast(room, me.clone(), SignalPayload::Bye);

        assert!(all.is_for(&me));
        assert!(mine.is_for(&me));
        assert!(!other.is_for(&me));
        assert!(!echo.is_for(&me));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(SignalMessage::from_json("{\"room_id\":1}").is_err());
        assert!(SignalMessage::from_json("not json").is_err());
    }
}
