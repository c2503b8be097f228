//! Signaling transport over the relay's room broadcast

use super::message::SignalMessage;
use crate::core_model::RoomId;
use crate::core_relay::{RelayError, SharedRelay};
use crate::core_session::{SessionError, SessionResult};
use tokio::sync::broadcast;

fn signaling_error(err: RelayError) -> SessionError {
    match err {
        RelayError::RoomEnded => SessionError::RoomEnded,
        other => SessionError::SignalingFailure(other.to_string()),
    }
}

/// Publishes and subscribes to one room's signaling stream
#[derive(Clone)]
pub struct SignalChannel {
    relay: SharedRelay,
    room_id: RoomId,
}

impl SignalChannel {
    pub fn new(relay: SharedRelay, room_id: RoomId) -> Self {
        SignalChannel { relay, room_id }
    }

    pub async fn publish(&self, msg: &SignalMessage) -> SessionResult<()> {
        let raw = msg
            .to_json()
            .map_err(|e| SessionError::SignalingFailure(e.to_string()))?;
        self.relay
            .publish_signal(&self.room_id, raw)
            .await
            .map_err(signaling_error)
    }

    pub async fn subscribe(&self) -> SessionResult<broadcast::Receiver<String>> {
        self.relay
            .subscribe_signals(&self.room_id)
            .await
            .map_err(signaling_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::{PeerId, UserId};
    use crate::core_relay::{MemoryRelay, Relay};
    use crate::core_session::RoomRecord;
    use crate::core_signal::SignalPayload;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let relay = MemoryRelay::new();
        let room = RoomId::new("room");
        let host = UserId::new("host");
        relay
            .upsert_room(&host, RoomRecord::new(room.clone(), host.clone(), 4))
            .await
            .unwrap();

        let channel = SignalChannel::new(relay.shared(), room.clone());
        let mut rx = channel.subscribe().await.unwrap();
        let msg = SignalMessage::broadcast(room, PeerId::new("p"), SignalPayload::Bye);
        channel.publish(&msg).await.unwrap();

        let raw = rx.recv().await.unwrap();
        assert_eq!(SignalMessage::from_json(&raw).unwrap(), msg);
    }

    #[tokio::test]
    async fn test_relay_failures_become_signaling_failures() {
        let relay = MemoryRelay::new();
        let channel = SignalChannel::new(relay.shared(), RoomId::new("missing"));
        assert!(matches!(
            channel.subscribe().await,
            Err(SessionError::SignalingFailure(_))
        ));
    }
}
