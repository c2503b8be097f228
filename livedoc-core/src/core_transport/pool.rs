/*
  pool.rs - Full-mesh peer pool

  One slot per remote peer, addressed by PeerId. A slot outlives the links
  it carries: when a link drops the slot moves to Reconnecting and keeps its
  counters, and a new link (new LinkId) is attached to the same slot. A
  slot closed deliberately (kick, bye, end) is never retried.

  Sends are fire-and-forget: a full or closed queue drops the frame and is
  recorded in the slot's diagnostics instead of blocking the caller.
*/

use super::errors::{TransportError, TransportResult};
use super::link::{Candidate, CandidateKind, LinkId};
use crate::core_model::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Reconnecting,
    /// Gave up after the retry budget ran out
    Failed,
    /// Closed on purpose; never retried
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Read-only view of one peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDiagnostic {
    pub peer_id: PeerId,
    pub connection_state: ConnectionState,
    pub data_channel_state: ChannelState,
    pub local_candidate: Option<CandidateKind>,
    pub remote_candidate: Option<CandidateKind>,
    pub reconnect_attempts: u32,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub last_error: Option<String>,
}

struct PeerSlot {
    link: Option<(LinkId, mpsc::Sender<Vec<u8>>, CancellationToken)>,
    state: ConnectionState,
    channel: ChannelState,
    local: Option<Candidate>,
    remote: Option<Candidate>,
    reconnect_attempts: u32,
    frames_sent: u64,
    frames_received: u64,
    frames_dropped: u64,
    last_error: Option<String>,
}

impl PeerSlot {
    fn new() -> Self {
        PeerSlot {
            link: None,
            state: ConnectionState::New,
            channel: ChannelState::Closed,
            local: None,
            remote: None,
            reconnect_attempts: 0,
            frames_sent: 0,
            frames_received: 0,
            frames_dropped: 0,
            last_error: None,
        }
    }

    fn drop_link(&mut self) {
        if let Some((_, _, cancel)) = self.link.take() {
            cancel.cancel();
        }
    }
}

/// Peer connections keyed by peer id
pub struct PeerPool {
    slots: HashMap<PeerId, PeerSlot>,
    max_frame_size: usize,
}

impl PeerPool {
    pub fn new(max_frame_size: usize) -> Self {
        PeerPool {
            slots: HashMap::new(),
            max_frame_size,
        }
    }

    /// Register a peer we intend to connect to
    pub fn mark_connecting(&mut self, peer_id: &PeerId) {
        let slot = self.slots.entry(peer_id.clone()).or_insert_with(PeerSlot::new);
        if slot.state != ConnectionState::Closed && slot.link.is_none() {
            slot.state = if slot.reconnect_attempts > 0 {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            slot.channel = ChannelState::Connecting;
        }
    }

    /// Bind an authenticated link to `peer_id`, replacing any previous link.
    /// Re-opens a slot that was closed deliberately (the peer rejoined).
    pub fn attach(
        &mut self,
        peer_id: PeerId,
        link_id: LinkId,
        outbound: mpsc::Sender<Vec<u8>>,
        local: Candidate,
        remote: Candidate,
        reader_cancel: CancellationToken,
    ) {
        let slot = self.slots.entry(peer_id.clone()).or_insert_with(PeerSlot::new);
        slot.drop_link();
        slot.link = Some((link_id, outbound, reader_cancel));
        slot.state = ConnectionState::Connected;
        slot.channel = ChannelState::Open;
        slot.local = Some(local);
        slot.remote = Some(remote);
        slot.reconnect_attempts = 0;
        slot.last_error = None;
        info!(peer_id = %peer_id, %link_id, "Peer link attached");
    }

    /// Peer bound to `link_id`, if that link is still current
    pub fn peer_for_link(&self, link_id: LinkId) -> Option<&PeerId> {
        self.slots.iter().find_map(|(peer_id, slot)| match &slot.link {
            Some((id, _, _)) if *id == link_id => Some(peer_id),
            _ => None,
        })
    }

    /// The link dropped underneath us. Returns the peer when the dropped
    /// link was current and the slot should be retried.
    pub fn link_lost(&mut self, link_id: LinkId, reason: &str) -> Option<PeerId> {
        let peer_id = self.peer_for_link(link_id)?.clone();
        let slot = self.slots.get_mut(&peer_id)?;
        slot.drop_link();
        slot.channel = ChannelState::Closed;
        slot.last_error = Some(reason.to_string());
        if slot.state == ConnectionState::Closed {
            return None;
        }
        slot.state = ConnectionState::Reconnecting;
        debug!(peer_id = %peer_id, %link_id, reason, "Peer link lost");
        Some(peer_id)
    }

    /// Count a reconnect attempt; returns the attempt number
    pub fn note_reconnect_attempt(&mut self, peer_id: &PeerId) -> u32 {
        let slot = self.slots.entry(peer_id.clone()).or_insert_with(PeerSlot::new);
        slot.reconnect_attempts += 1;
        slot.reconnect_attempts
    }

    pub fn mark_failed(&mut self, peer_id: &PeerId, error: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.drop_link();
            slot.state = ConnectionState::Failed;
            slot.channel = ChannelState::Closed;
            slot.last_error = Some(error.into());
        }
    }

    /// A frame meant for `peer_id` never reached its queue
    pub fn record_dropped(&mut self, peer_id: &PeerId, error: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.frames_dropped += 1;
            slot.last_error = Some(error.into());
        }
    }

    pub fn record_error(&mut self, peer_id: &PeerId, error: impl Into<String>) {
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.last_error = Some(error.into());
        }
    }

    /// Whether a dropped link to `peer_id` may be retried
    pub fn should_retry(&self, peer_id: &PeerId) -> bool {
        self.slots.get(peer_id).is_some_and(|slot| {
            slot.link.is_none()
                && matches!(
                    slot.state,
                    ConnectionState::Reconnecting | ConnectionState::Connecting | ConnectionState::New
                )
        })
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.slots
            .get(peer_id)
            .is_some_and(|slot| slot.state == ConnectionState::Connected)
    }

    /// Closed on purpose (kick, bye, end)
    pub fn is_closed(&self, peer_id: &PeerId) -> bool {
        self.slots
            .get(peer_id)
            .is_some_and(|slot| slot.state == ConnectionState::Closed)
    }

    /// Fire-and-forget send of one sealed frame
    pub fn send(&mut self, peer_id: &PeerId, frame: Vec<u8>) -> TransportResult<()> {
        let max_frame_size = self.max_frame_size;
        let slot = self
            .slots
            .get_mut(peer_id)
            .ok_or_else(|| TransportError::PeerNotFound(peer_id.to_string()))?;
        if frame.len() > max_frame_size {
            let err = TransportError::FrameTooLarge {
                size: frame.len(),
                max: max_frame_size,
            };
            slot.frames_dropped += 1;
            slot.last_error = Some(err.to_string());
            return Err(err);
        }
        let (_, outbound, _) = slot
            .link
            .as_ref()
            .ok_or_else(|| TransportError::PeerNotFound(peer_id.to_string()))?;

        match outbound.try_send(frame) {
            Ok(()) => {
                slot.frames_sent += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                slot.frames_dropped += 1;
                slot.last_error = Some("send queue full".to_string());
                Err(TransportError::QueueFull(peer_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                slot.frames_dropped += 1;
                slot.channel = ChannelState::Closing;
                slot.last_error = Some("link closed".to_string());
                Err(TransportError::Closed)
            }
        }
    }

    /// Send the same sealed pieces, in order, to every connected peer;
    /// failures are recorded per peer. Returns how many peers accepted
    /// every piece.
    pub fn broadcast(&mut self, pieces: &[Vec<u8>]) -> usize {
        let peers = self.connected_peers();
        let mut accepted = 0;
        for peer_id in &peers {
            if pieces.iter().all(|piece| self.send(peer_id, piece.clone()).is_ok()) {
                accepted += 1;
            }
        }
        accepted
    }

    pub fn record_received(&mut self, peer_id: &PeerId) {
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.frames_received += 1;
        }
    }

    /// Close the link on purpose; the slot is never retried
    pub fn close(&mut self, peer_id: &PeerId) {
        if let Some(slot) = self.slots.get_mut(peer_id) {
            slot.drop_link();
            slot.state = ConnectionState::Closed;
            slot.channel = ChannelState::Closed;
            info!(peer_id = %peer_id, "Peer link closed");
        }
    }

    pub fn close_all(&mut self) {
        let peers: Vec<PeerId> = self.slots.keys().cloned().collect();
        for peer_id in peers {
            self.close(&peer_id);
        }
    }

    pub fn remove(&mut self, peer_id: &PeerId) {
        if let Some(mut slot) = self.slots.remove(peer_id) {
            slot.drop_link();
        }
    }

    /// Peers with an open link, sorted
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.state == ConnectionState::Connected)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        peers.sort();
        peers
    }

    pub fn known_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.slots.keys().cloned().collect();
        peers.sort();
        peers
    }

    pub fn diagnostics(&self, peer_id: &PeerId) -> Option<ConnectionDiagnostic> {
        self.slots.get(peer_id).map(|slot| ConnectionDiagnostic {
            peer_id: peer_id.clone(),
            connection_state: slot.state,
            data_channel_state: slot.channel,
            local_candidate: slot.local.as_ref().map(|c| c.kind),
            remote_candidate: slot.remote.as_ref().map(|c| c.kind),
            reconnect_attempts: slot.reconnect_attempts,
            frames_sent: slot.frames_sent,
            frames_received: slot.frames_received,
            frames_dropped: slot.frames_dropped,
            last_error: slot.last_error.clone(),
        })
    }

    pub fn all_diagnostics(&self) -> Vec<ConnectionDiagnostic> {
        self.known_peers()
            .iter()
            .filter_map(|peer_id| self.diagnostics(peer_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> Candidate {
        Candidate::new(CandidateKind::Memory, "x")
    }

    fn attach(pool: &mut PeerPool, peer: &PeerId, link: u64, capacity: usize) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(capacity);
        pool.attach(peer.clone(), LinkId(link), tx, candidate(), candidate(), CancellationToken::new());
        rx
    }

    #[test]
    fn test_attach_send_and_diagnostics() {
        let mut pool = PeerPool::new(1024);
        let peer = PeerId::new("p1");
        let mut rx = attach(&mut pool, &peer, 1, 8);

        pool.send(&peer, b"frame".to_vec()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), b"frame");
        pool.record_received(&peer);

        let diag = pool.diagnostics(&peer).unwrap();
        assert_eq!(diag.connection_state, ConnectionState::Connected);
        assert_eq!(diag.data_channel_state, ChannelState::Open);
        assert_eq!(diag.remote_candidate, Some(CandidateKind::Memory));
        assert_eq!((diag.frames_sent, diag.frames_received), (1, 1));
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let mut pool = PeerPool::new(1024);
        let peer = PeerId::new("p1");
        let _rx = attach(&mut pool, &peer, 1, 1);

        pool.send(&peer, vec![1]).unwrap();
        assert_eq!(
            pool.send(&peer, vec![2]),
            Err(TransportError::QueueFull("p1".to_string()))
        );
        assert_eq!(pool.diagnostics(&peer).unwrap().frames_dropped, 1);
    }

    #[test]
    fn test_oversized_frame_refused() {
        let mut pool = PeerPool::new(4);
        let peer = PeerId::new("p1");
        let _rx = attach(&mut pool, &peer, 1, 8);
        assert!(matches!(
            pool.send(&peer, vec![0; 5]),
            Err(TransportError::FrameTooLarge { size: 5, max: 4 })
        ));
        let diag = pool.diagnostics(&peer).unwrap();
        assert_eq!(diag.frames_dropped, 1);
        assert_eq!(
            diag.last_error.as_deref(),
            Some("Frame of 5 bytes exceeds limit of 4 bytes")
        );

        pool.record_dropped(&peer, "too big to seal");
        assert_eq!(pool.diagnostics(&peer).unwrap().frames_dropped, 2);
    }

    #[test]
    fn test_lost_link_is_retried_but_closed_link_is_not() {
        let mut pool = PeerPool::new(1024);
        let a = PeerId::new("a");
        let b = PeerId::new("b");
        let _ra = attach(&mut pool, &a, 1, 8);
        let _rb = attach(&mut pool, &b, 2, 8);

        assert_eq!(pool.link_lost(LinkId(1), "reset"), Some(a.clone()));
        assert!(pool.should_retry(&a));
        assert_eq!(
            pool.diagnostics(&a).unwrap().connection_state,
            ConnectionState::Reconnecting
        );

        pool.close(&b);
        assert_eq!(pool.link_lost(LinkId(2), "reset"), None);
        assert!(!pool.should_retry(&b));
        assert!(pool.is_closed(&b));
        assert_eq!(pool.connected_peers(), Vec::<PeerId>::new());
    }

    #[test]
    fn test_stale_link_ids_are_ignored() {
        let mut pool = PeerPool::new(1024);
        let peer = PeerId::new("p");
        let _old = attach(&mut pool, &peer, 1, 8);
        let _new = attach(&mut pool, &peer, 2, 8);

        assert_eq!(pool.link_lost(LinkId(1), "old link"), None);
        assert!(pool.is_connected(&peer));
        assert_eq!(pool.peer_for_link(LinkId(2)), Some(&peer));
    }

    #[test]
    fn test_broadcast_counts_accepting_peers() {
        let mut pool = PeerPool::new(1024);
        let _r1 = attach(&mut pool, &PeerId::new("a"), 1, 8);
        let r2 = attach(&mut pool, &PeerId::new("b"), 2, 8);
        drop(r2);

        assert_eq!(pool.broadcast(&[b"hi".to_vec(), b"there".to_vec()]), 1);
        let diag = pool.diagnostics(&PeerId::new("b")).unwrap();
        assert_eq!(diag.last_error.as_deref(), Some("link closed"));
    }

    #[test]
    fn test_reconnect_attempts_and_failure() {
        let mut pool = PeerPool::new(1024);
        let peer = PeerId::new("p");
        pool.mark_connecting(&peer);
        assert_eq!(pool.note_reconnect_attempt(&peer), 1);
        assert_eq!(pool.note_reconnect_attempt(&peer), 2);
        pool.mark_failed(&peer, "gave up");
        assert!(!pool.should_retry(&peer));

        let _rx = attach(&mut pool, &peer, 9, 8);
        assert_eq!(pool.diagnostics(&peer).unwrap().reconnect_attempts, 0);
    }
}
