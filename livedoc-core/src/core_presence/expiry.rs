//! Per-peer values that disappear unless refreshed

use crate::core_model::PeerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct ExpiringMap<V> {
    ttl: Duration,
    entries: HashMap<PeerId, (V, Instant)>,
}

impl<V> ExpiringMap<V> {
    pub fn new(ttl: Duration) -> Self {
        ExpiringMap {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// Insert or refresh; returns true if the peer was not present
    pub fn insert(&mut self, peer_id: PeerId, value: V, now: Instant) -> bool {
        self.entries.insert(peer_id, (value, now)).is_none()
    }

    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        self.entries.remove(peer_id).is_some()
    }

    /// Drop stale entries; returns the peers that expired
    pub fn expire(&mut self, now: Instant) -> Vec<PeerId> {
        let ttl = self.ttl;
        let stale: Vec<PeerId> = self
            .entries
            .iter()
            .filter(|(_, (_, seen))| now.saturating_duration_since(*seen) >= ttl)
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        for peer_id in &stale {
            self.entries.remove(peer_id);
        }
        stale
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&V> {
        self.entries.get(peer_id).map(|(value, _)| value)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.entries.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Peer ids, sorted
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.entries.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Values ordered by peer id
    pub fn values(&self) -> Vec<&V> {
        let mut entries: Vec<(&PeerId, &V)> = self
            .entries
            .iter()
            .map(|(peer_id, (value, _))| (peer_id, value))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, value)| value).collect()
    }
}
