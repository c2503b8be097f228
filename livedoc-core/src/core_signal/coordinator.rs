/*
    coordinator.rs - Per-pair negotiation over the relay

    Pure state machine: it consumes signaling messages and returns actions
    for the session to perform (publish something, dial a candidate, drop a
    peer). It owns no sockets and no tasks.

    Roles are fixed per pair: the peer with the smaller id offers and dials,
    the other answers and listens. This makes glare impossible.

    Offerer                              Answerer
      |  Announce (broadcast)  ------->    |
      |  <-------  Announce (directed)     |   only if the answerer is new
      |  Offer{s}              ------->    |
      |  <-------  Answer{s}               |
      |  <-------  Candidate{s, addr}...   |
      |  dial(addr)  ==================>   |

    Every negotiation carries a random session nonce. Answers and candidates
    for any other nonce are stale and dropped; a repeated candidate is
    dropped; candidates that beat the answer are held until it arrives.
*/

use super::message::{SignalMessage, SignalPayload};
use crate::core_model::{PeerId, RoomId};
use crate::core_transport::Candidate;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Offer published, waiting for the answer
    Offered,
    /// Answer exchanged; candidates are being tried
    Answered,
    /// A link to the peer is up
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalAction {
    Publish(SignalMessage),
    Dial { peer_id: PeerId, candidate: Candidate },
    PeerLeft(PeerId),
}

#[derive(Debug)]
struct Negotiation {
    session: u64,
    state: NegotiationState,
    we_offer: bool,
    early_candidates: Vec<Candidate>,
    seen: HashSet<Candidate>,
}

impl Negotiation {
    fn new(session: u64, state: NegotiationState, we_offer: bool) -> Self {
        Negotiation {
            session,
            state,
            we_offer,
            early_candidates: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

pub struct SignalingCoordinator {
    room_id: RoomId,
    local: PeerId,
    display_name: String,
    negotiations: HashMap<PeerId, Negotiation>,
}

impl SignalingCoordinator {
    pub fn new(room_id: RoomId, local: PeerId, display_name: impl Into<String>) -> Self {
        SignalingCoordinator {
            room_id,
            local,
            display_name: display_name.into(),
            negotiations: HashMap::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    /// Whether this side offers (and dials) for the pair with `peer`
    pub fn is_offerer_for(&self, peer: &PeerId) -> bool {
        self.local < *peer
    }

    pub fn state(&self, peer: &PeerId) -> Option<NegotiationState> {
        self.negotiations.get(peer).map(|n| n.state)
    }

    pub fn session(&self, peer: &PeerId) -> Option<u64> {
        self.negotiations.get(peer).map(|n| n.session)
    }

    pub fn announce(&self) -> SignalMessage {
        SignalMessage::broadcast(
            self.room_id.clone(),
            self.local.clone(),
            SignalPayload::Announce {
                display_name: self.display_name.clone(),
            },
        )
    }

    pub fn bye(&self) -> SignalMessage {
        SignalMessage::broadcast(self.room_id.clone(), self.local.clone(), SignalPayload::Bye)
    }

    /// Open a fresh negotiation with `peer`, superseding any previous one
    pub fn publish_offer(&mut self, peer: &PeerId) -> SignalMessage {
        let session = rand::random::<u64>();
        self.negotiations.insert(
            peer.clone(),
            Negotiation::new(session, NegotiationState::Offered, true),
        );
        debug!(peer_id = %peer, session, "Publishing offer");
        self.directed(peer, SignalPayload::Offer { session })
    }

    pub fn publish_answer(&mut self, peer: &PeerId, session: u64) -> SignalMessage {
        self.negotiations.insert(
            peer.clone(),
            Negotiation::new(session, NegotiationState::Answered, false),
        );
        debug!(peer_id = %peer, session, "Publishing answer");
        self.directed(peer, SignalPayload::Answer { session })
    }

    pub fn publish_candidate(&self, peer: &PeerId, session: u64, candidate: Candidate) -> SignalMessage {
        self.directed(peer, SignalPayload::Candidate { session, candidate })
    }

    /// The link to `peer` is up; later announces from it need no new offer
    pub fn mark_connected(&mut self, peer: &PeerId) {
        if let Some(negotiation) = self.negotiations.get_mut(peer) {
            negotiation.state = NegotiationState::Connected;
        }
    }

    /// The link to `peer` dropped. The offerer starts a new negotiation;
    /// the answerer waits for the next offer.
    pub fn restart(&mut self, peer: &PeerId) -> Option<SignalMessage> {
        if self.is_offerer_for(peer) {
            Some(self.publish_offer(peer))
        } else {
            self.negotiations.remove(peer);
            None
        }
    }

    pub fn forget(&mut self, peer: &PeerId) {
        self.negotiations.remove(peer);
    }

    /// Parse and handle one raw relay payload. Garbage is logged and
    /// ignored; the relay is not trusted to deliver well-formed messages.
    pub fn handle_raw(&mut self, raw: &str, local_candidates: &[Candidate]) -> Vec<SignalAction> {
        match SignalMessage::from_json(raw) {
            Ok(msg) => self.handle(msg, local_candidates),
            Err(e) => {
                warn!(error = %e, "Dropping malformed signaling message");
                Vec::new()
            }
        }
    }

    pub fn handle(&mut self, msg: SignalMessage, local_candidates: &[Candidate]) -> Vec<SignalAction> {
        if msg.room_id != self.room_id || !msg.is_for(&self.local) {
            return Vec::new();
        }
        let from = msg.from;
        trace!(peer_id = %from, kind = msg.payload.kind(), "Signaling message");

        match msg.payload {
            SignalPayload::Announce { .. } => self.on_announce(from, msg.to.is_none()),
            SignalPayload::Offer { session } => self.on_offer(from, session, local_candidates),
            SignalPayload::Answer { session } => self.on_answer(from, session),
            SignalPayload::Candidate { session, candidate } => {
                self.on_candidate(from, session, candidate)
            }
            SignalPayload::Bye => {
                self.negotiations.remove(&from);
                vec![SignalAction::PeerLeft(from)]
            }
        }
    }

    fn on_announce(&mut self, from: PeerId, broadcast: bool) -> Vec<SignalAction> {
        if self.is_offerer_for(&from) {
            if self.state(&from) == Some(NegotiationState::Connected) {
                return Vec::new();
            }
            return vec![SignalAction::Publish(self.publish_offer(&from))];
        }
        if broadcast {
            // The newcomer cannot know about us yet; tell it so it can offer
            let reply = self.directed(
                &from,
                SignalPayload::Announce {
                    display_name: self.display_name.clone(),
                },
            );
            return vec![SignalAction::Publish(reply)];
        }
        Vec::new()
    }

    fn on_offer(&mut self, from: PeerId, session: u64, local_candidates: &[Candidate]) -> Vec<SignalAction> {
        if self.is_offerer_for(&from) {
            warn!(peer_id = %from, "Ignoring offer from a peer that should answer");
            return Vec::new();
        }
        if self.session(&from) == Some(session) {
            trace!(peer_id = %from, session, "Duplicate offer");
            return Vec::new();
        }

        let mut actions = vec![SignalAction::Publish(self.publish_answer(&from, session))];
        actions.extend(local_candidates.iter().map(|candidate| {
            SignalAction::Publish(self.publish_candidate(&from, session, candidate.clone()))
        }));
        actions
    }

    fn on_answer(&mut self, from: PeerId, session: u64) -> Vec<SignalAction> {
        let Some(negotiation) = self.negotiations.get_mut(&from) else {
            trace!(peer_id = %from, session, "Answer without offer");
            return Vec::new();
        };
        if !negotiation.we_offer || negotiation.session != session {
            trace!(peer_id = %from, session, "Stale answer");
            return Vec::new();
        }
        if negotiation.state != NegotiationState::Offered {
            return Vec::new();
        }

        negotiation.state = NegotiationState::Answered;
        negotiation
            .early_candidates
            .drain(..)
            .map(|candidate| SignalAction::Dial {
                peer_id: from.clone(),
                candidate,
            })
            .collect()
    }

    fn on_candidate(&mut self, from: PeerId, session: u64, candidate: Candidate) -> Vec<SignalAction> {
        let Some(negotiation) = self.negotiations.get_mut(&from) else {
            return Vec::new();
        };
        if !negotiation.we_offer || negotiation.session != session {
            trace!(peer_id = %from, session, "Stale candidate");
            return Vec::new();
        }
        if !negotiation.seen.insert(candidate.clone()) {
            trace!(peer_id = %from, session, "Duplicate candidate");
            return Vec::new();
        }

        match negotiation.state {
            NegotiationState::Offered => {
                negotiation.early_candidates.push(candidate);
                Vec::new()
            }
            NegotiationState::Answered => vec![SignalAction::Dial {
                peer_id: from,
                candidate,
            }],
            NegotiationState::Connected => Vec::new(),
        }
    }

    fn directed(&self, to: &PeerId, payload: SignalPayload) -> SignalMessage {
        SignalMessage::directed(self.room_id.clone(), self.local.clone(), to.clone(), payload)
    }
}
