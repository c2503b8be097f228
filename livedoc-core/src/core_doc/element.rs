use crate::core_model::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one inserted character.
///
/// `counter` is a Lamport clock: every local insert takes one more than the
/// highest counter the replica has seen. Ids are totally ordered by
/// (counter, peer), which is what breaks ties between concurrent inserts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId {
    pub counter: u64,
    pub peer: PeerId,
}

impl ElementId {
    pub fn new(counter: u64, peer: PeerId) -> Self {
        ElementId { counter, peer }
    }

    /// Counter zero and empty peer ids are never produced by a replica
    pub fn is_well_formed(&self) -> bool {
        self.counter > 0 && !self.peer.is_empty()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.counter, self.peer)
    }
}
