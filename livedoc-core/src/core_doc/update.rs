/*
    update.rs - Wire shapes for document changes

    DocUpdate: a batch of operations produced by one local edit
    DocState:  the full replica (every insert ever seen plus tombstones),
               exchanged when a link opens and stored in snapshots
*/

use super::element::ElementId;
use serde::{Deserialize, Serialize};

/// One character-level operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocOp {
    /// Insert `ch` immediately after `after` (None = start of text)
    Insert {
        id: ElementId,
        after: Option<ElementId>,
        ch: char,
    },
    /// Tombstone the character `id`
    Delete { id: ElementId },
}

impl DocOp {
    pub fn id(&self) -> &ElementId {
        match self {
            DocOp::Insert { id, .. } => id,
            DocOp::Delete { id } => id,
        }
    }
}

/// Operations emitted by a single local edit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocUpdate {
    pub ops: Vec<DocOp>,
}

impl DocUpdate {
    pub fn new(ops: Vec<DocOp>) -> Self {
        DocUpdate { ops }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Ids of characters this update creates
    pub fn inserted_ids(&self) -> impl Iterator<Item = &ElementId> {
        self.ops.iter().filter_map(|op| match op {
            DocOp::Insert { id, .. } => Some(id),
            DocOp::Delete { .. } => None,
        })
    }

    /// Append the operations of `other`
    pub fn extend(&mut self, other: DocUpdate) {
        self.ops.extend(other.ops);
    }

    /// Split into at most `parts` non-empty updates, keeping op order
    pub fn split(&self, parts: usize) -> Vec<DocUpdate> {
        let size = chunk_len(self.ops.len(), parts);
        self.ops.chunks(size).map(|ops| DocUpdate::new(ops.to_vec())).collect()
    }
}

fn chunk_len(total: usize, parts: usize) -> usize {
    total.div_ceil(parts.max(1)).max(1)
}

/// A character as stored in the exported state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChar {
    pub id: ElementId,
    pub after: Option<ElementId>,
    pub ch: char,
    pub deleted: bool,
}

/// Full replica state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocState {
    /// Every known character, anchors before dependants where possible
    pub chars: Vec<StateChar>,
    /// Deletes whose target has not arrived yet
    pub orphan_deletes: Vec<ElementId>,
}

impl DocState {
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty() && self.orphan_deletes.is_empty()
    }

    /// Split into at most `parts` partial states, keeping character order.
    /// Orphan deletes ride on the last piece.
    pub fn split(&self, parts: usize) -> Vec<DocState> {
        if self.chars.is_empty() {
            return vec![self.clone()];
        }
        let size = chunk_len(self.chars.len(), parts);
        let mut pieces: Vec<DocState> = self
            .chars
            .chunks(size)
            .map(|chars| DocState {
                chars: chars.to_vec(),
                orphan_deletes: Vec::new(),
            })
            .collect();
        if let Some(last) = pieces.last_mut() {
            last.orphan_deletes = self.orphan_deletes.clone();
        }
        pieces
    }

    /// Flatten into operations; merging a state is applying these
    pub fn to_ops(&self) -> Vec<DocOp> {
        let mut ops: Vec<DocOp> = self
            .chars
            .iter()
            .map(|c| DocOp::Insert {
                id: c.id.clone(),
                after: c.after.clone(),
                ch: c.ch,
            })
            .collect();
        ops.extend(
            self.chars
                .iter()
                .filter(|c| c.deleted)
                .map(|c| DocOp::Delete { id: c.id.clone() }),
        );
        ops.extend(
            self.orphan_deletes
                .iter()
                .map(|id| DocOp::Delete { id: id.clone() }),
        );
        ops
    }

    /// Encode with bincode
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::PeerId;

    fn id(counter: u64) -> ElementId {
        ElementId::new(counter, PeerId::new("p"))
    }

    #[test]
    fn test_inserted_ids() {
        let update = DocUpdate::new(vec![
            DocOp::Insert { id: id(1), after: None, ch: 'a' },
            DocOp::Delete { id: id(7) },
            DocOp::Insert { id: id(2), after: Some(id(1)), ch: 'b' },
        ]);
        let ids: Vec<_> = update.inserted_ids().cloned().collect();
        assert_eq!(ids, vec![id(1), id(2)]);
    }

    #[test]
    fn test_state_to_ops_carries_tombstones() {
        let state = DocState {
            chars: vec![
                StateChar { id: id(1), after: None, ch: 'a', deleted: true },
                StateChar { id: id(2), after: Some(id(1)), ch: 'b', deleted: false },
            ],
            orphan_deletes: vec![id(9)],
        };
        let ops = state.to_ops();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[2], DocOp::Delete { id: id(1) });
        assert_eq!(ops[3], DocOp::Delete { id: id(9) });
    }

    #[test]
    fn test_state_encoding() {
        let state = DocState {
            chars: vec![StateChar { id: id(1), after: None, ch: 'é', deleted: false }],
            orphan_deletes: Vec::new(),
        };
        let decoded = DocState::decode(&state.encode().unwrap()).unwrap();
        assert_eq!(decoded, state);
        assert!(DocState::decode(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn test_update_split_keeps_every_op_in_order() {
        let ops: Vec<DocOp> = (1..=7).map(|c| DocOp::Delete { id: id(c) }).collect();
        let update = DocUpdate::new(ops.clone());

        let pieces = update.split(3);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| !p.is_empty()));
        let rejoined: Vec<DocOp> = pieces.into_iter().flat_map(|p| p.ops).collect();
        assert_eq!(rejoined, ops);

        // Never more pieces than ops
        assert_eq!(DocUpdate::new(ops[..2].to_vec()).split(5).len(), 2);
    }

    #[test]
    fn test_state_split_puts_orphans_last() {
        let state = DocState {
            chars: (1..=5)
                .map(|c| StateChar { id: id(c), after: None, ch: 'x', deleted: c == 2 })
                .collect(),
            orphan_deletes: vec![id(42)],
        };
        let pieces = state.split(2);
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].chars.len(), 3);
        assert!(pieces[0].orphan_deletes.is_empty());
        assert_eq!(pieces[1].orphan_deletes, vec![id(42)]);
        let chars: Vec<StateChar> = pieces.into_iter().flat_map(|p| p.chars).collect();
        assert_eq!(chars, state.chars);
    }
}
