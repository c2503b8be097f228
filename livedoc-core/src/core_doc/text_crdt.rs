/*
    text_crdt.rs - Replicated text (RGA variant)

    Every character is a node in a tree: its parent is the character it was
    typed after (None = start of text). Concurrent inserts after the same
    anchor are siblings, ordered by DESCENDING ElementId, and the text is the
    depth-first pre-order walk of the tree. Because a fresh local id is
    always greater than every id the replica has seen, a local insert lands
    immediately after its anchor, and a run of typed characters stays
    contiguous when merged with concurrent runs.

    Properties:
    - Deletes are tombstones, so a delete may arrive before its insert
    - Inserts whose anchor is unknown wait in a pending buffer
    - Updates are validated in full before any operation is applied
    - Re-applying an operation is a no-op
*/

use super::element::ElementId;
use super::errors::{DocError, DocResult};
use super::update::{DocOp, DocState, DocUpdate, StateChar};
use crate::core_model::PeerId;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Counters above this are rejected so the local clock can never overflow
const MAX_COUNTER: u64 = u64::MAX >> 1;

#[derive(Debug, Clone)]
struct CharNode {
    ch: char,
    after: Option<ElementId>,
    deleted: bool,
}

/// One replica of the shared text. Positions are in `char`s.
#[derive(Debug, Clone)]
pub struct TextDocument {
    peer: PeerId,
    /// Highest counter seen locally or remotely
    clock: u64,
    nodes: HashMap<ElementId, CharNode>,
    /// Anchor -> children, sorted descending
    children: HashMap<Option<ElementId>, Vec<ElementId>>,
    /// Missing anchor -> inserts waiting for it
    pending_inserts: HashMap<ElementId, Vec<(ElementId, char)>>,
    /// Waiting insert -> (anchor, ch)
    pending_ids: HashMap<ElementId, (ElementId, char)>,
    /// Deletes whose target has not arrived yet
    pending_deletes: HashSet<ElementId>,
    visible: Vec<ElementId>,
    text: String,
}

impl TextDocument {
    pub fn new(peer: PeerId) -> Self {
        TextDocument {
            peer,
            clock: 0,
            nodes: HashMap::new(),
            children: HashMap::new(),
            pending_inserts: HashMap::new(),
            pending_ids: HashMap::new(),
            pending_deletes: HashSet::new(),
            visible: Vec::new(),
            text: String::new(),
        }
    }

    /// Build a replica from an exported state
    pub fn from_state(peer: PeerId, state: &DocState) -> DocResult<Self> {
        let mut doc = TextDocument::new(peer);
        doc.merge_state(state)?;
        Ok(doc)
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Current materialized text
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn materialize(&self) -> String {
        self.text.clone()
    }

    /// Visible length in chars
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    /// Ids of visible characters in text order
    pub fn visible_ids(&self) -> &[ElementId] {
        &self.visible
    }

    pub fn contains(&self, id: &ElementId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Operations buffered while waiting for their anchor or target
    pub fn pending_count(&self) -> usize {
        self.pending_ids.len() + self.pending_deletes.len()
    }

    /// Insert `text` so that its first char ends up at `pos`
    pub fn local_insert(&mut self, pos: usize, text: &str) -> DocResult<DocUpdate> {
        let len = self.visible.len();
        if pos > len {
            return Err(DocError::InvalidPosition { pos, len });
        }

        let mut after = if pos == 0 {
            None
        } else {
            Some(self.visible[pos - 1].clone())
        };
        let mut ops = Vec::new();
        for ch in text.chars() {
            self.clock += 1;
            let id = ElementId::new(self.clock, self.peer.clone());
            self.integrate(id.clone(), after.clone(), ch);
            ops.push(DocOp::Insert {
                id: id.clone(),
                after,
                ch,
            });
            after = Some(id);
        }

        if !ops.is_empty() {
            self.rebuild();
        }
        Ok(DocUpdate::new(ops))
    }

    /// Delete `len` chars starting at `pos`
    pub fn local_delete(&mut self, pos: usize, len: usize) -> DocResult<DocUpdate> {
        let total = self.visible.len();
        let end = pos
            .checked_add(len)
            .filter(|end| *end <= total)
            .ok_or(DocError::InvalidPosition {
                pos: pos.saturating_add(len),
                len: total,
            })?;

        let ids: Vec<ElementId> = self.visible[pos..end].to_vec();
        for id in &ids {
            if let Some(node) = self.nodes.get_mut(id) {
                node.deleted = true;
            }
        }

        if !ids.is_empty() {
            self.rebuild();
        }
        Ok(DocUpdate::new(
            ids.into_iter().map(|id| DocOp::Delete { id }).collect(),
        ))
    }

    /// Replace the whole text, touching only the span between the common
    /// prefix and the common suffix
    pub fn set_text(&mut self, new_text: &str) -> DocResult<DocUpdate> {
        let old: Vec<char> = self.text.chars().collect();
        let new: Vec<char> = new_text.chars().collect();

        let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
        let suffix = old[prefix..]
            .iter()
            .rev()
            .zip(new[prefix..].iter().rev())
            .take_while(|(a, b)| a == b)
            .count();

        let mut update = self.local_delete(prefix, old.len() - prefix - suffix)?;
        let inserted: String = new[prefix..new.len() - suffix].iter().collect();
        update.extend(self.local_insert(prefix, &inserted)?);
        Ok(update)
    }

    /// Apply an update received from a peer. Returns whether the replica
    /// changed. A malformed update leaves the replica untouched.
    pub fn apply_remote(&mut self, update: &DocUpdate) -> DocResult<bool> {
        if update.is_empty() {
            return Err(DocError::MalformedUpdate("empty update".to_string()));
        }
        if let Err(e) = self.validate(&update.ops) {
            warn!(error = %e, ops = update.len(), "Rejected document update");
            return Err(e);
        }
        Ok(self.apply_ops(&update.ops))
    }

    /// Export the full replica (including tombstones and buffered operations)
    pub fn export_state(&self) -> DocState {
        let mut chars: Vec<StateChar> = self
            .ordered_ids()
            .into_iter()
            .filter_map(|id| {
                self.nodes.get(id).map(|node| StateChar {
                    id: id.clone(),
                    after: node.after.clone(),
                    ch: node.ch,
                    deleted: node.deleted,
                })
            })
            .collect();

        let mut waiting: Vec<_> = self.pending_ids.iter().collect();
        waiting.sort_by(|a, b| a.0.cmp(b.0));
        chars.extend(waiting.into_iter().map(|(id, (anchor, ch))| StateChar {
            id: id.clone(),
            after: Some(anchor.clone()),
            ch: *ch,
            deleted: false,
        }));

        let mut orphan_deletes: Vec<ElementId> = self.pending_deletes.iter().cloned().collect();
        orphan_deletes.sort();

        DocState {
            chars,
            orphan_deletes,
        }
    }

    /// Merge another replica's state: union of characters, OR of tombstones
    pub fn merge_state(&mut self, state: &DocState) -> DocResult<bool> {
        if state.is_empty() {
            return Ok(false);
        }
        let ops = state.to_ops();
        if let Err(e) = self.validate(&ops) {
            warn!(error = %e, chars = state.chars.len(), "Rejected document state");
            return Err(e);
        }
        Ok(self.apply_ops(&ops))
    }

    fn validate(&self, ops: &[DocOp]) -> DocResult<()> {
        let malformed = |msg: String| -> DocResult<()> { Err(DocError::MalformedUpdate(msg)) };
        let mut batch: HashMap<&ElementId, (Option<&ElementId>, char)> = HashMap::new();

        for op in ops {
            match op {
                DocOp::Insert { id, after, ch } => {
                    if !id.is_well_formed() || id.counter > MAX_COUNTER {
                        return malformed(format!("invalid element id {}", id));
                    }
                    if let Some(anchor) = after {
                        if anchor == id {
                            return malformed(format!("element {} anchored to itself", id));
                        }
                        if !anchor.is_well_formed() {
                            return malformed(format!("invalid anchor {}", anchor));
                        }
                    }

                    let known = self
                        .nodes
                        .get(id)
                        .map(|node| (node.after.as_ref(), node.ch))
                        .or_else(|| {
                            self.pending_ids
                                .get(id)
                                .map(|(anchor, ch)| (Some(anchor), *ch))
                        })
                        .or_else(|| batch.get(id).copied());
                    if let Some(existing) = known {
                        if existing != (after.as_ref(), *ch) {
                            return malformed(format!("id collision on {}", id));
                        }
                    }
                    batch.insert(id, (after.as_ref(), *ch));
                }
                DocOp::Delete { id } => {
                    if !id.is_well_formed() {
                        return malformed(format!("invalid delete target {}", id));
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_ops(&mut self, ops: &[DocOp]) -> bool {
        let mut changed = false;

        for op in ops {
            match op {
                DocOp::Insert { id, after, ch } => {
                    self.clock = self.clock.max(id.counter);
                    if self.nodes.contains_key(id) || self.pending_ids.contains_key(id) {
                        continue;
                    }
                    match after {
                        Some(anchor) if !self.nodes.contains_key(anchor) => {
                            debug!(id = %id, anchor = %anchor, "Buffering insert until anchor arrives");
                            self.pending_ids.insert(id.clone(), (anchor.clone(), *ch));
                            self.pending_inserts
                                .entry(anchor.clone())
                                .or_default()
                                .push((id.clone(), *ch));
                        }
                        _ => {
                            self.integrate(id.clone(), after.clone(), *ch);
                            changed = true;
                        }
                    }
                }
                DocOp::Delete { id } => match self.nodes.get_mut(id) {
                    Some(node) => {
                        if !node.deleted {
                            node.deleted = true;
                            changed = true;
                        }
                    }
                    None => {
                        self.pending_deletes.insert(id.clone());
                    }
                },
            }
        }

        if changed {
            self.rebuild();
        }
        changed
    }

    /// Place a node under its anchor, then release anything waiting on it
    fn integrate(&mut self, id: ElementId, after: Option<ElementId>, ch: char) {
        let mut work = vec![(id, after, ch)];

        while let Some((id, after, ch)) = work.pop() {
            let deleted = self.pending_deletes.remove(&id);

            let siblings = self.children.entry(after.clone()).or_default();
            let slot = siblings.partition_point(|sibling| sibling > &id);
            siblings.insert(slot, id.clone());
            self.nodes.insert(id.clone(), CharNode { ch, after, deleted });

            if let Some(waiting) = self.pending_inserts.remove(&id) {
                for (child, child_ch) in waiting {
                    self.pending_ids.remove(&child);
                    work.push((child, Some(id.clone()), child_ch));
                }
            }
        }
    }

    /// Every integrated node in text order, tombstones included
    fn ordered_ids(&self) -> Vec<&ElementId> {
        let mut ordered = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&ElementId> = Vec::new();
        if let Some(roots) = self.children.get(&None) {
            stack.extend(roots.iter().rev());
        }
        while let Some(id) = stack.pop() {
            ordered.push(id);
            if let Some(kids) = self.children.get(&Some(id.clone())) {
                stack.extend(kids.iter().rev());
            }
        }
        ordered
    }

    fn rebuild(&mut self) {
        let mut visible = Vec::with_capacity(self.nodes.len());
        let mut text = String::with_capacity(self.nodes.len());
        for id in self.ordered_ids() {
            if let Some(node) = self.nodes.get(id) {
                if !node.deleted {
                    visible.push(id.clone());
                    text.push(node.ch);
                }
            }
        }
        self.visible = visible;
        self.text = text;
    }
}
