//! In-memory, mutable document state.
//!
//! All nodes live in one per-document arena keyed by [`NodeId`]; parent/child
//! order is stored as ids. Mutations only enter through
//! [`DocumentModel::apply_operation`] (logged edits) or
//! [`DocumentModel::append_block`] (initial load), and every edit is fully
//! validated before the arena is touched.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::error::{DocxError, Result};
use crate::format::schema_position;
use crate::node::{Node, NodeId, NodeKind, NodeTemplate, Subtree};
use crate::ops::{Edit, Operation};
use crate::package::{PackageMetadata, PartMap};

/// Marker for a deleted node, kept so later restores can be validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    pub kind: NodeKind,
    /// Seq of the operation that deleted the node.
    pub deleted_at: u64,
}

/// Summary counts for a document version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub paragraphs: usize,
    pub tables: usize,
    pub runs: usize,
    pub words: usize,
    pub chars: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentModel {
    document_id: Uuid,
    /// Seq of the last applied operation (0 = as loaded).
    revision: u64,
    next_id: u64,
    nodes: BTreeMap<NodeId, Node>,
    tombstones: BTreeMap<NodeId, Tombstone>,
    package: PartMap,
    metadata: PackageMetadata,
}

impl DocumentModel {
    /// An empty document: just the body root.
    pub fn empty(document_id: Uuid) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(NodeId::ROOT, Node::new(NodeId::ROOT, NodeKind::Body, None));
        Self {
            document_id,
            revision: 0,
            next_id: 1,
            nodes,
            tombstones: BTreeMap::new(),
            package: PartMap::default(),
            metadata: PackageMetadata::default(),
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn document_id(&self) -> Uuid {
        self.document_id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// The id the next inserted node will receive.
    pub fn next_node_id(&self) -> u64 {
        self.next_id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_tombstoned(&self, id: NodeId) -> bool {
        self.tombstones.contains_key(&id)
    }

    pub fn tombstone(&self, id: NodeId) -> Option<&Tombstone> {
        self.tombstones.get(&id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Number of live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks().is_empty()
    }

    /// Top-level blocks in document order.
    pub fn blocks(&self) -> &[NodeId] {
        self.children(NodeId::ROOT)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn package(&self) -> &PartMap {
        &self.package
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    /// Attach the package parts and metadata captured at load time.
    pub fn set_package(&mut self, package: PartMap, metadata: PackageMetadata) {
        self.package = package;
        self.metadata = metadata;
    }

    /// Live node ids in document (pre-)order, the root first.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| self.nodes.get(id).is_some_and(|n| n.kind == kind))
            .collect()
    }

    /// Concatenated run text under `id`.
    pub fn text_of(&self, id: NodeId) -> String {
        let mut out = String::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.get(&cur) {
                out.push_str(&node.text);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Plain text of the whole document, one line per paragraph.
    pub fn plain_text(&self) -> String {
        self.nodes_of_kind(NodeKind::Paragraph)
            .into_iter()
            .map(|p| self.text_of(p))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn stats(&self) -> DocumentStats {
        let mut stats = DocumentStats::default();
        for node in self.nodes.values() {
            match node.kind {
                NodeKind::Paragraph => {
                    stats.paragraphs += 1;
                    stats.words += self.text_of(node.id).split_whitespace().count();
                }
                NodeKind::Table => stats.tables += 1,
                NodeKind::Run => {
                    stats.runs += 1;
                    stats.chars += node.char_len();
                }
                _ => {}
            }
        }
        stats
    }

    /// Whether `ancestor` is `node` or one of its ancestors.
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = Some(node);
        while let Some(id) = cur {
            if id == ancestor {
                return true;
            }
            cur = self.parent(id);
        }
        false
    }

    /// Copy of the live subtree rooted at `id`, ids included.
    pub fn subtree(&self, id: NodeId) -> Option<Subtree> {
        let node = self.nodes.get(&id)?;
        Some(Subtree {
            id,
            kind: node.kind,
            text: node.text.clone(),
            format: node.format.clone(),
            children: node
                .children
                .iter()
                .filter_map(|c| self.subtree(*c))
                .collect(),
        })
    }

    /// Same live tree: ids, kinds, text, format and child order.
    /// Revision, id allocation and tombstones are not compared.
    pub fn structurally_eq(&self, other: &DocumentModel) -> bool {
        // `IndexMap` equality ignores key order; the writer does not.
        self.nodes == other.nodes
            && self
                .nodes
                .values()
                .zip(other.nodes.values())
                .all(|(a, b)| a.format.keys().eq(b.format.keys()))
    }

    // ─── Loading ──────────────────────────────────────────────────────

    /// Append a parsed top-level block. Used while loading a package; not a
    /// logged edit and does not change the revision.
    pub fn append_block(&mut self, block: &NodeTemplate) -> Result<NodeId> {
        if !block.kind.is_block() {
            return Err(DocxError::invalid(format!("{:?} is not a top-level block", block.kind)));
        }
        if self.closed_by_section_break() {
            return Err(DocxError::invalid("no block can follow the closing section break"));
        }
        let subtree = Subtree::from_template(block, &mut self.next_id);
        Self::validate_subtree(NodeKind::Body, &subtree)?;
        let index = self.blocks().len();
        let id = subtree.id;
        self.insert_subtrees(NodeId::ROOT, index, std::slice::from_ref(&subtree));
        Ok(id)
    }

    // ─── Operations ───────────────────────────────────────────────────

    /// Apply a logged operation. `op.seq` must be exactly `revision + 1`.
    ///
    /// This is the only forward path: live edits and history replay both
    /// call it, so their semantics cannot diverge.
    pub fn apply_operation(&mut self, op: &Operation) -> Result<()> {
        if op.document_id != self.document_id {
            return Err(DocxError::invalid(format!(
                "operation {} belongs to document {}",
                op.seq, op.document_id
            )));
        }
        let expected = self.revision + 1;
        if op.seq != expected {
            return Err(DocxError::RevisionMismatch { expected, got: op.seq });
        }
        self.apply_edit(op.target, &op.payload, op.seq)?;
        self.revision = op.seq;
        Ok(())
    }

    /// Undo the most recently applied operation in place using its inverse.
    /// Used to roll back an edit whose durable append failed.
    pub fn revert_operation(&mut self, op: &Operation) -> Result<()> {
        if op.seq != self.revision {
            return Err(DocxError::RevisionMismatch { expected: self.revision, got: op.seq });
        }
        self.apply_edit(op.target, &op.inverse_payload, op.seq)?;
        self.revision = op.seq - 1;
        Ok(())
    }

    /// Drop tombstones for deletions recorded before `before_seq`.
    pub fn prune_tombstones(&mut self, before_seq: u64) -> usize {
        let before = self.tombstones.len();
        self.tombstones.retain(|_, t| t.deleted_at >= before_seq);
        before - self.tombstones.len()
    }

    fn apply_edit(&mut self, target: NodeId, edit: &Edit, seq: u64) -> Result<()> {
        match edit {
            Edit::InsertNode { parent, index, nodes } => {
                self.validate_insert(target, *parent, *index, nodes)?;
                self.insert_subtrees(*parent, *index, nodes);
            }
            Edit::DeleteNode { parent, index, count } => {
                self.validate_delete(target, *parent, *index, *count)?;
                self.delete_range(*parent, *index, *count, seq);
            }
            Edit::MoveNode { parent, index } => {
                self.validate_move(target, *parent, *index)?;
                self.move_node(target, *parent, *index);
            }
            Edit::SetText { offset, removed, inserted } => {
                let start = self.validate_set_text(target, *offset, removed)?;
                let node = self.live_mut(target)?;
                node.text.replace_range(start..start + removed.len(), inserted);
            }
            Edit::SetFormat { changes, positions } => {
                if target == NodeId::ROOT {
                    return Err(DocxError::invalid("the body root carries no format"));
                }
                let node = self.live_mut(target)?;
                for (key, value) in changes {
                    match value {
                        Some(v) => {
                            if let Some(existing) = node.format.get_mut(key) {
                                existing.clone_from(v);
                                continue;
                            }
                            let index = match positions.get(key) {
                                Some(i) => (*i).min(node.format.len()),
                                None => schema_position(node.kind, &node.format, key),
                            };
                            node.format.shift_insert(index, key.clone(), v.clone());
                        }
                        None => {
                            node.format.shift_remove(key);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn live(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| {
            if self.tombstones.contains_key(&id) {
                DocxError::invalid(format!("node {id} has been deleted"))
            } else {
                DocxError::invalid(format!("node {id} does not exist"))
            }
        })
    }

    fn live_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| DocxError::invalid(format!("node {id} does not exist")))
    }

    fn validate_subtree(parent_kind: NodeKind, subtree: &Subtree) -> Result<()> {
        if !parent_kind.accepts(subtree.kind) {
            return Err(DocxError::invalid(format!(
                "{:?} cannot contain {:?}",
                parent_kind, subtree.kind
            )));
        }
        if subtree.kind != NodeKind::Run && !subtree.text.is_empty() {
            return Err(DocxError::invalid(format!("{:?} cannot hold text", subtree.kind)));
        }
        if subtree.kind == NodeKind::TableCell && subtree.children.is_empty() {
            return Err(DocxError::invalid("a table cell needs at least one block"));
        }
        for child in &subtree.children {
            Self::validate_subtree(subtree.kind, child)?;
        }
        Ok(())
    }

    fn validate_insert(
        &self,
        target: NodeId,
        parent: NodeId,
        index: usize,
        nodes: &[Subtree],
    ) -> Result<()> {
        let first = nodes.first().ok_or_else(|| DocxError::invalid("nothing to insert"))?;
        if first.id != target {
            return Err(DocxError::invalid(format!(
                "insert target {target} is not the first inserted node {}",
                first.id
            )));
        }
        let parent_node = self.live(parent)?;
        if index > parent_node.children.len() {
            return Err(DocxError::invalid(format!(
                "index {index} out of bounds for {parent} with {} children",
                parent_node.children.len()
            )));
        }
        if parent_node.kind == NodeKind::Body {
            let closed = self.closed_by_section_break();
            if closed && index == parent_node.children.len() {
                return Err(DocxError::invalid("no block can follow the closing section break"));
            }
            let last = nodes.len() - 1;
            for (i, root) in nodes.iter().enumerate() {
                if root.kind == NodeKind::SectionBreak
                    && (closed || i != last || index != parent_node.children.len())
                {
                    return Err(DocxError::invalid("a section break can only close the body"));
                }
            }
        }
        let mut seen = HashSet::new();
        for root in nodes {
            Self::validate_subtree(parent_node.kind, root)?;
            for id in root.ids() {
                if id == NodeId::ROOT || !seen.insert(id) {
                    return Err(DocxError::invalid(format!("node id {id} is used twice")));
                }
                if self.nodes.contains_key(&id) {
                    return Err(DocxError::invalid(format!("node {id} already exists")));
                }
                if id.0 < self.next_id && !self.tombstones.contains_key(&id) {
                    return Err(DocxError::invalid(format!(
                        "node id {id} was allocated before and has no tombstone"
                    )));
                }
            }
        }
        Ok(())
    }

    fn insert_subtrees(&mut self, parent: NodeId, index: usize, nodes: &[Subtree]) {
        for (offset, root) in nodes.iter().enumerate() {
            self.insert_subtree(root, parent);
            if let Some(p) = self.nodes.get_mut(&parent) {
                p.children.insert(index + offset, root.id);
            }
        }
    }

    fn insert_subtree(&mut self, subtree: &Subtree, parent: NodeId) {
        let mut node = Node::new(subtree.id, subtree.kind, Some(parent));
        node.text = subtree.text.clone();
        node.format = subtree.format.clone();
        node.children = subtree.children.iter().map(|c| c.id).collect();
        self.nodes.insert(subtree.id, node);
        self.tombstones.remove(&subtree.id);
        self.next_id = self.next_id.max(subtree.id.0.saturating_add(1));
        for child in &subtree.children {
            self.insert_subtree(child, subtree.id);
        }
    }

    fn validate_delete(&self, target: NodeId, parent: NodeId, index: usize, count: usize) -> Result<()> {
        if count == 0 {
            return Err(DocxError::invalid("empty delete range"));
        }
        let parent_node = self.live(parent)?;
        if !matches!(index.checked_add(count), Some(end) if end <= parent_node.children.len()) {
            return Err(DocxError::invalid(format!(
                "delete of {count} nodes at {index} out of bounds for {parent}"
            )));
        }
        if parent_node.children[index] != target {
            return Err(DocxError::invalid(format!(
                "node {target} is not at index {index} of {parent}"
            )));
        }
        if parent_node.kind == NodeKind::TableCell && count == parent_node.children.len() {
            return Err(DocxError::invalid(format!("cannot empty table cell {parent}")));
        }
        Ok(())
    }

    fn delete_range(&mut self, parent: NodeId, index: usize, count: usize, seq: u64) {
        let removed: Vec<NodeId> = match self.nodes.get_mut(&parent) {
            Some(p) => p.children.drain(index..index + count).collect(),
            None => return,
        };
        for id in removed {
            self.remove_subtree(id, seq);
        }
    }

    fn remove_subtree(&mut self, id: NodeId, seq: u64) {
        if let Some(node) = self.nodes.remove(&id) {
            self.tombstones.insert(id, Tombstone { kind: node.kind, deleted_at: seq });
            for child in node.children {
                self.remove_subtree(child, seq);
            }
        }
    }

    fn validate_move(&self, target: NodeId, new_parent: NodeId, index: usize) -> Result<()> {
        if target == NodeId::ROOT {
            return Err(DocxError::invalid("the body root cannot be moved"));
        }
        let node = self.live(target)?;
        if node.kind == NodeKind::SectionBreak {
            return Err(DocxError::invalid("the closing section break cannot be moved"));
        }
        if let Some(old) = node.parent.filter(|p| *p != new_parent) {
            let old_node = self.live(old)?;
            if old_node.kind == NodeKind::TableCell && old_node.children.len() == 1 {
                return Err(DocxError::invalid(format!("cannot empty table cell {old}")));
            }
        }
        let parent_node = self.live(new_parent)?;
        if !parent_node.kind.accepts(node.kind) {
            return Err(DocxError::invalid(format!(
                "{:?} cannot contain {:?}",
                parent_node.kind, node.kind
            )));
        }
        if self.is_ancestor_or_self(target, new_parent) {
            return Err(DocxError::invalid(format!(
                "cannot move {target} into its own descendant {new_parent}"
            )));
        }
        let available = if node.parent == Some(new_parent) {
            parent_node.children.len() - 1
        } else {
            parent_node.children.len()
        };
        if index > available {
            return Err(DocxError::invalid(format!(
                "index {index} out of bounds for {new_parent} with {available} children"
            )));
        }
        if parent_node.kind == NodeKind::Body && index == available && self.closed_by_section_break() {
            return Err(DocxError::invalid("no block can follow the closing section break"));
        }
        Ok(())
    }

    /// Whether the body ends with its section properties.
    fn closed_by_section_break(&self) -> bool {
        self.blocks()
            .last()
            .and_then(|id| self.nodes.get(id))
            .is_some_and(|n| n.kind == NodeKind::SectionBreak)
    }

    fn move_node(&mut self, target: NodeId, new_parent: NodeId, index: usize) {
        let old_parent = self.parent(target);
        if let Some(old) = old_parent.and_then(|p| self.nodes.get_mut(&p)) {
            old.children.retain(|c| *c != target);
        }
        if let Some(p) = self.nodes.get_mut(&new_parent) {
            p.children.insert(index, target);
        }
        if let Some(n) = self.nodes.get_mut(&target) {
            n.parent = Some(new_parent);
        }
    }

    /// Returns the byte offset of `offset` once the splice is known to be valid.
    fn validate_set_text(&self, target: NodeId, offset: usize, removed: &str) -> Result<usize> {
        let node = self.live(target)?;
        if node.kind != NodeKind::Run {
            return Err(DocxError::invalid(format!("{target} is a {:?}, not a run", node.kind)));
        }
        let start = char_to_byte(&node.text, offset).ok_or_else(|| {
            DocxError::invalid(format!(
                "offset {offset} past end of run {target} ({} chars)",
                node.char_len()
            ))
        })?;
        if !node.text[start..].starts_with(removed) {
            return Err(DocxError::invalid(format!(
                "run {target} does not contain {removed:?} at offset {offset}"
            )));
        }
        Ok(start)
    }

    // ─── Serialization ────────────────────────────────────────────────

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| DocxError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (model, _): (Self, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| DocxError::Serialization(e.to_string()))?;
        Ok(model)
    }
}

/// Byte index of char `offset`; `None` when past the end.
pub(crate) fn char_to_byte(text: &str, offset: usize) -> Option<usize> {
    if offset == 0 {
        return Some(0);
    }
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::PlannedEdit;
    use indexmap::IndexMap;

    fn model_with(blocks: &[NodeTemplate]) -> DocumentModel {
        let mut model = DocumentModel::empty(Uuid::new_v4());
        for b in blocks {
            model.append_block(b).unwrap();
        }
        model
    }

    fn op(model: &DocumentModel, target: NodeId, payload: Edit, inverse: Edit) -> Operation {
        Operation::new(
            model.revision() + 1,
            model.document_id(),
            PlannedEdit { target, payload, inverse_payload: inverse },
        )
    }

    #[test]
    fn test_empty_model() {
        let model = DocumentModel::empty(Uuid::new_v4());
        assert_eq!(model.len(), 1);
        assert!(model.is_empty());
        assert_eq!(model.revision(), 0);
        assert_eq!(model.next_node_id(), 1);
    }

    #[test]
    fn test_append_block_assigns_monotonic_ids() {
        let model = model_with(&[
            NodeTemplate::paragraph_with_text("one"),
            NodeTemplate::paragraph_with_text("two"),
        ]);
        assert_eq!(model.blocks(), &[NodeId(1), NodeId(3)]);
        assert_eq!(model.text_of(NodeId(3)), "two");
        assert_eq!(model.plain_text(), "one\ntwo");
        assert_eq!(model.next_node_id(), 5);
    }

    #[test]
    fn test_append_block_rejects_run() {
        let mut model = DocumentModel::empty(Uuid::new_v4());
        assert!(model.append_block(&NodeTemplate::run("x")).is_err());
    }

    #[test]
    fn test_set_text_splice_and_revert() {
        let mut model = model_with(&[NodeTemplate::paragraph_with_text("Hello world")]);
        let run = NodeId(2);
        let o = op(
            &model,
            run,
            Edit::SetText { offset: 6, removed: "world".into(), inserted: "there".into() },
            Edit::SetText { offset: 6, removed: "there".into(), inserted: "world".into() },
        );
        model.apply_operation(&o).unwrap();
        assert_eq!(model.text_of(run), "Hello there");
        assert_eq!(model.revision(), 1);

        model.revert_operation(&o).unwrap();
        assert_eq!(model.text_of(run), "Hello world");
        assert_eq!(model.revision(), 0);
    }

    #[test]
    fn test_set_text_multibyte_offsets() {
        let mut model = model_with(&[NodeTemplate::paragraph_with_text("héllo")]);
        let o = op(
            &model,
            NodeId(2),
            Edit::SetText { offset: 2, removed: "l".into(), inserted: "L".into() },
            Edit::SetText { offset: 2, removed: "L".into(), inserted: "l".into() },
        );
        model.apply_operation(&o).unwrap();
        assert_eq!(model.text_of(NodeId(2)), "héLlo");
    }

    #[test]
    fn test_set_text_mismatch_leaves_model_untouched() {
        let mut model = model_with(&[NodeTemplate::paragraph_with_text("abc")]);
        let before = model.clone();
        let o = op(
            &model,
            NodeId(2),
            Edit::SetText { offset: 1, removed: "x".into(), inserted: String::new() },
            Edit::SetText { offset: 1, removed: String::new(), inserted: "x".into() },
        );
        assert!(matches!(model.apply_operation(&o), Err(DocxError::InvalidStructuralEdit(_))));
        assert_eq!(model, before);
    }

    #[test]
    fn test_revision_must_be_next() {
        let mut model = model_with(&[NodeTemplate::paragraph()]);
        let mut o = op(
            &model,
            NodeId(1),
            Edit::SetFormat {
                changes: IndexMap::from([("jc".to_string(), Some("center".to_string()))]),
                positions: IndexMap::new(),
            },
            Edit::SetFormat { changes: IndexMap::from([("jc".to_string(), None)]), positions: IndexMap::new() },
        );
        o.seq = 3;
        assert_eq!(
            model.apply_operation(&o),
            Err(DocxError::RevisionMismatch { expected: 1, got: 3 })
        );
    }

    #[test]
    fn test_delete_records_tombstones_and_restore() {
        let mut model = model_with(&[
            NodeTemplate::paragraph_with_text("a"),
            NodeTemplate::paragraph_with_text("b"),
        ]);
        let original = model.clone();
        let deleted = model.subtree(NodeId(1)).unwrap();
        let o = op(
            &model,
            NodeId(1),
            Edit::DeleteNode { parent: NodeId::ROOT, index: 0, count: 1 },
            Edit::InsertNode { parent: NodeId::ROOT, index: 0, nodes: vec![deleted] },
        );
        model.apply_operation(&o).unwrap();
        assert!(!model.contains(NodeId(1)));
        assert!(model.is_tombstoned(NodeId(1)));
        assert!(model.is_tombstoned(NodeId(2)));
        assert_eq!(model.tombstone(NodeId(2)).unwrap().deleted_at, 1);

        let undo = o.inverted(2);
        model.apply_operation(&undo).unwrap();
        assert!(model.structurally_eq(&original));
        assert_eq!(model.tombstone_count(), 0);
    }

    #[test]
    fn test_delete_count_overflow_leaves_model_untouched() {
        let mut model = model_with(&[NodeTemplate::paragraph(), NodeTemplate::paragraph()]);
        let before = model.clone();
        let o = op(
            &model,
            NodeId(2),
            Edit::DeleteNode { parent: NodeId::ROOT, index: 1, count: usize::MAX },
            Edit::InsertNode { parent: NodeId::ROOT, index: 1, nodes: vec![] },
        );
        assert!(matches!(model.apply_operation(&o), Err(DocxError::InvalidStructuralEdit(_))));
        assert_eq!(model, before);
    }

    #[test]
    fn test_insert_rejects_reused_id_without_tombstone() {
        let mut model = model_with(&[NodeTemplate::paragraph()]);
        let reused = Subtree {
            id: NodeId(1),
            kind: NodeKind::Paragraph,
            text: String::new(),
            format: Default::default(),
            children: vec![],
        };
        let o = op(
            &model,
            NodeId(1),
            Edit::InsertNode { parent: NodeId::ROOT, index: 1, nodes: vec![reused] },
            Edit::DeleteNode { parent: NodeId::ROOT, index: 1, count: 1 },
        );
        assert!(model.apply_operation(&o).is_err());
    }

    #[test]
    fn test_move_cycle_rejected() {
        let table = NodeTemplate::new(NodeKind::Table).with_child(
            NodeTemplate::new(NodeKind::TableRow).with_child(
                NodeTemplate::new(NodeKind::TableCell).with_child(NodeTemplate::paragraph()),
            ),
        );
        let mut model = model_with(&[table]);
        // Table #1 → row #2 → cell #3 → paragraph #4. Moving the table into its own cell.
        let o = op(
            &model,
            NodeId(1),
            Edit::MoveNode { parent: NodeId(3), index: 0 },
            Edit::MoveNode { parent: NodeId::ROOT, index: 0 },
        );
        let err = model.apply_operation(&o).unwrap_err();
        assert!(err.to_string().contains("descendant"));
    }

    #[test]
    fn test_move_within_same_parent() {
        let mut model = model_with(&[
            NodeTemplate::paragraph_with_text("a"),
            NodeTemplate::paragraph_with_text("b"),
            NodeTemplate::paragraph_with_text("c"),
        ]);
        let o = op(
            &model,
            NodeId(1),
            Edit::MoveNode { parent: NodeId::ROOT, index: 2 },
            Edit::MoveNode { parent: NodeId::ROOT, index: 0 },
        );
        model.apply_operation(&o).unwrap();
        assert_eq!(model.plain_text(), "b\nc\na");
        model.revert_operation(&o).unwrap();
        assert_eq!(model.plain_text(), "a\nb\nc");
    }

    #[test]
    fn test_prune_tombstones() {
        let mut model = model_with(&[NodeTemplate::paragraph(), NodeTemplate::paragraph()]);
        for (seq, id) in [(1u64, NodeId(1)), (2, NodeId(2))] {
            let sub = model.subtree(id).unwrap();
            let o = op(
                &model,
                id,
                Edit::DeleteNode { parent: NodeId::ROOT, index: 0, count: 1 },
                Edit::InsertNode { parent: NodeId::ROOT, index: 0, nodes: vec![sub] },
            );
            assert_eq!(o.seq, seq);
            model.apply_operation(&o).unwrap();
        }
        assert_eq!(model.prune_tombstones(2), 1);
        assert!(!model.is_tombstoned(NodeId(1)));
        assert!(model.is_tombstoned(NodeId(2)));
    }

    #[test]
    fn test_stats() {
        let model = model_with(&[
            NodeTemplate::paragraph_with_text("The quick brown fox"),
            NodeTemplate::paragraph_with_text("jumps"),
        ]);
        let stats = model.stats();
        assert_eq!(stats.paragraphs, 2);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.words, 5);
        assert_eq!(stats.chars, 24);
    }

    #[test]
    fn test_model_bytes_roundtrip() {
        let model = model_with(&[NodeTemplate::paragraph_with_text("persist me").with_format("jc", "center")]);
        let restored = DocumentModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn test_char_to_byte() {
        assert_eq!(char_to_byte("héllo", 0), Some(0));
        assert_eq!(char_to_byte("héllo", 2), Some(3));
        assert_eq!(char_to_byte("héllo", 5), Some(6));
        assert_eq!(char_to_byte("héllo", 6), None);
    }

    // ─── Container rules ─────────────────────────────────────────────

    fn one_cell_table() -> DocumentModel {
        // Table #1 → row #2 → cell #3 → paragraph #4, then paragraph #5.
        model_with(&[
            NodeTemplate::new(NodeKind::Table).with_child(
                NodeTemplate::new(NodeKind::TableRow)
                    .with_child(NodeTemplate::new(NodeKind::TableCell).with_child(NodeTemplate::paragraph())),
            ),
            NodeTemplate::paragraph(),
        ])
    }

    #[test]
    fn test_table_cell_cannot_be_emptied() {
        let mut model = one_cell_table();
        let before = model.clone();

        let delete = op(
            &model,
            NodeId(4),
            Edit::DeleteNode { parent: NodeId(3), index: 0, count: 1 },
            Edit::InsertNode { parent: NodeId(3), index: 0, nodes: vec![] },
        );
        assert!(matches!(model.apply_operation(&delete), Err(DocxError::InvalidStructuralEdit(_))));

        let move_out = op(
            &model,
            NodeId(4),
            Edit::MoveNode { parent: NodeId::ROOT, index: 0 },
            Edit::MoveNode { parent: NodeId(3), index: 0 },
        );
        assert!(matches!(model.apply_operation(&move_out), Err(DocxError::InvalidStructuralEdit(_))));
        assert_eq!(model, before);

        // A second block makes the first one removable.
        let move_in = op(
            &model,
            NodeId(5),
            Edit::MoveNode { parent: NodeId(3), index: 1 },
            Edit::MoveNode { parent: NodeId::ROOT, index: 1 },
        );
        model.apply_operation(&move_in).unwrap();
        let delete = op(
            &model,
            NodeId(4),
            Edit::DeleteNode { parent: NodeId(3), index: 0, count: 1 },
            Edit::InsertNode { parent: NodeId(3), index: 0, nodes: vec![] },
        );
        model.apply_operation(&delete).unwrap();
        assert_eq!(model.children(NodeId(3)), &[NodeId(5)]);
    }

    #[test]
    fn test_empty_cell_cannot_be_inserted() {
        let mut model = DocumentModel::empty(Uuid::new_v4());
        let table = NodeTemplate::new(NodeKind::Table)
            .with_child(NodeTemplate::new(NodeKind::TableRow).with_child(NodeTemplate::new(NodeKind::TableCell)));
        assert!(model.append_block(&table).is_err());
        assert!(model.blocks().is_empty());
    }

    #[test]
    fn test_section_break_stays_last() {
        let mut model = one_cell_table();
        model.append_block(&NodeTemplate::new(NodeKind::SectionBreak)).unwrap();
        assert!(model.append_block(&NodeTemplate::paragraph()).is_err());
        let before = model.clone();
        let fresh = |id: u64, kind: NodeKind| Subtree {
            id: NodeId(id),
            kind,
            text: String::new(),
            format: Default::default(),
            children: vec![],
        };

        let after_break = op(
            &model,
            NodeId(7),
            Edit::InsertNode { parent: NodeId::ROOT, index: 3, nodes: vec![fresh(7, NodeKind::Paragraph)] },
            Edit::DeleteNode { parent: NodeId::ROOT, index: 3, count: 1 },
        );
        let second_break = op(
            &model,
            NodeId(7),
            Edit::InsertNode { parent: NodeId::ROOT, index: 0, nodes: vec![fresh(7, NodeKind::SectionBreak)] },
            Edit::DeleteNode { parent: NodeId::ROOT, index: 0, count: 1 },
        );
        let move_break = op(
            &model,
            NodeId(6),
            Edit::MoveNode { parent: NodeId::ROOT, index: 0 },
            Edit::MoveNode { parent: NodeId::ROOT, index: 2 },
        );
        let move_past_break = op(
            &model,
            NodeId(1),
            Edit::MoveNode { parent: NodeId::ROOT, index: 2 },
            Edit::MoveNode { parent: NodeId::ROOT, index: 0 },
        );
        for o in [after_break, second_break, move_break, move_past_break] {
            assert!(matches!(model.apply_operation(&o), Err(DocxError::InvalidStructuralEdit(_))), "{o:?}");
        }
        assert_eq!(model, before);

        let before_break = op(
            &model,
            NodeId(7),
            Edit::InsertNode { parent: NodeId::ROOT, index: 2, nodes: vec![fresh(7, NodeKind::Paragraph)] },
            Edit::DeleteNode { parent: NodeId::ROOT, index: 2, count: 1 },
        );
        model.apply_operation(&before_break).unwrap();
        assert_eq!(model.blocks(), &[NodeId(1), NodeId(5), NodeId(7), NodeId(6)]);
    }
}
