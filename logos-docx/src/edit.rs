//! Caller intents and the planner that turns them into invertible edits.
//!
//! Planning only reads the model. It resolves positions (which run an offset
//! falls in, where a node currently sits) and captures whatever the inverse
//! needs (removed text, previous format values, deleted subtrees). The model
//! re-validates the edit when it is applied.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DocxError, Result};
use crate::model::DocumentModel;
use crate::node::{Node, NodeId, NodeKind, NodeTemplate, Subtree};
use crate::ops::{Edit, PlannedEdit};

/// A caller-level edit request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Intent {
    /// Insert `text` at char `offset` of a run, or of a paragraph's text.
    InsertText { at: NodeId, offset: usize, text: String },
    /// Remove `len` chars from a run starting at `offset`.
    DeleteText { run: NodeId, offset: usize, len: usize },
    /// Remove the sibling range `start..=end`.
    DeleteRange { start: NodeId, end: NodeId },
    /// Set (`Some`) or clear (`None`) format properties.
    SetFormat { node: NodeId, attrs: IndexMap<String, Option<String>> },
    MoveNode { node: NodeId, new_parent: NodeId, index: usize },
    InsertNode { parent: NodeId, index: usize, template: NodeTemplate },
}

impl Intent {
    pub fn insert_text(at: NodeId, offset: usize, text: impl Into<String>) -> Self {
        Intent::InsertText { at, offset, text: text.into() }
    }

    pub fn set_format<K, V>(node: NodeId, attrs: impl IntoIterator<Item = (K, Option<V>)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Intent::SetFormat {
            node,
            attrs: attrs.into_iter().map(|(k, v)| (k.into(), v.map(Into::into))).collect(),
        }
    }
}

/// Resolve `intent` against the current state of `model`.
pub fn plan(model: &DocumentModel, intent: &Intent) -> Result<PlannedEdit> {
    match intent {
        Intent::InsertText { at, offset, text } => plan_insert_text(model, *at, *offset, text),
        Intent::DeleteText { run, offset, len } => plan_delete_text(model, *run, *offset, *len),
        Intent::DeleteRange { start, end } => plan_delete_range(model, *start, *end),
        Intent::SetFormat { node, attrs } => plan_set_format(model, *node, attrs),
        Intent::MoveNode { node, new_parent, index } => {
            let current = live(model, *node)?;
            let old_parent = current
                .parent
                .ok_or_else(|| DocxError::invalid("the body root cannot be moved"))?;
            let old_index = index_in_parent(model, old_parent, *node)?;
            Ok(PlannedEdit {
                target: *node,
                payload: Edit::MoveNode { parent: *new_parent, index: *index },
                inverse_payload: Edit::MoveNode { parent: old_parent, index: old_index },
            })
        }
        Intent::InsertNode { parent, index, template } => {
            let mut next = model.next_node_id();
            let subtree = Subtree::from_template(template, &mut next);
            Ok(PlannedEdit {
                target: subtree.id,
                payload: Edit::InsertNode { parent: *parent, index: *index, nodes: vec![subtree] },
                inverse_payload: Edit::DeleteNode { parent: *parent, index: *index, count: 1 },
            })
        }
    }
}

fn live(model: &DocumentModel, id: NodeId) -> Result<&Node> {
    model
        .node(id)
        .ok_or_else(|| DocxError::invalid(format!("node {id} does not exist")))
}

fn index_in_parent(model: &DocumentModel, parent: NodeId, id: NodeId) -> Result<usize> {
    model
        .children(parent)
        .iter()
        .position(|c| *c == id)
        .ok_or_else(|| DocxError::invalid(format!("node {id} is not a child of {parent}")))
}

fn splice(target: NodeId, offset: usize, removed: String, inserted: String) -> PlannedEdit {
    PlannedEdit {
        target,
        payload: Edit::SetText { offset, removed: removed.clone(), inserted: inserted.clone() },
        inverse_payload: Edit::SetText { offset, removed: inserted, inserted: removed },
    }
}

fn plan_insert_text(model: &DocumentModel, at: NodeId, offset: usize, text: &str) -> Result<PlannedEdit> {
    if text.is_empty() {
        return Err(DocxError::invalid("inserted text is empty"));
    }
    let node = live(model, at)?;
    match node.kind {
        NodeKind::Run => {
            if offset > node.char_len() {
                return Err(DocxError::invalid(format!(
                    "offset {offset} past end of run {at} ({} chars)",
                    node.char_len()
                )));
            }
            Ok(splice(at, offset, String::new(), text.to_string()))
        }
        NodeKind::Paragraph => {
            let runs: Vec<&Node> = node.children.iter().filter_map(|c| model.node(*c)).collect();
            if runs.is_empty() {
                if offset != 0 {
                    return Err(DocxError::invalid(format!(
                        "offset {offset} past end of empty paragraph {at}"
                    )));
                }
                let mut next = model.next_node_id();
                let run = Subtree::from_template(&NodeTemplate::run(text), &mut next);
                return Ok(PlannedEdit {
                    target: run.id,
                    payload: Edit::InsertNode { parent: at, index: 0, nodes: vec![run] },
                    inverse_payload: Edit::DeleteNode { parent: at, index: 0, count: 1 },
                });
            }
            let mut start = 0;
            for run in runs {
                let len = run.char_len();
                if offset <= start + len {
                    return Ok(splice(run.id, offset - start, String::new(), text.to_string()));
                }
                start += len;
            }
            Err(DocxError::invalid(format!(
                "offset {offset} past end of paragraph {at} ({start} chars)"
            )))
        }
        other => Err(DocxError::invalid(format!("cannot insert text into {other:?} {at}"))),
    }
}

fn plan_delete_text(model: &DocumentModel, run: NodeId, offset: usize, len: usize) -> Result<PlannedEdit> {
    let node = live(model, run)?;
    if node.kind != NodeKind::Run {
        return Err(DocxError::invalid(format!("{run} is a {:?}, not a run", node.kind)));
    }
    if len == 0 {
        return Err(DocxError::invalid("empty text deletion"));
    }
    if !matches!(offset.checked_add(len), Some(end) if end <= node.char_len()) {
        return Err(DocxError::invalid(format!(
            "range of {len} chars at {offset} past end of run {run} ({} chars)",
            node.char_len()
        )));
    }
    let removed: String = node.text.chars().skip(offset).take(len).collect();
    Ok(splice(run, offset, removed, String::new()))
}

fn plan_delete_range(model: &DocumentModel, start: NodeId, end: NodeId) -> Result<PlannedEdit> {
    let first = live(model, start)?;
    let last = live(model, end)?;
    let parent = first
        .parent
        .ok_or_else(|| DocxError::invalid("the body root cannot be deleted"))?;
    if last.parent != Some(parent) {
        return Err(DocxError::invalid(format!("{start} and {end} are not siblings")));
    }
    let i = index_in_parent(model, parent, start)?;
    let j = index_in_parent(model, parent, end)?;
    if i > j {
        return Err(DocxError::invalid(format!("{start} comes after {end}")));
    }
    let nodes = model.children(parent)[i..=j]
        .iter()
        .filter_map(|id| model.subtree(*id))
        .collect();
    Ok(PlannedEdit {
        target: start,
        payload: Edit::DeleteNode { parent, index: i, count: j - i + 1 },
        inverse_payload: Edit::InsertNode { parent, index: i, nodes },
    })
}

fn plan_set_format(
    model: &DocumentModel,
    id: NodeId,
    attrs: &IndexMap<String, Option<String>>,
) -> Result<PlannedEdit> {
    if id == NodeId::ROOT {
        return Err(DocxError::invalid("the body root carries no format"));
    }
    if attrs.is_empty() {
        return Err(DocxError::invalid("no format changes"));
    }
    let node = live(model, id)?;
    // The inverse drops added keys first, then puts removed keys back at
    // their old index in ascending order, which rebuilds the original order.
    let mut previous: Vec<(usize, &String, Option<String>)> = attrs
        .keys()
        .map(|k| match node.format.get_full(k) {
            Some((index, _, value)) => (index, k, Some(value.clone())),
            None => (0, k, None),
        })
        .collect();
    previous.sort_by_key(|(index, _, value)| (value.is_some(), *index));
    let positions = previous
        .iter()
        .filter(|(_, key, value)| value.is_some() && attrs.get(*key) == Some(&None))
        .map(|(index, key, _)| ((*key).clone(), *index))
        .collect();
    let changes = previous
        .into_iter()
        .map(|(_, key, value)| (key.clone(), value))
        .collect();
    Ok(PlannedEdit {
        target: id,
        payload: Edit::SetFormat { changes: attrs.clone(), positions: IndexMap::new() },
        inverse_payload: Edit::SetFormat { changes, positions },
    })
}
