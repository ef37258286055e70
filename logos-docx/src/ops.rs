//! Logged document operations.
//!
//! Every mutation of a [`DocumentModel`](crate::DocumentModel) is expressed as
//! an [`Operation`]. Operations are:
//! - Immutable once created
//! - Invertible: the inverse payload is computed when the operation is built,
//!   so undo never diffs two models
//! - Replayable: live edits and history replay go through the same
//!   `DocumentModel::apply_operation`

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::node::{NodeId, Subtree};

/// Operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpKind {
    InsertNode = 1,
    DeleteNode = 2,
    MoveNode = 3,
    SetText = 4,
    SetFormat = 5,
}

/// Operation payload. The variant determines the [`OpKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Edit {
    /// Insert `nodes` as consecutive children of `parent` starting at `index`.
    /// The operation target is the first inserted root.
    InsertNode {
        parent: NodeId,
        index: usize,
        nodes: Vec<Subtree>,
    },
    /// Delete `count` consecutive children of `parent` starting at `index`.
    /// The target is the first deleted node and must sit at `index`.
    DeleteNode {
        parent: NodeId,
        index: usize,
        count: usize,
    },
    /// Move the target under `parent` at `index` (index counted after the
    /// target has been detached from its current parent).
    MoveNode { parent: NodeId, index: usize },
    /// Replace `removed` with `inserted` at char `offset` of a run's text.
    SetText {
        offset: usize,
        removed: String,
        inserted: String,
    },
    /// Set (`Some`) or clear (`None`) format properties.
    ///
    /// A key that is not present yet goes to `positions[key]` when given,
    /// otherwise to its schema position among the existing keys.
    SetFormat {
        changes: IndexMap<String, Option<String>>,
        positions: IndexMap<String, usize>,
    },
}

impl Edit {
    pub fn kind(&self) -> OpKind {
        match self {
            Edit::InsertNode { .. } => OpKind::InsertNode,
            Edit::DeleteNode { .. } => OpKind::DeleteNode,
            Edit::MoveNode { .. } => OpKind::MoveNode,
            Edit::SetText { .. } => OpKind::SetText,
            Edit::SetFormat { .. } => OpKind::SetFormat,
        }
    }

    /// Whether this edit changes tree shape.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Edit::InsertNode { .. } | Edit::DeleteNode { .. } | Edit::MoveNode { .. }
        )
    }
}

/// An edit with its precomputed inverse, before a seq is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEdit {
    pub target: NodeId,
    pub payload: Edit,
    pub inverse_payload: Edit,
}

/// An immutable, logged, invertible description of one document edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Gap-free per-document sequence number, starting at 1.
    pub seq: u64,
    pub document_id: Uuid,
    pub target: NodeId,
    pub payload: Edit,
    pub inverse_payload: Edit,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Operation {
    pub fn new(seq: u64, document_id: Uuid, planned: PlannedEdit) -> Self {
        Self {
            seq,
            document_id,
            target: planned.target,
            payload: planned.payload,
            inverse_payload: planned.inverse_payload,
            timestamp: now_millis(),
        }
    }

    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    /// A new forward operation that undoes `self`: payload and inverse swap.
    ///
    /// Undo is itself logged at `seq`; the log is never rewritten.
    pub fn inverted(&self, seq: u64) -> Self {
        Self {
            seq,
            document_id: self.document_id,
            target: self.target,
            payload: self.inverse_payload.clone(),
            inverse_payload: self.payload.clone(),
            timestamp: now_millis(),
        }
    }

    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| crate::DocxError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> crate::Result<Self> {
        let (op, _): (Self, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| crate::DocxError::Serialization(e.to_string()))?;
        Ok(op)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
