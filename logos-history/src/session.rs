//! One open document: the live model plus its undo/redo state.
//!
//! Every change goes through the same commit path:
//!
//! ```text
//! apply to model ──► append to log ──ok──► push undo, maybe snapshot
//!                          │
//!                          └──err──► revert model, fail the request
//! ```
//!
//! A caller therefore never observes a seq that is not durable. If the
//! request future is dropped while the append is in flight, the operation
//! stays in `pending` and is reconciled against the log head before the
//! next commit (or on close), then settled as if the request had finished.

use std::collections::VecDeque;
use uuid::Uuid;

use logos_docx::{DocumentModel, Operation, PlannedEdit};

use crate::error::{HistoryError, Result};
use crate::manager::HistoryManager;

/// Which request produced an operation, and so which stack it lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Edit,
    Undo,
    Redo,
}

#[derive(Debug)]
struct Pending {
    op: Operation,
    origin: Origin,
}

/// Live state of one open document.
pub struct HistorySession {
    model: DocumentModel,
    /// Applied to `model`, durability not yet confirmed
    pending: VecDeque<Pending>,
    /// Operations that can be undone, oldest first
    undo: VecDeque<Operation>,
    /// Undo operations that can be redone, newest last
    redo: Vec<Operation>,
    undo_depth: usize,
    /// A boundary snapshot could not be queued yet
    snapshot_deferred: bool,
    closed: bool,
}

impl HistorySession {
    pub fn new(model: DocumentModel, undo_depth: usize) -> Self {
        Self {
            model,
            pending: VecDeque::new(),
            undo: VecDeque::new(),
            redo: Vec::new(),
            undo_depth,
            snapshot_deferred: false,
            closed: false,
        }
    }

    pub fn document_id(&self) -> Uuid {
        self.model.document_id()
    }

    pub fn model(&self) -> &DocumentModel {
        &self.model
    }

    /// Seq of the last applied operation.
    pub fn last_seq(&self) -> u64 {
        self.model.revision()
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_snapshot_deferred(&self) -> bool {
        self.snapshot_deferred
    }

    /// Whether the session was closed. A closed session accepts no edits.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// Log and apply a freshly planned edit. Clears the redo stack.
    pub async fn apply(&mut self, history: &HistoryManager, planned: PlannedEdit) -> Result<u64> {
        self.reconcile(history).await?;
        let op = Operation::new(self.last_seq() + 1, self.document_id(), planned);
        self.commit(history, op, Origin::Edit).await
    }

    /// Undo the most recent undoable operation by logging its inverse as a
    /// new operation.
    pub async fn undo(&mut self, history: &HistoryManager) -> Result<u64> {
        self.reconcile(history).await?;
        let Some(last) = self.undo.pop_back() else {
            return Err(HistoryError::NothingToUndo);
        };
        let inverse = last.inverted(self.last_seq() + 1);
        let result = self.commit(history, inverse, Origin::Undo).await;
        if result.is_err() {
            self.undo.push_back(last);
        }
        result
    }

    /// Re-apply the most recently undone operation.
    pub async fn redo(&mut self, history: &HistoryManager) -> Result<u64> {
        self.reconcile(history).await?;
        let Some(undone) = self.redo.pop() else {
            return Err(HistoryError::NothingToRedo);
        };
        let forward = undone.inverted(self.last_seq() + 1);
        let result = self.commit(history, forward, Origin::Redo).await;
        if result.is_err() {
            self.redo.push(undone);
        }
        result
    }

    /// Make sure every applied operation is durable. Called before close.
    pub async fn flush(&mut self, history: &HistoryManager) -> Result<()> {
        self.reconcile(history).await?;
        self.retry_deferred_snapshot(history);
        Ok(())
    }

    async fn commit(&mut self, history: &HistoryManager, op: Operation, origin: Origin) -> Result<u64> {
        self.model.apply_operation(&op)?;
        self.pending.push_back(Pending { op: op.clone(), origin });

        match history.append(op.clone()).await {
            Ok(seq) => {
                if let Some(done) = self.pending.pop_back() {
                    self.settle(history, done);
                }
                Ok(seq)
            }
            Err(e) => {
                self.pending.pop_back();
                self.rollback(&op);
                Err(e)
            }
        }
    }

    /// Settle operations left in `pending` by a cancelled request: drop the
    /// ones the log already holds, append the rest.
    async fn reconcile(&mut self, history: &HistoryManager) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let head = history.head(self.document_id())?;
        while let Some(front) = self.pending.front() {
            let op = front.op.clone();
            let seq = op.seq;
            if seq > head {
                match history.append(op).await {
                    Ok(_) => {}
                    // The abandoned append landed after `head` was read.
                    Err(HistoryError::OutOfOrderSequence { expected, .. }) if expected > seq => {}
                    Err(e) => return Err(e),
                }
            }
            if let Some(done) = self.pending.pop_front() {
                log::debug!("Settled seq {seq} of {} after a cancelled request", self.document_id());
                self.settle(history, done);
            }
        }
        Ok(())
    }

    /// Book-keeping once `done` is durable: undo/redo stacks, tombstone
    /// pruning and the snapshot cadence.
    fn settle(&mut self, history: &HistoryManager, done: Pending) {
        let seq = done.op.seq;
        match done.origin {
            Origin::Edit => {
                self.redo.clear();
                self.push_undo(done.op);
            }
            Origin::Undo => self.redo.push(done.op),
            Origin::Redo => self.push_undo(done.op),
        }

        if history.is_snapshot_boundary(seq) {
            let pruned = self.model.prune_tombstones(self.tombstone_horizon(seq));
            if pruned > 0 {
                log::debug!("Pruned {pruned} tombstones in {} at seq {seq}", self.document_id());
            }
            self.snapshot_deferred = true;
        }
        self.retry_deferred_snapshot(history);
    }

    fn retry_deferred_snapshot(&mut self, history: &HistoryManager) {
        if self.snapshot_deferred && history.schedule_snapshot(&self.model) {
            self.snapshot_deferred = false;
        }
    }

    fn rollback(&mut self, op: &Operation) {
        if let Err(e) = self.model.revert_operation(op) {
            log::error!(
                "Failed to revert seq {} in {} after append failure: {e}",
                op.seq,
                self.document_id()
            );
        }
    }

    fn push_undo(&mut self, op: Operation) {
        self.undo.push_back(op);
        while self.undo.len() > self.undo_depth {
            self.undo.pop_front();
        }
    }

    /// Oldest deletion seq an undo or redo could still restore.
    fn tombstone_horizon(&self, seq: u64) -> u64 {
        self.undo
            .iter()
            .chain(self.redo.iter())
            .map(|op| op.seq)
            .min()
            .map_or(seq, |oldest| oldest.min(seq))
    }
}
