//! History orchestration: durable appends, snapshot cadence and
//! reconstruction of any past version.
//!
//! Reconstruction of `(doc, target)`:
//! 1. reject `target` above the durable head (`SequenceNotFound`)
//! 2. load the newest snapshot with seq ≤ target (or the empty sentinel)
//! 3. replay `(snapshot.seq, target]` from the log through
//!    `DocumentModel::apply_operation`, the same path live edits take
//!
//! Replay works on a private model and yields to the scheduler every
//! [`REPLAY_YIELD_EVERY`] operations. Dropping the future cancels it without
//! touching shared state.

use std::sync::Arc;
use uuid::Uuid;

use logos_docx::{DocumentModel, Operation};

use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::snapshotter::{SnapshotStats, Snapshotter};
use crate::storage::{OperationLog, Snapshot, SnapshotStore};

/// Operations replayed between cooperative yields.
pub const REPLAY_YIELD_EVERY: usize = 64;

/// A reconstructed version and how it was obtained.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub model: DocumentModel,
    /// Seq of the snapshot replay started from (0 for the sentinel)
    pub snapshot_seq: u64,
    /// Operations applied on top of the snapshot
    pub replayed: usize,
}

/// Owns the operation log, the snapshot store and the snapshot worker.
pub struct HistoryManager {
    config: HistoryConfig,
    log: Arc<OperationLog>,
    snapshots: Arc<SnapshotStore>,
    snapshotter: Snapshotter,
}

impl HistoryManager {
    /// Open storage under `config`. Must be called inside a tokio runtime.
    pub fn open(config: HistoryConfig) -> Result<Self> {
        let log = Arc::new(OperationLog::open(&config)?);
        let snapshots = Arc::new(SnapshotStore::open(&config.snapshot_dir, config.sync_writes)?);
        let snapshotter = Snapshotter::spawn(Arc::clone(&snapshots), config.snapshot_queue_depth);
        Ok(Self {
            config,
            log,
            snapshots,
            snapshotter,
        })
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    // ─── Writes ───────────────────────────────────────────────────────

    /// Durably append `op`; resolves once the write is persisted.
    ///
    /// The RocksDB write (and its fsync) runs on the blocking pool.
    pub async fn append(&self, op: Operation) -> Result<u64> {
        let log = Arc::clone(&self.log);
        let seq = op.seq;
        tokio::task::spawn_blocking(move || log.append(&op)).await??;
        Ok(seq)
    }

    /// Last durable seq for `document_id`.
    pub fn head(&self, document_id: Uuid) -> Result<u64> {
        Ok(self.log.head(document_id)?)
    }

    pub fn is_snapshot_boundary(&self, seq: u64) -> bool {
        self.config.is_snapshot_boundary(seq)
    }

    /// Hand a copy of `model` to the background writer. `false` means the
    /// queue was full and the caller should try again later.
    pub fn schedule_snapshot(&self, model: &DocumentModel) -> bool {
        self.snapshotter.schedule(model)
    }

    /// Write a snapshot of `model` and wait for it. Used for the base
    /// snapshot of an imported document.
    pub async fn write_snapshot(&self, model: &DocumentModel) -> Result<()> {
        let store = Arc::clone(&self.snapshots);
        let model = model.clone();
        tokio::task::spawn_blocking(move || store.write(&model)).await??;
        Ok(())
    }

    /// Wait for every queued snapshot to be handled.
    pub async fn flush_snapshots(&self) {
        self.snapshotter.flush().await;
    }

    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.snapshotter.stats()
    }

    /// Stored snapshot seqs for a document.
    pub fn list_snapshots(&self, document_id: Uuid) -> Result<Vec<u64>> {
        Ok(self.snapshots.list(document_id)?)
    }

    /// Whether anything was ever stored for `document_id`.
    pub fn is_known(&self, document_id: Uuid) -> Result<bool> {
        Ok(self.head(document_id)? > 0 || !self.list_snapshots(document_id)?.is_empty())
    }

    /// Drop cached per-document state (head lock, snapshot index) once no
    /// session writes to `document_id`. Both are reloaded from disk on use.
    pub fn release(&self, document_id: Uuid) {
        let head = self.log.evict(document_id);
        let index = self.snapshots.evict(document_id);
        log::trace!("Released caches for {document_id} (head: {head}, snapshot index: {index})");
    }

    // ─── Reconstruction ───────────────────────────────────────────────

    /// Rebuild the document exactly as it was after operation `target_seq`.
    pub async fn reconstruct(&self, document_id: Uuid, target_seq: u64) -> Result<Reconstruction> {
        let head = self.head(document_id)?;
        if target_seq > head {
            return Err(HistoryError::SequenceNotFound { document_id, seq: target_seq, head });
        }

        let snapshot = self.load_snapshot(document_id, target_seq).await?;
        let snapshot_seq = snapshot.seq;
        let mut model = snapshot.into_model()?;
        let replayed = self.replay_onto(&mut model, target_seq).await?;

        log::debug!(
            "Reconstructed {document_id} at seq {target_seq}: snapshot {snapshot_seq} + {replayed} ops"
        );
        Ok(Reconstruction {
            model,
            snapshot_seq,
            replayed,
        })
    }

    /// Apply logged operations `(model.revision(), target_seq]` to `model`.
    pub async fn replay_onto(&self, model: &mut DocumentModel, target_seq: u64) -> Result<usize> {
        let mut replayed = 0;
        for op in self.log.read_range(model.document_id(), model.revision(), target_seq) {
            model.apply_operation(&op?)?;
            replayed += 1;
            if replayed % REPLAY_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        Ok(replayed)
    }

    async fn load_snapshot(&self, document_id: Uuid, seq: u64) -> Result<Snapshot> {
        let store = Arc::clone(&self.snapshots);
        let snapshot =
            tokio::task::spawn_blocking(move || store.latest_at_or_before(document_id, seq)).await??;
        Ok(snapshot)
    }

    // ─── Lifecycle ────────────────────────────────────────────────────

    /// Drain the snapshot queue and sync the log.
    pub async fn shutdown(&self) -> Result<()> {
        self.snapshotter.shutdown().await;
        let log = Arc::clone(&self.log);
        tokio::task::spawn_blocking(move || log.sync()).await??;
        log::info!("History manager shut down");
        Ok(())
    }
}
