//! Background snapshot writer.
//!
//! Sessions hand a cloned model to [`Snapshotter::schedule`] at cadence
//! boundaries. Scheduling never waits: when the bounded queue is full the
//! call returns `false` and the session tries again on its next append.
//!
//! ```text
//!  session ──try_send──► [ job | job | ... ] ──► worker ──spawn_blocking──► SnapshotStore
//!                          bounded mpsc           (one task)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use logos_docx::DocumentModel;

use crate::storage::{SnapshotStore, StoreError};

enum SnapshotJob {
    Write(Box<DocumentModel>),
    Flush(oneshot::Sender<()>),
}

/// Snapshot worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub written: u64,
    pub deferred: u64,
    pub stale: u64,
    pub failed: u64,
}

/// Lock-free counters, read via snapshot().
#[derive(Default)]
struct AtomicSnapshotStats {
    written: AtomicU64,
    deferred: AtomicU64,
    stale: AtomicU64,
    failed: AtomicU64,
}

impl AtomicSnapshotStats {
    fn snapshot(&self) -> SnapshotStats {
        SnapshotStats {
            written: self.written.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Owns the snapshot queue and its worker task.
pub struct Snapshotter {
    sender: Mutex<Option<mpsc::Sender<SnapshotJob>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stats: Arc<AtomicSnapshotStats>,
}

impl Snapshotter {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<SnapshotStore>, queue_depth: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let stats = Arc::new(AtomicSnapshotStats::default());
        let worker = tokio::spawn(run_worker(store, receiver, Arc::clone(&stats)));
        Self {
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            stats,
        }
    }

    /// Queue a copy of `model` for writing. Returns `false` if the queue is
    /// full or the snapshotter is shut down. The model is only cloned once a
    /// queue slot is reserved.
    pub fn schedule(&self, model: &DocumentModel) -> bool {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        let (document_id, seq) = (model.document_id(), model.revision());
        match sender.try_reserve() {
            Ok(permit) => {
                permit.send(SnapshotJob::Write(Box::new(model.clone())));
                log::trace!("Queued snapshot {seq} for {document_id}");
                true
            }
            Err(mpsc::error::TrySendError::Full(())) => {
                self.stats.deferred.fetch_add(1, Ordering::Relaxed);
                log::debug!("Snapshot queue full, deferring snapshot {seq} for {document_id}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    /// Wait until every snapshot queued before this call has been handled.
    pub async fn flush(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else { return };
        let (done, wait) = oneshot::channel();
        if sender.send(SnapshotJob::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                log::error!("Snapshot worker panicked: {e}");
            }
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats.snapshot()
    }
}

async fn run_worker(
    store: Arc<SnapshotStore>,
    mut receiver: mpsc::Receiver<SnapshotJob>,
    stats: Arc<AtomicSnapshotStats>,
) {
    while let Some(job) = receiver.recv().await {
        let model = match job {
            SnapshotJob::Write(model) => model,
            SnapshotJob::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        let (document_id, seq) = (model.document_id(), model.revision());
        let store = Arc::clone(&store);
        match tokio::task::spawn_blocking(move || store.write(&model)).await {
            Ok(Ok(size)) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                log::info!("Persisted snapshot {seq} for {document_id} ({size} bytes)");
            }
            Ok(Err(e @ StoreError::StaleSnapshot { .. })) => {
                // A newer snapshot already covers this document; keep it.
                stats.stale.fetch_add(1, Ordering::Relaxed);
                log::error!("Dropped snapshot {seq} for {document_id}: {e}");
            }
            Ok(Err(e)) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Failed to persist snapshot {seq} for {document_id}: {e}");
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Snapshot task for {document_id} failed: {e}");
            }
        }
    }
    log::debug!("Snapshot worker stopped");
}
