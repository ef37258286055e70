//! Public editing surface: a registry of open sessions on top of one
//! [`HistoryManager`].
//!
//! Each session sits behind its own `tokio::sync::Mutex`, so edits to one
//! document are serialized while different documents proceed in parallel.
//! The registry lock is only held to look a session up or to add/remove one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use logos_docx::{
    load_document, plan, write_package, DocumentModel, DocumentStats, Intent, NodeId, NodeTemplate,
};

use crate::config::HistoryConfig;
use crate::error::{HistoryError, Result};
use crate::manager::{HistoryManager, Reconstruction};
use crate::session::HistorySession;

/// Opaque handle to an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Summary of an open document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    pub document_id: Uuid,
    /// Seq of the last applied operation
    pub seq: u64,
    pub stats: DocumentStats,
    pub snapshots: Vec<u64>,
    pub styles: usize,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionHandle, Arc<Mutex<HistorySession>>>,
    documents: HashMap<Uuid, SessionHandle>,
}

/// Opens documents, applies edits and serves past versions.
pub struct DocumentProcessor {
    history: Arc<HistoryManager>,
    registry: RwLock<Registry>,
    next_handle: AtomicU64,
    closed: AtomicBool,
}

impl DocumentProcessor {
    /// Open history storage under `config`. Must be called inside a tokio runtime.
    pub fn new(config: HistoryConfig) -> Result<Self> {
        Ok(Self::with_history(Arc::new(HistoryManager::open(config)?)))
    }

    pub fn with_history(history: Arc<HistoryManager>) -> Self {
        Self {
            history,
            registry: RwLock::new(Registry::default()),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn history(&self) -> &Arc<HistoryManager> {
        &self.history
    }

    // ─── Sessions ─────────────────────────────────────────────────────

    /// Import a DOCX package as a new document.
    ///
    /// The parsed model is stored as the document's base snapshot (seq 0)
    /// before the session opens.
    pub async fn open(&self, bytes: Vec<u8>) -> Result<SessionHandle> {
        self.ensure_open()?;
        let document_id = Uuid::new_v4();
        let model = tokio::task::spawn_blocking(move || load_document(bytes, document_id)).await??;
        self.history.write_snapshot(&model).await?;
        log::info!(
            "Imported document {document_id} with {} top-level blocks",
            model.blocks().len()
        );
        self.register(model).await
    }

    /// Start a new, empty document. Its version 0 is the empty model.
    pub async fn open_empty(&self) -> Result<SessionHandle> {
        self.ensure_open()?;
        let model = DocumentModel::empty(Uuid::new_v4());
        log::info!("Created empty document {}", model.document_id());
        self.register(model).await
    }

    /// Reopen a stored document at its latest version.
    pub async fn resume(&self, document_id: Uuid) -> Result<SessionHandle> {
        self.ensure_open()?;
        if self.registry.read().await.documents.contains_key(&document_id) {
            return Err(HistoryError::DocumentBusy(document_id));
        }
        if !self.history.is_known(document_id)? {
            self.history.release(document_id);
            return Err(HistoryError::UnknownDocument(document_id));
        }
        let head = self.history.head(document_id)?;
        let rebuilt = self.history.reconstruct(document_id, head).await?;
        log::info!(
            "Resumed document {document_id} at seq {head} (snapshot {}, {} ops replayed)",
            rebuilt.snapshot_seq,
            rebuilt.replayed
        );
        self.register(rebuilt.model).await
    }

    /// Flush the session's pending operations and drop it.
    ///
    /// The session stays registered until its operations are durable, so the
    /// document cannot be resumed elsewhere in between. If the flush fails
    /// the session remains open and `close` can be retried.
    pub async fn close(&self, handle: SessionHandle) -> Result<()> {
        let mut session = self.lock_session(handle).await?;
        session.flush(&self.history).await?;

        let document_id = session.document_id();
        {
            let mut registry = self.registry.write().await;
            session.mark_closed();
            registry.sessions.remove(&handle);
            if registry.documents.get(&document_id) == Some(&handle) {
                registry.documents.remove(&document_id);
            }
        }
        let seq = session.last_seq();
        drop(session);
        self.history.release(document_id);
        log::info!("Closed {handle} for document {document_id} at seq {seq}");
        Ok(())
    }

    /// Close every session, drain the snapshot queue and sync storage.
    /// Later calls fail with `Closed`.
    pub async fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handles: Vec<SessionHandle> = self.registry.read().await.sessions.keys().copied().collect();
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = self.close(handle).await {
                log::error!("Failed to close {handle} during shutdown: {e}");
                first_error.get_or_insert(e);
            }
        }
        self.history.shutdown().await?;
        first_error.map_or(Ok(()), Err)
    }

    pub async fn session_count(&self) -> usize {
        self.registry.read().await.sessions.len()
    }

    // ─── Edits ────────────────────────────────────────────────────────

    /// Plan, apply and durably log `intent`. Returns the new seq.
    pub async fn apply_operation(&self, handle: SessionHandle, intent: Intent) -> Result<u64> {
        let mut session = self.session(handle).await?;
        let planned = plan(session.model(), &intent)?;
        session.apply(&self.history, planned).await
    }

    pub async fn insert_text(
        &self,
        handle: SessionHandle,
        at: NodeId,
        offset: usize,
        text: impl Into<String>,
    ) -> Result<u64> {
        self.apply_operation(handle, Intent::insert_text(at, offset, text)).await
    }

    pub async fn delete_text(&self, handle: SessionHandle, run: NodeId, offset: usize, len: usize) -> Result<u64> {
        self.apply_operation(handle, Intent::DeleteText { run, offset, len }).await
    }

    /// Delete the sibling range `start..=end`.
    pub async fn delete_range(&self, handle: SessionHandle, start: NodeId, end: NodeId) -> Result<u64> {
        self.apply_operation(handle, Intent::DeleteRange { start, end }).await
    }

    pub async fn set_format<K, V>(
        &self,
        handle: SessionHandle,
        node: NodeId,
        attrs: impl IntoIterator<Item = (K, Option<V>)>,
    ) -> Result<u64>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.apply_operation(handle, Intent::set_format(node, attrs)).await
    }

    pub async fn move_node(
        &self,
        handle: SessionHandle,
        node: NodeId,
        new_parent: NodeId,
        index: usize,
    ) -> Result<u64> {
        self.apply_operation(handle, Intent::MoveNode { node, new_parent, index }).await
    }

    pub async fn insert_node(
        &self,
        handle: SessionHandle,
        parent: NodeId,
        index: usize,
        template: NodeTemplate,
    ) -> Result<u64> {
        self.apply_operation(handle, Intent::InsertNode { parent, index, template }).await
    }

    /// Undo the session's most recent operation; returns the new seq.
    pub async fn undo(&self, handle: SessionHandle) -> Result<u64> {
        let mut session = self.session(handle).await?;
        session.undo(&self.history).await
    }

    pub async fn redo(&self, handle: SessionHandle) -> Result<u64> {
        let mut session = self.session(handle).await?;
        session.redo(&self.history).await
    }

    // ─── Reads ────────────────────────────────────────────────────────

    /// The document package as it was after operation `seq`.
    pub async fn get_version(&self, document_id: Uuid, seq: u64) -> Result<Vec<u8>> {
        let rebuilt = self.reconstruct(document_id, seq).await?;
        let bytes = tokio::task::spawn_blocking(move || write_package(&rebuilt.model)).await??;
        Ok(bytes)
    }

    /// The model as it was after operation `seq`.
    pub async fn reconstruct(&self, document_id: Uuid, seq: u64) -> Result<Reconstruction> {
        let rebuilt = self.history.reconstruct(document_id, seq).await;
        self.release_if_idle(document_id).await;
        rebuilt
    }

    /// A copy of the session's live model.
    pub async fn current_model(&self, handle: SessionHandle) -> Result<DocumentModel> {
        let session = self.session(handle).await?;
        Ok(session.model().clone())
    }

    pub async fn document_id(&self, handle: SessionHandle) -> Result<Uuid> {
        let session = self.session(handle).await?;
        Ok(session.document_id())
    }

    pub async fn document_info(&self, handle: SessionHandle) -> Result<DocumentInfo> {
        let session = self.session(handle).await?;
        let model = session.model();
        Ok(DocumentInfo {
            document_id: model.document_id(),
            seq: model.revision(),
            stats: model.stats(),
            snapshots: self.history.list_snapshots(model.document_id())?,
            styles: model.metadata().styles.len(),
            can_undo: session.can_undo(),
            can_redo: session.can_redo(),
        })
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HistoryError::Closed);
        }
        Ok(())
    }

    /// Lock an open session for a request.
    async fn session(&self, handle: SessionHandle) -> Result<OwnedMutexGuard<HistorySession>> {
        self.ensure_open()?;
        self.lock_session(handle).await
    }

    /// Lock a registered session. A session closed while this request
    /// waited for the lock counts as not found.
    async fn lock_session(&self, handle: SessionHandle) -> Result<OwnedMutexGuard<HistorySession>> {
        let session = self
            .registry
            .read()
            .await
            .sessions
            .get(&handle)
            .cloned()
            .ok_or(HistoryError::SessionNotFound(handle))?;
        let guard = session.lock_owned().await;
        if guard.is_closed() {
            return Err(HistoryError::SessionNotFound(handle));
        }
        Ok(guard)
    }

    /// Drop caches for a document read without an open session.
    async fn release_if_idle(&self, document_id: Uuid) {
        if !self.registry.read().await.documents.contains_key(&document_id) {
            self.history.release(document_id);
        }
    }

    async fn register(&self, model: DocumentModel) -> Result<SessionHandle> {
        let document_id = model.document_id();
        let mut registry = self.registry.write().await;
        if registry.documents.contains_key(&document_id) {
            return Err(HistoryError::DocumentBusy(document_id));
        }
        let handle = SessionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let session = HistorySession::new(model, self.history.config().undo_depth);
        registry.sessions.insert(handle, Arc::new(Mutex::new(session)));
        registry.documents.insert(document_id, handle);
        log::debug!("Registered {handle} for document {document_id}");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::poll;

    async fn processor(dir: &tempfile::TempDir) -> DocumentProcessor {
        DocumentProcessor::new(HistoryConfig::for_testing(dir.path())).unwrap()
    }

    #[tokio::test]
    async fn test_open_empty_and_edit() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();
        let root = processor.current_model(handle).await.unwrap().root();

        let seq = processor
            .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text("first"))
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let info = processor.document_info(handle).await.unwrap();
        assert_eq!(info.seq, 1);
        assert_eq!(info.stats.paragraphs, 1);
        assert!(info.can_undo);
        assert!(!info.can_redo);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();
        processor.close(handle).await.unwrap();

        assert_eq!(processor.undo(handle).await.unwrap_err(), HistoryError::SessionNotFound(handle));
        assert_eq!(processor.close(handle).await.unwrap_err(), HistoryError::SessionNotFound(handle));
    }

    #[tokio::test]
    async fn test_invalid_edit_leaves_session_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();

        let err = processor.insert_text(handle, NodeId(999), 0, "x").await.unwrap_err();
        assert!(matches!(err, HistoryError::Docx(_)));
        assert_eq!(processor.document_info(handle).await.unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_resume_busy_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();
        let doc = processor.document_id(handle).await.unwrap();
        let root = processor.current_model(handle).await.unwrap().root();
        processor
            .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text("kept"))
            .await
            .unwrap();

        assert_eq!(processor.resume(doc).await.unwrap_err(), HistoryError::DocumentBusy(doc));
        let stranger = Uuid::new_v4();
        assert_eq!(processor.resume(stranger).await.unwrap_err(), HistoryError::UnknownDocument(stranger));

        processor.close(handle).await.unwrap();
        let resumed = processor.resume(doc).await.unwrap();
        assert_eq!(processor.current_model(resumed).await.unwrap().plain_text(), "kept");
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();

        processor.shutdown().await.unwrap();
        assert_eq!(processor.session_count().await, 0);
        assert_eq!(processor.open_empty().await.unwrap_err(), HistoryError::Closed);
        assert_eq!(processor.undo(handle).await.unwrap_err(), HistoryError::Closed);
        processor.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_edit() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();
        let doc = processor.document_id(handle).await.unwrap();
        let root = processor.current_model(handle).await.unwrap().root();
        processor
            .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text("draft"))
            .await
            .unwrap();
        let model = processor.current_model(handle).await.unwrap();
        let run = model.children(model.blocks()[0])[0];

        // The edit holds the session while its append is in flight.
        let mut edit = Box::pin(processor.insert_text(handle, run, 0, "x"));
        assert!(poll!(&mut edit).is_pending());
        let mut closing = Box::pin(processor.close(handle));
        assert!(poll!(&mut closing).is_pending());
        let mut late = Box::pin(processor.insert_text(handle, run, 0, "y"));
        assert!(poll!(&mut late).is_pending());

        // Still registered until close has flushed.
        assert_eq!(processor.resume(doc).await.unwrap_err(), HistoryError::DocumentBusy(doc));

        assert_eq!(edit.await.unwrap(), 2);
        closing.await.unwrap();
        assert_eq!(late.await.unwrap_err(), HistoryError::SessionNotFound(handle));
        assert_eq!(processor.session_count().await, 0);

        let resumed = processor.resume(doc).await.unwrap();
        assert_eq!(processor.document_info(resumed).await.unwrap().seq, 2);
        assert_eq!(processor.insert_text(resumed, run, 0, "z").await.unwrap(), 3);
        assert_eq!(processor.current_model(resumed).await.unwrap().plain_text(), "zxdraft");
    }

    #[tokio::test]
    async fn test_close_releases_document_caches() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir).await;
        let handle = processor.open_empty().await.unwrap();
        let root = processor.current_model(handle).await.unwrap().root();
        processor
            .insert_node(handle, root, 0, NodeTemplate::paragraph_with_text("kept"))
            .await
            .unwrap();
        assert_eq!(processor.history().log().cached_heads(), 1);

        processor.close(handle).await.unwrap();
        assert_eq!(processor.history().log().cached_heads(), 0);
        assert_eq!(processor.history().snapshots().cached_documents(), 0);

        let stranger = Uuid::new_v4();
        assert!(processor.resume(stranger).await.is_err());
        assert_eq!(processor.history().log().cached_heads(), 0);
    }
}
