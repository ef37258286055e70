//! Directory-backed snapshot store.
//!
//! ```text
//! <snapshot_dir>/
//!   <doc_id>/
//!     00000000000000000000.snap   base (imported documents only)
//!     00000000000000000100.snap
//!     00000000000000000200.snap
//! ```
//!
//! Each file is LZ4(bincode(SnapshotFile)). Files are written to a `.tmp`
//! sibling, fsynced and renamed into place, so a crash never leaves a torn
//! snapshot under its final name. Seqs per document strictly increase.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

use logos_docx::DocumentModel;

use super::error::StoreError;
use super::record::SnapshotFile;

const EXTENSION: &str = "snap";

/// A stored snapshot, or the empty-document sentinel.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub document_id: Uuid,
    pub seq: u64,
    /// `DocumentModel::to_bytes` output; empty for the sentinel
    pub serialized_model: Vec<u8>,
}

impl Snapshot {
    /// The empty document at seq 0, used when no snapshot exists.
    pub fn sentinel(document_id: Uuid) -> Self {
        Self {
            document_id,
            seq: 0,
            serialized_model: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.serialized_model.is_empty()
    }

    /// Materialize the model this snapshot describes.
    pub fn into_model(self) -> Result<DocumentModel, StoreError> {
        if self.is_sentinel() {
            return Ok(DocumentModel::empty(self.document_id));
        }
        let model = DocumentModel::from_bytes(&self.serialized_model)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        if model.document_id() != self.document_id || model.revision() != self.seq {
            return Err(StoreError::Corrupted {
                document_id: self.document_id,
                seq: self.seq,
            });
        }
        Ok(model)
    }
}

/// Durable full-model snapshots, one directory per document.
pub struct SnapshotStore {
    dir: PathBuf,
    sync_writes: bool,
    /// Known seqs per document, loaded from disk on first use.
    index: Mutex<HashMap<Uuid, Arc<Mutex<BTreeSet<u64>>>>>,
}

impl SnapshotStore {
    pub fn open(dir: impl Into<PathBuf>, sync_writes: bool) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        log::info!("Opened snapshot store at {}", dir.display());
        Ok(Self {
            dir,
            sync_writes,
            index: Mutex::new(HashMap::new()),
        })
    }

    /// Persist `model` as the snapshot at its current revision.
    ///
    /// Fails with `StaleSnapshot` when a snapshot at or after that seq exists.
    pub fn write(&self, model: &DocumentModel) -> Result<u64, StoreError> {
        let document_id = model.document_id();
        let seq = model.revision();
        let entry = self.entry(document_id)?;
        let mut seqs = entry.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(&latest) = seqs.last() {
            if seq <= latest {
                return Err(StoreError::StaleSnapshot { document_id, seq, latest });
            }
        }

        let model_bytes = model
            .to_bytes()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let raw_len = model_bytes.len();
        let bytes = SnapshotFile::new(document_id, seq, model_bytes).to_bytes()?;

        let doc_dir = self.document_dir(document_id);
        fs::create_dir_all(&doc_dir)?;
        let final_path = doc_dir.join(file_name(seq));
        let tmp_path = final_path.with_extension("snap.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            if self.sync_writes {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp_path, &final_path)?;
        if self.sync_writes {
            sync_dir(&doc_dir)?;
        }

        seqs.insert(seq);
        log::debug!(
            "Wrote snapshot {seq} for {document_id}: {raw_len} bytes ({} on disk)",
            bytes.len()
        );
        Ok(bytes.len() as u64)
    }

    /// The newest snapshot with seq ≤ `seq`, or the sentinel.
    pub fn latest_at_or_before(&self, document_id: Uuid, seq: u64) -> Result<Snapshot, StoreError> {
        let found = {
            let entry = self.entry(document_id)?;
            let seqs = entry.lock().unwrap_or_else(PoisonError::into_inner);
            seqs.range(..=seq).next_back().copied()
        };
        match found {
            Some(found) => self.read(document_id, found),
            None => Ok(Snapshot::sentinel(document_id)),
        }
    }

    /// Read the snapshot stored at exactly `seq`.
    pub fn read(&self, document_id: Uuid, seq: u64) -> Result<Snapshot, StoreError> {
        let path = self.document_dir(document_id).join(file_name(seq));
        let bytes = fs::read(&path)?;
        let file = SnapshotFile::read(&bytes, document_id, seq)?;
        Ok(Snapshot {
            document_id,
            seq,
            serialized_model: file.model,
        })
    }

    /// Stored snapshot seqs for a document, ascending.
    pub fn list(&self, document_id: Uuid) -> Result<Vec<u64>, StoreError> {
        let entry = self.entry(document_id)?;
        let seqs = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(seqs.iter().copied().collect())
    }

    /// Forget the in-memory index of a document no write is in flight for.
    /// The index is rebuilt from disk on next use.
    pub fn evict(&self, document_id: Uuid) -> bool {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        match index.get(&document_id) {
            Some(entry) if Arc::strong_count(entry) == 1 => index.remove(&document_id).is_some(),
            _ => false,
        }
    }

    /// Documents with a loaded index.
    pub fn cached_documents(&self) -> usize {
        self.index.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn document_dir(&self, document_id: Uuid) -> PathBuf {
        self.dir.join(document_id.to_string())
    }

    pub(crate) fn entry(&self, document_id: Uuid) -> Result<Arc<Mutex<BTreeSet<u64>>>, StoreError> {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = index.get(&document_id) {
            return Ok(Arc::clone(entry));
        }
        let seqs = scan(&self.document_dir(document_id))?;
        let entry = Arc::new(Mutex::new(seqs));
        index.insert(document_id, Arc::clone(&entry));
        Ok(entry)
    }
}

fn file_name(seq: u64) -> String {
    format!("{seq:020}.{EXTENSION}")
}

/// Seqs of the completed snapshot files in `dir`. Leftover `.tmp` files are ignored.
fn scan(dir: &Path) -> Result<BTreeSet<u64>, StoreError> {
    let mut seqs = BTreeSet::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(seqs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
            continue;
        }
        if let Some(seq) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            seqs.insert(seq);
        }
    }
    Ok(seqs)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), StoreError> {
    Ok(())
}
