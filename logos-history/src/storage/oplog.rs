//! RocksDB-backed append-only operation log.
//!
//! Column families:
//! - `operations`: LZ4(bincode(OpRecord)), keyed by `doc_id(16) ‖ seq(8, BE)`
//! - `heads`: last durable seq per document, keyed by `doc_id`
//!
//! An append writes the record and the new head in one batch, so the head
//! never points past a missing record. Sequences are gap-free per document:
//! the only accepted seq is `head + 1`.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

use logos_docx::Operation;

use super::error::StoreError;
use super::record::OpRecord;
use crate::config::HistoryConfig;

const CF_OPERATIONS: &str = "operations";
const CF_HEADS: &str = "heads";

const COLUMN_FAMILIES: &[&str] = &[CF_OPERATIONS, CF_HEADS];

/// Durable per-document operation log.
pub struct OperationLog {
    /// RocksDB instance (single-threaded mode, concurrency via head locks)
    db: DBWithThreadMode<SingleThreaded>,
    sync_writes: bool,
    path: std::path::PathBuf,
    /// Cached head per document. Holding a document's lock serializes its appends.
    heads: RwLock<HashMap<Uuid, Arc<Mutex<u64>>>>,
}

impl OperationLog {
    /// Open the log at `config.db_path`, creating it if missing.
    pub fn open(config: &HistoryConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.set_max_total_wal_size(128 * 1024 * 1024); // 128MB WAL limit
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.db_path,
            cf_descriptors,
        )?;

        log::info!("Opened operation log at {}", config.db_path.display());
        Ok(Self {
            db,
            sync_writes: config.sync_writes,
            path: config.db_path.clone(),
            heads: RwLock::new(HashMap::new()),
        })
    }

    fn cf_options(name: &str, config: &HistoryConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        block_opts.set_block_size(16 * 1024); // 16KB blocks
        opts.set_block_based_table_factory(&block_opts);

        // Records are already LZ4 compressed; SST compression only helps keys.
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_OPERATIONS => {
                // Many small appends, range-read by doc_id prefix
                opts.set_max_write_buffer_number(4);
                opts.set_prefix_extractor(rocksdb::SliceTransform::create_fixed_prefix(16));
            }
            CF_HEADS => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    // ─── Appends ──────────────────────────────────────────────────────

    /// Durably append `op`. Fails with `OutOfOrderSequence` unless
    /// `op.seq == head + 1`; returns once the batch is written (and fsynced
    /// when `sync_writes` is set).
    pub fn append(&self, op: &Operation) -> Result<(), StoreError> {
        let document_id = op.document_id;
        let head = self.head_lock(document_id)?;
        let mut last = head.lock().unwrap_or_else(PoisonError::into_inner);

        let expected = *last + 1;
        if op.seq != expected {
            log::debug!(
                "Rejected append for {document_id}: expected seq {expected}, got {}",
                op.seq
            );
            return Err(StoreError::OutOfOrderSequence { document_id, expected, got: op.seq });
        }

        let value = OpRecord::new(op)?.to_bytes()?;
        let cf_ops = self.cf(CF_OPERATIONS)?;
        let cf_heads = self.cf(CF_HEADS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_ops, Self::op_key(document_id, op.seq), &value);
        batch.put_cf(cf_heads, document_id.as_bytes(), op.seq.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        *last = op.seq;
        log::trace!("Appended {:?} seq {} for {document_id}", op.kind(), op.seq);
        Ok(())
    }

    /// Last durable seq for `document_id` (0 when nothing was logged).
    pub fn head(&self, document_id: Uuid) -> Result<u64, StoreError> {
        let head = self.head_lock(document_id)?;
        let last = *head.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(last)
    }

    /// Drop the cached head of a document nobody is appending to. Returns
    /// whether the entry was removed; the head is reloaded on next use.
    pub fn evict(&self, document_id: Uuid) -> bool {
        let mut heads = self.heads.write().unwrap_or_else(PoisonError::into_inner);
        // Clones are only taken under this lock, so a count of 1 means idle.
        match heads.get(&document_id) {
            Some(head) if Arc::strong_count(head) == 1 => heads.remove(&document_id).is_some(),
            _ => false,
        }
    }

    /// Documents with a cached head.
    pub fn cached_heads(&self) -> usize {
        self.heads.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    // ─── Reads ────────────────────────────────────────────────────────

    /// Operations with `from_exclusive < seq <= to_inclusive`, in seq order.
    ///
    /// The iterator is lazy: each record is read and verified on `next()`.
    /// Clone it (or call again) to restart from the beginning.
    pub fn read_range(&self, document_id: Uuid, from_exclusive: u64, to_inclusive: u64) -> OpRange<'_> {
        OpRange {
            log: self,
            document_id,
            next: from_exclusive.saturating_add(1),
            end: to_inclusive,
        }
    }

    /// Read a single operation.
    pub fn get(&self, document_id: Uuid, seq: u64) -> Result<Operation, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        match self.db.get_cf(cf, Self::op_key(document_id, seq))? {
            Some(bytes) => OpRecord::read(&bytes, document_id, seq),
            None => Err(StoreError::MissingOperation { document_id, seq }),
        }
    }

    /// Seqs actually present for a document, in order. Used for audits and tests.
    pub fn logged_seqs(&self, document_id: Uuid) -> Result<Vec<u64>, StoreError> {
        let cf = self.cf(CF_OPERATIONS)?;
        let start_key = Self::op_key(document_id, 0);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut seqs = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if key.len() < 24 || &key[..16] != document_id.as_bytes() {
                break;
            }
            let mut seq_buf = [0u8; 8];
            seq_buf.copy_from_slice(&key[16..24]);
            seqs.push(u64::from_be_bytes(seq_buf));
        }
        Ok(seqs)
    }

    /// Every document with at least one logged operation.
    pub fn documents(&self) -> Result<Vec<Uuid>, StoreError> {
        let cf = self.cf(CF_HEADS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let bytes: [u8; 16] = key
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::DeserializationError("Invalid UUID key".into()))?;
            ids.push(Uuid::from_bytes(bytes));
        }
        Ok(ids)
    }

    /// Flush the RocksDB WAL and memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush_wal(true)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }

    /// doc_id (16 bytes) + seq (8 bytes big-endian).
    fn op_key(document_id: Uuid, seq: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(24);
        key.extend_from_slice(document_id.as_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    /// The head lock for a document, loading the stored head on first use.
    fn head_lock(&self, document_id: Uuid) -> Result<Arc<Mutex<u64>>, StoreError> {
        if let Some(head) = self
            .heads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&document_id)
        {
            return Ok(Arc::clone(head));
        }

        let stored = self.load_head(document_id)?;
        let mut heads = self.heads.write().unwrap_or_else(PoisonError::into_inner);
        let head = heads
            .entry(document_id)
            .or_insert_with(|| Arc::new(Mutex::new(stored)));
        Ok(Arc::clone(head))
    }

    fn load_head(&self, document_id: Uuid) -> Result<u64, StoreError> {
        let cf = self.cf(CF_HEADS)?;
        match self.db.get_cf(cf, document_id.as_bytes())? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::DeserializationError(format!("Invalid head for {document_id}"))
                })?;
                Ok(u64::from_be_bytes(buf))
            }
            None => Ok(0),
        }
    }
}

/// Lazy, restartable range over a document's logged operations.
#[derive(Clone)]
pub struct OpRange<'a> {
    log: &'a OperationLog,
    document_id: Uuid,
    next: u64,
    end: u64,
}

impl OpRange<'_> {
    /// Operations not yet yielded.
    pub fn remaining(&self) -> u64 {
        (self.end + 1).saturating_sub(self.next)
    }
}

impl Iterator for OpRange<'_> {
    type Item = Result<Operation, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.end {
            return None;
        }
        let seq = self.next;
        self.next += 1;
        let item = self.log.get(self.document_id, seq);
        if item.is_err() {
            // A broken record ends the range.
            self.next = self.end.saturating_add(1).max(self.next);
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (0, Some(n))
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
