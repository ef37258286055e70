//! Checksummed on-disk records.
//!
//! Both the operation log and the snapshot files wrap their payload in a
//! record carrying the owning document, the seq and an FNV-1a style checksum
//! over all three. A record read back at the wrong key or with flipped bits
//! fails [`OpRecord::verify`] / [`SnapshotFile::verify`] and surfaces as
//! [`StoreError::Corrupted`].

use logos_docx::Operation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StoreError;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Checksum over `(seq, document_id, payload)`.
pub(crate) fn checksum(seq: u64, document_id: &Uuid, payload: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET;
    hash ^= seq as u32;
    hash = hash.wrapping_mul(FNV_PRIME);
    hash ^= (seq >> 32) as u32;
    hash = hash.wrapping_mul(FNV_PRIME);
    for byte in document_id.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    for chunk in payload.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        hash ^= u32::from_le_bytes(word);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// One logged operation as stored in the `operations` column family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpRecord {
    pub seq: u64,
    pub document_id: Uuid,
    /// `Operation::encode` bytes
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl OpRecord {
    pub fn new(op: &Operation) -> Result<Self, StoreError> {
        let payload = op
            .encode()
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        Ok(Self {
            seq: op.seq,
            document_id: op.document_id,
            checksum: checksum(op.seq, &op.document_id, &payload),
            payload,
        })
    }

    pub fn verify(&self) -> bool {
        self.checksum == checksum(self.seq, &self.document_id, &self.payload)
    }

    /// LZ4(bincode(record)).
    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    /// Decode, verify and unwrap the record stored for `(document_id, seq)`.
    pub fn read(bytes: &[u8], document_id: Uuid, seq: u64) -> Result<Operation, StoreError> {
        let record: OpRecord = decode(bytes)?;
        if !record.verify() || record.seq != seq || record.document_id != document_id {
            return Err(StoreError::Corrupted { document_id, seq });
        }
        let op = Operation::decode(&record.payload)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        if op.seq != seq || op.document_id != document_id {
            return Err(StoreError::Corrupted { document_id, seq });
        }
        Ok(op)
    }
}

/// One snapshot file: a serialized `DocumentModel` at `seq`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub document_id: Uuid,
    pub seq: u64,
    pub checksum: u32,
    /// `DocumentModel::to_bytes` output
    pub model: Vec<u8>,
}

impl SnapshotFile {
    pub fn new(document_id: Uuid, seq: u64, model: Vec<u8>) -> Self {
        Self {
            document_id,
            seq,
            checksum: checksum(seq, &document_id, &model),
            model,
        }
    }

    pub fn verify(&self) -> bool {
        self.checksum == checksum(self.seq, &self.document_id, &self.model)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        encode(self)
    }

    pub fn read(bytes: &[u8], document_id: Uuid, seq: u64) -> Result<Self, StoreError> {
        let file: SnapshotFile = decode(bytes)?;
        if !file.verify() || file.seq != seq || file.document_id != document_id {
            return Err(StoreError::Corrupted { document_id, seq });
        }
        Ok(file)
    }
}
