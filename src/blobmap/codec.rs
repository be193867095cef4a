//! Node blob format
//!
//! ```text
//! [flag:1][payload][crc32:4]
//! ```
//!
//! `payload` is the bincode-encoded node record, snappy-compressed when the flag
//! is 1 and stored raw when it is 0. The trailing CRC32 (little endian) covers the
//! flag and the payload.

use crate::{BlobMapError, Result};
use serde::{Deserialize, Serialize};

const FLAG_RAW: u8 = 0;
const FLAG_SNAPPY: u8 = 1;

/// Payloads smaller than this are never worth compressing
const MIN_COMPRESS_LEN: usize = 256;

/// Highest branch level accepted when decoding
const MAX_LEVEL: u32 = 64;

/// Persistent form of a branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BranchRecord {
    /// Distance from the leaves (0 = children are leaves); decoded first
    pub level: u32,
    /// Id counter, meaningful on the root only
    pub highest_id: u64,
    /// Sorted `(separator key, child id)` entries
    pub children: Vec<(String, u64)>,
}

/// Persistent form of a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct LeafRecord {
    pub values: Vec<(String, Vec<u8>)>,
}

/// Borrowed twin of [`LeafRecord`]; encodes to identical bytes
#[derive(Serialize)]
struct LeafRecordRef<'a> {
    values: &'a [(String, Vec<u8>)],
}

pub(crate) fn encode_branch(record: &BranchRecord, compress: bool) -> Result<Vec<u8>> {
    frame(bincode::serialize(record)?, compress)
}

pub(crate) fn decode_branch(blob_name: &str, data: &[u8]) -> Result<BranchRecord> {
    let payload = unframe(blob_name, data)?;
    let record: BranchRecord = bincode::deserialize(&payload).map_err(|e| {
        BlobMapError::Corruption(format!("branch blob {}: {}", blob_name, e))
    })?;
    if record.level > MAX_LEVEL {
        return Err(BlobMapError::Corruption(format!(
            "branch blob {}: implausible level {}",
            blob_name, record.level
        )));
    }
    if record.children.is_empty() {
        return Err(BlobMapError::Corruption(format!(
            "branch blob {} has no children",
            blob_name
        )));
    }
    Ok(record)
}

pub(crate) fn encode_leaf(values: &[(String, Vec<u8>)], compress: bool) -> Result<Vec<u8>> {
    frame(bincode::serialize(&LeafRecordRef { values })?, compress)
}

pub(crate) fn decode_leaf(blob_name: &str, data: &[u8]) -> Result<LeafRecord> {
    let payload = unframe(blob_name, data)?;
    bincode::deserialize(&payload)
        .map_err(|e| BlobMapError::Corruption(format!("leaf blob {}: {}", blob_name, e)))
}

fn frame(payload: Vec<u8>, compress: bool) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() + 5);

    let compressed = if compress && payload.len() >= MIN_COMPRESS_LEN {
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder
            .compress_vec(&payload)
            .map_err(|e| BlobMapError::Serialization(format!("Compression failed: {}", e)))?;
        // Only keep the compressed form if it actually saves space
        (compressed.len() < payload.len()).then_some(compressed)
    } else {
        None
    };

    match compressed {
        Some(body) => {
            out.push(FLAG_SNAPPY);
            out.extend_from_slice(&body);
        }
        None => {
            out.push(FLAG_RAW);
            out.extend_from_slice(&payload);
        }
    }

    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn unframe(blob_name: &str, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < 5 {
        return Err(BlobMapError::Corruption(format!(
            "blob {} too short: {} bytes",
            blob_name,
            data.len()
        )));
    }

    let (body, trailer) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(BlobMapError::Corruption(format!(
            "blob {} checksum mismatch: stored {:08x}, computed {:08x}",
            blob_name, stored, computed
        )));
    }

    match body[0] {
        FLAG_RAW => Ok(body[1..].to_vec()),
        FLAG_SNAPPY => {
            let mut decoder = snap::raw::Decoder::new();
            decoder.decompress_vec(&body[1..]).map_err(|e| {
                BlobMapError::Corruption(format!("blob {} decompression failed: {}", blob_name, e))
            })
        }
        flag => Err(BlobMapError::Corruption(format!(
            "blob {}: unknown compression flag {}",
            blob_name, flag
        ))),
    }
}
