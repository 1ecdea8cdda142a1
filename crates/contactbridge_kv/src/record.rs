//! Log header and batch record serialization.
//!
//! ```text
//! log    := header record*
//! header := "CBKV" version:u16 generation:u64
//! record := "CBRB" type:u8 len:u32 payload[len] crc32:u32
//! ```
//!
//! All integers are little-endian. The CRC covers everything in the record
//! before it. The payload is the CBOR encoding of the batch's operations.

use crate::error::{KvError, KvResult};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Magic bytes at the start of a log file.
pub const LOG_MAGIC: [u8; 4] = *b"CBKV";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

/// Size of the log file header.
pub const LOG_HEADER_SIZE: usize = 14;

/// Magic bytes at the start of every record.
pub const RECORD_MAGIC: [u8; 4] = *b"CBRB";

/// magic (4) + type (1) + length (4)
const RECORD_HEADER_SIZE: usize = 9;

const CRC_SIZE: usize = 4;

const RECORD_TYPE_BATCH: u8 = 1;

/// A single mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Insert or overwrite a key.
    Put {
        /// The key.
        key: String,
        /// The new value.
        value: Value,
        /// Absolute expiry in unix milliseconds.
        expires_at: Option<i64>,
    },
    /// Remove a single key.
    Delete {
        /// The key.
        key: String,
    },
    /// Remove every key under a dot-prefix.
    DeletePrefix {
        /// The prefix.
        prefix: String,
    },
}

/// Encodes the log file header.
#[must_use]
pub fn encode_header(generation: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LOG_HEADER_SIZE);
    buf.extend_from_slice(&LOG_MAGIC);
    buf.extend_from_slice(&LOG_VERSION.to_le_bytes());
    buf.extend_from_slice(&generation.to_le_bytes());
    buf
}

/// Decodes the log file header and returns its generation.
pub fn decode_header(bytes: &[u8]) -> KvResult<u64> {
    if bytes.len() < LOG_HEADER_SIZE {
        return Err(KvError::invalid_format("log header truncated"));
    }
    if bytes[0..4] != LOG_MAGIC {
        return Err(KvError::invalid_format("not a store log (bad magic)"));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != LOG_VERSION {
        return Err(KvError::invalid_format(format!(
            "unsupported log version {version}"
        )));
    }
    let mut generation = [0u8; 8];
    generation.copy_from_slice(&bytes[6..14]);
    Ok(u64::from_le_bytes(generation))
}

/// Encodes a batch of operations as one framed record.
pub fn encode_batch(ops: &[Op]) -> KvResult<Vec<u8>> {
    let mut payload = Vec::new();
    ciborium::into_writer(ops, &mut payload).map_err(|e| KvError::Codec(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| KvError::Codec("batch payload too large".into()))?;

    let mut data = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&RECORD_MAGIC);
    data.push(RECORD_TYPE_BATCH);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&payload);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of scanning a run of log bytes.
#[derive(Debug, Default)]
pub struct Scan {
    /// Decoded batches, in log order.
    pub batches: Vec<Vec<Op>>,
    /// Number of bytes covered by complete, valid records.
    pub valid_len: usize,
    /// True if bytes remained after the last valid record.
    pub torn: bool,
}

/// Decodes consecutive records from `bytes`.
///
/// Scanning stops at the first record that is truncated, has a bad magic or
/// type, or fails its checksum. Everything from that point on is a torn tail
/// left by an interrupted write; it is reported, never partially applied.
///
/// # Errors
///
/// Returns an error only if a record passes its checksum but its payload
/// cannot be decoded, which indicates a format mismatch rather than a crash.
pub fn scan_records(bytes: &[u8]) -> KvResult<Scan> {
    let mut scan = Scan::default();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let rest = &bytes[pos..];
        if rest.len() < RECORD_HEADER_SIZE + CRC_SIZE {
            break;
        }
        if rest[0..4] != RECORD_MAGIC || rest[4] != RECORD_TYPE_BATCH {
            break;
        }
        let len = u32::from_le_bytes([rest[5], rest[6], rest[7], rest[8]]) as usize;
        let total = RECORD_HEADER_SIZE + len + CRC_SIZE;
        if rest.len() < total {
            break;
        }

        let body_end = RECORD_HEADER_SIZE + len;
        let expected = u32::from_le_bytes([
            rest[body_end],
            rest[body_end + 1],
            rest[body_end + 2],
            rest[body_end + 3],
        ]);
        if compute_crc32(&rest[..body_end]) != expected {
            break;
        }

        let ops: Vec<Op> = ciborium::from_reader(&rest[RECORD_HEADER_SIZE..body_end])
            .map_err(|e| KvError::corruption(format!("undecodable batch at byte {pos}: {e}")))?;
        scan.batches.push(ops);
        pos += total;
    }

    scan.valid_len = pos;
    scan.torn = pos < bytes.len();
    Ok(scan)
}

/// Computes the IEEE CRC32 of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
