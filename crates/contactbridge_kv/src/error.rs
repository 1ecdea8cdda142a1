//! Error types for key-value store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the log.
    #[error("read beyond end of log: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current log size.
        size: u64,
    },

    /// The log file header is missing or not a store log.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// A record could not be decoded.
    #[error("log corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// A present value did not have the requested type.
    #[error("type mismatch for key {key}: expected {expected}, found {found}")]
    TypeMismatch {
        /// The key that was read.
        key: String,
        /// The requested value type.
        expected: &'static str,
        /// The stored value type.
        found: &'static str,
    },

    /// Keys must be non-empty and must not start or end with a dot.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// The store directory does not exist and creation was disabled.
    #[error("store directory does not exist: {0}")]
    MissingDirectory(String),
}

impl KvError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}
