//! Error types for the sync orchestrator.

use contactbridge_dav::DavError;
use contactbridge_kv::KvError;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for a single engine invocation.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while managing servers and address books.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The KV store failed.
    #[error("store error: {0}")]
    Store(#[from] KvError),

    /// Discovery failed.
    #[error("discovery error: {0}")]
    Discovery(#[from] DavError),

    /// A field needed to talk to the engine is absent or empty.
    #[error("{entity} {id} has no {field}")]
    MissingField {
        /// `server` or `address book`.
        entity: &'static str,
        /// Id of the incomplete entity.
        id: String,
        /// Name of the missing field.
        field: &'static str,
    },

    /// A cleanup step failed for a reason other than "already absent".
    #[error("{step} failed while removing address book {engine_id}: {output}")]
    Cleanup {
        /// Engine operation name.
        step: &'static str,
        /// Engine identifier of the address book.
        engine_id: String,
        /// Engine output or invocation error.
        output: String,
    },

    /// No entity with the given id exists.
    #[error("{entity} {id} not found")]
    NotFound {
        /// `server` or `address book`.
        entity: &'static str,
        /// The unknown id.
        id: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a missing field error.
    pub fn missing_field(entity: &'static str, id: impl Into<String>, field: &'static str) -> Self {
        Self::MissingField {
            entity,
            id: id.into(),
            field,
        }
    }

    /// Creates a not found error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// The engine could not be invoked or did not finish normally.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The engine exited without a status, e.g. killed by a signal.
    #[error("{0} terminated without an exit status")]
    Terminated(String),

    /// Any other invocation failure.
    #[error("{0}")]
    Invocation(String),
}
