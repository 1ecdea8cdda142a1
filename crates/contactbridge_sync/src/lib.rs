//! # ContactBridge Sync
//!
//! Keeps local address books in step with CardDAV servers by driving an
//! external contact-sync engine.
//!
//! ## Overview
//!
//! - [`ContactBridge`] is the application facade: save, list, enable,
//!   disable and delete, plus the periodic [`ContactBridge::sync_servers`]
//! - Every address book moves through [`BookState`]: the first run
//!   provisions it in six engine steps and rolls back on any failure; later
//!   runs perform one two-way sync
//! - A TTL lock in the store keeps runs from overlapping, even across
//!   processes, and clears itself if a holder crashes
//! - User-facing results are always an [`OpResponse`]; errors never escape
//!   the run loop
//!
//! ## Example
//!
//! ```rust
//! use contactbridge_dav::MockDavClient;
//! use contactbridge_kv::KvStore;
//! use contactbridge_sync::{ContactBridge, ScriptedEngine, DEFAULT_LOCK_TTL};
//!
//! let bridge = ContactBridge::with_parts(
//!     KvStore::in_memory(),
//!     MockDavClient::new(),
//!     ScriptedEngine::new(),
//!     DEFAULT_LOCK_TTL,
//! );
//!
//! // Nothing saved yet, so nothing to do.
//! assert!(bridge.list_servers().unwrap().is_empty());
//! assert!(bridge.sync_servers().success);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod engine;
mod error;
mod lock;
mod model;
mod provision;
mod runner;
mod service;
mod state;
mod syncevolution;

pub use catalog::{BookEntry, Catalog, LOCK_KEY};
pub use config::{BridgeConfig, APP_DIR};
pub use engine::{ContactEngine, EngineOp, EngineOutput, ScriptedEngine};
pub use error::{EngineError, EngineResult, SyncError, SyncResult};
pub use lock::{is_locked, SyncLockGuard, DEFAULT_LOCK_TTL};
pub use model::{
    address_book_id, engine_id, new_server_id, AddressBook, AddressBookSummary, LastRun,
    OpResponse, RunType, Server, ServerSummary, SyncLogEntry, ENGINE_ID_LEN, SERVER_ID_LEN,
};
pub use provision::{EngineBook, FirstRunTarget, Provisioner};
pub use runner::{SyncRunner, LOCK_HELD_MESSAGE};
pub use service::{ContactBridge, NO_ADDRESS_BOOKS_MESSAGE};
pub use state::BookState;
pub use syncevolution::{command_args, redact, SyncEvolution, DEFAULT_PROGRAM};
