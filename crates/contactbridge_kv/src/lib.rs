//! # ContactBridge KV
//!
//! Durable key-value store backing all ContactBridge state: saved servers,
//! address-book flags, last-run records and the sync lock.
//!
//! ## Design Principles
//!
//! - Keys are dot-delimited paths (`server.<id>.addressbook.<id>.name`);
//!   prefix scans enumerate everything beneath a path segment
//! - Values keep their type, so absent, empty and `false` never collapse
//! - Every durable change is one checksummed record in an append-only log;
//!   a torn record from a crash is discarded on the next open
//! - Cached writes are staged per session and committed as one record
//! - Entries may carry a TTL; expired entries read as absent
//! - Safe to open from several processes at once
//!
//! ## Example
//!
//! ```rust
//! use contactbridge_kv::KvStore;
//! use std::time::Duration;
//!
//! let store = KvStore::in_memory();
//! let mut kv = store.session();
//!
//! kv.put_cached("server.a1.url", "https://dav.example.com/").unwrap();
//! kv.put_cached("server.a1.name", "dav.example.com").unwrap();
//! assert_eq!(kv.get("server.a1.url").unwrap(), None);
//! kv.commit_cached().unwrap();
//!
//! assert_eq!(kv.get_partial("server.a1").unwrap().len(), 2);
//!
//! kv.put_with_ttl("sync.lock", true, Duration::from_secs(1800)).unwrap();
//! assert_eq!(kv.get_bool("sync.lock").unwrap(), Some(true));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod clock;
mod config;
mod dir;
mod error;
mod file;
mod memory;
mod record;
mod store;
mod value;

pub use backend::LogBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KvConfig;
pub use error::{KvError, KvResult};
pub use file::FileLog;
pub use memory::MemoryLog;
pub use record::{compute_crc32, encode_batch, Op};
pub use store::{KvSession, KvStore};
pub use value::Value;
