//! The key-value store and its scoped sessions.

use crate::backend::LogBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::KvConfig;
use crate::dir::StoreDir;
use crate::error::{KvError, KvResult};
use crate::file::FileLog;
use crate::memory::MemoryLog;
use crate::record::{decode_header, encode_batch, encode_header, scan_records, Op, LOG_HEADER_SIZE};
use crate::value::Value;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Returns true if `key` is `prefix` itself or lies beneath it.
fn under_prefix(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

fn validate_key(key: &str) -> KvResult<()> {
    if key.is_empty() || key.starts_with('.') || key.ends_with('.') || key.contains("..") {
        return Err(KvError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn expiry(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

struct Inner {
    log: Box<dyn LogBackend>,
    generation: u64,
    /// Log offset up to which records have been applied.
    applied: u64,
    entries: BTreeMap<String, Entry>,
}

impl Inner {
    /// Loads a log from its header, replaying every record.
    fn load(mut log: Box<dyn LogBackend>, repair: bool) -> KvResult<Self> {
        let size = log.size()?;
        if size < LOG_HEADER_SIZE as u64 {
            if !repair {
                return Err(KvError::invalid_format("log header missing"));
            }
            if size > 0 {
                warn!(size, "discarding torn log header");
                log.truncate(0)?;
            }
            log.append(&encode_header(1))?;
            log.sync()?;
        }

        let generation = decode_header(&log.read_at(0, LOG_HEADER_SIZE)?)?;
        let mut inner = Self {
            log,
            generation,
            applied: LOG_HEADER_SIZE as u64,
            entries: BTreeMap::new(),
        };
        inner.catch_up(repair)?;
        Ok(inner)
    }

    /// Applies records appended since the last catch-up.
    ///
    /// A torn tail is skipped. With `repair` (exclusive lock held) it is
    /// also truncated so the next append starts on a record boundary.
    fn catch_up(&mut self, repair: bool) -> KvResult<()> {
        let size = self.log.size()?;
        if size <= self.applied {
            return Ok(());
        }

        let tail = self.log.read_at(self.applied, (size - self.applied) as usize)?;
        let scan = scan_records(&tail)?;
        for ops in &scan.batches {
            self.apply(ops);
        }
        self.applied += scan.valid_len as u64;

        if scan.torn {
            let torn = size - self.applied;
            if repair {
                warn!(offset = self.applied, bytes = torn, "truncating torn log tail");
                self.log.truncate(self.applied)?;
            } else {
                debug!(offset = self.applied, bytes = torn, "ignoring torn log tail");
            }
        }
        Ok(())
    }

    fn apply(&mut self, ops: &[Op]) {
        for op in ops {
            match op {
                Op::Put {
                    key,
                    value,
                    expires_at,
                } => {
                    self.entries.insert(
                        key.clone(),
                        Entry {
                            value: value.clone(),
                            expires_at: *expires_at,
                        },
                    );
                }
                Op::Delete { key } => {
                    self.entries.remove(key);
                }
                Op::DeletePrefix { prefix } => {
                    self.entries.retain(|k, _| !under_prefix(k, prefix));
                }
            }
        }
    }

    fn live(&self, key: &str, now: i64) -> Option<&Value> {
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| &entry.value)
    }

    fn scan_prefix(&self, prefix: &str, now: i64) -> Vec<(String, Value)> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, entry)| under_prefix(k, prefix) && entry.is_live(now))
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }
}

/// A durable string-keyed store with TTL expiry and batched commits.
///
/// Every durable change is one checksummed record in an append-only log, so
/// a batch either survives a crash whole or not at all. Readers never see a
/// partially applied batch: records are applied to the in-memory index under
/// a single write lock.
///
/// Several processes may open the same directory. Appends are serialized by
/// the directory's `LOCK` file and every read first catches up on records
/// appended elsewhere.
///
/// All reads and writes go through a [`KvSession`].
pub struct KvStore {
    inner: RwLock<Inner>,
    dir: Option<StoreDir>,
    clock: Arc<dyn Clock>,
    config: KvConfig,
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("dir", &self.dir.as_ref().map(StoreDir::path))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KvStore {
    /// Opens or creates a store in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened, the log is not a
    /// store log, or an I/O error occurs.
    pub fn open(path: &Path, config: KvConfig) -> KvResult<Self> {
        Self::open_with_clock(path, config, Arc::new(SystemClock))
    }

    /// Opens or creates a store using the given time source.
    pub fn open_with_clock(path: &Path, config: KvConfig, clock: Arc<dyn Clock>) -> KvResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;

        let inner = {
            let _lock = dir.lock_exclusive()?;
            let log = FileLog::open(&dir.log_path())?;
            Inner::load(Box::new(log), true)?
        };

        let log_size = inner.log.size()?;
        debug!(path = %path.display(), generation = inner.generation, log_size, "opened store");

        let store = Self {
            inner: RwLock::new(inner),
            dir: Some(dir),
            clock,
            config,
        };

        if store.config.compact_threshold > 0 && log_size > store.config.compact_threshold {
            store.compact()?;
        }
        Ok(store)
    }

    /// Creates an empty store that lives only in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    /// Creates an in-memory store using the given time source.
    #[must_use]
    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Self {
        let inner = Inner {
            log: Box::new(MemoryLog::with_data(encode_header(1))),
            generation: 1,
            applied: LOG_HEADER_SIZE as u64,
            entries: BTreeMap::new(),
        };
        Self {
            inner: RwLock::new(inner),
            dir: None,
            clock,
            config: KvConfig::default().compact_threshold(0),
        }
    }

    /// Starts a unit of work against the store.
    #[must_use]
    pub fn session(&self) -> KvSession<'_> {
        KvSession {
            store: self,
            staged: Vec::new(),
        }
    }

    /// Returns the time source used for expiry.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Returns the current log size in bytes.
    pub fn log_size(&self) -> KvResult<u64> {
        self.inner.read().log.size()
    }

    /// Rewrites the log to contain only live entries.
    ///
    /// Expired entries are dropped. The new log carries the next generation
    /// so other processes holding the old file reload from scratch.
    pub fn compact(&self) -> KvResult<()> {
        let mut inner = self.inner.write();
        let _lock = self.dir.as_ref().map(StoreDir::lock_exclusive).transpose()?;
        self.reload_if_stale(&mut inner, true)?;

        let now = self.clock.now_millis();
        let before = inner.log.size()?;
        inner.entries.retain(|_, entry| entry.is_live(now));

        let ops: Vec<Op> = inner
            .entries
            .iter()
            .map(|(key, entry)| Op::Put {
                key: key.clone(),
                value: entry.value.clone(),
                expires_at: entry.expires_at,
            })
            .collect();

        let generation = inner.generation + 1;
        let mut contents = encode_header(generation);
        if !ops.is_empty() {
            contents.extend_from_slice(&encode_batch(&ops)?);
        }

        inner.log = match &self.dir {
            Some(dir) => {
                dir.replace_log(&contents)?;
                Box::new(FileLog::open(&dir.log_path())?)
            }
            None => Box::new(MemoryLog::with_data(contents.clone())),
        };
        inner.generation = generation;
        inner.applied = contents.len() as u64;

        info!(
            generation,
            entries = ops.len(),
            before,
            after = contents.len(),
            "compacted store log"
        );
        Ok(())
    }

    /// Reloads from disk if another process compacted, then catches up.
    fn reload_if_stale(&self, inner: &mut Inner, repair: bool) -> KvResult<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };

        let on_disk = dir.read_generation()?;
        let shrunk = inner.log.size()? < inner.applied;
        if on_disk != Some(inner.generation) || shrunk {
            debug!(
                ours = inner.generation,
                on_disk = ?on_disk,
                "store log replaced, reloading"
            );
            let log = FileLog::open(&dir.log_path())?;
            *inner = Inner::load(Box::new(log), repair)?;
            return Ok(());
        }

        inner.catch_up(repair)
    }

    fn read(&self) -> KvResult<RwLockReadGuard<'_, Inner>> {
        match &self.dir {
            Some(dir) => {
                // The in-process lock is taken first: flock is per open file,
                // so threads sharing the LOCK handle must not interleave.
                let mut inner = self.inner.write();
                {
                    let _lock = dir.lock_shared()?;
                    self.reload_if_stale(&mut inner, false)?;
                }
                Ok(RwLockWriteGuard::downgrade(inner))
            }
            None => Ok(self.inner.read()),
        }
    }

    /// Appends the ops produced by `build` as one record and applies them.
    ///
    /// `build` sees the caught-up state under the exclusive lock; returning
    /// `None` writes nothing. Returns whether a record was written.
    fn write_with<F>(&self, build: F) -> KvResult<bool>
    where
        F: FnOnce(&Inner, i64) -> Option<Vec<Op>>,
    {
        let mut inner = self.inner.write();
        let _lock = self.dir.as_ref().map(StoreDir::lock_exclusive).transpose()?;
        self.reload_if_stale(&mut inner, true)?;

        let now = self.clock.now_millis();
        let ops = match build(&inner, now) {
            Some(ops) if !ops.is_empty() => ops,
            _ => return Ok(false),
        };

        let record = encode_batch(&ops)?;
        let offset = inner.log.append(&record)?;
        if self.config.sync_on_commit {
            inner.log.sync()?;
        }
        if offset != inner.applied {
            warn!(offset, applied = inner.applied, "log grew outside the store lock");
        }
        inner.applied = offset + record.len() as u64;
        inner.apply(&ops);
        Ok(true)
    }

    fn write(&self, ops: Vec<Op>) -> KvResult<()> {
        self.write_with(|_, _| Some(ops)).map(|_| ())
    }
}

/// A scoped unit of work against a [`KvStore`].
///
/// Direct writes (`put`, `delete`, ...) are durable when they return.
/// Cached writes (`put_cached`) are staged in the session and invisible to
/// every reader, this session included, until [`Self::commit_cached`]
/// writes them as a single record.
///
/// Dropping a session discards anything still staged. Call
/// [`Self::close`] to commit on the way out.
pub struct KvSession<'a> {
    store: &'a KvStore,
    staged: Vec<Op>,
}

impl KvSession<'_> {
    /// Returns the value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> KvResult<Option<Value>> {
        let now = self.store.clock.now_millis();
        Ok(self.store.read()?.live(key, now).cloned())
    }

    /// Returns the value for `key`, or `default` if absent.
    ///
    /// The default is not written back.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> KvResult<Value> {
        Ok(self.get(key)?.unwrap_or_else(|| default.into()))
    }

    /// Returns a text value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TypeMismatch`] if the key holds another type.
    pub fn get_text(&self, key: &str) -> KvResult<Option<String>> {
        match self.get(key)? {
            None => Ok(None),
            Some(Value::Text(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, "text", &other)),
        }
    }

    /// Returns a boolean value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TypeMismatch`] if the key holds another type.
    pub fn get_bool(&self, key: &str) -> KvResult<Option<bool>> {
        match self.get(key)? {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(other) => Err(mismatch(key, "bool", &other)),
        }
    }

    /// Returns an integer value.
    ///
    /// # Errors
    ///
    /// Returns [`KvError::TypeMismatch`] if the key holds another type.
    pub fn get_int(&self, key: &str) -> KvResult<Option<i64>> {
        match self.get(key)? {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(Some(i)),
            Some(other) => Err(mismatch(key, "int", &other)),
        }
    }

    /// Returns every live entry at or beneath `prefix`, ordered by key.
    ///
    /// Matching is per path segment: `server.ab` matches `server.ab.url`
    /// but not `server.abc.url`.
    pub fn get_partial(&self, prefix: &str) -> KvResult<Vec<(String, Value)>> {
        let now = self.store.clock.now_millis();
        Ok(self.store.read()?.scan_prefix(prefix, now))
    }

    /// Writes `key` durably.
    pub fn put(&self, key: &str, value: impl Into<Value>) -> KvResult<()> {
        validate_key(key)?;
        self.store.write(vec![Op::Put {
            key: key.to_string(),
            value: value.into(),
            expires_at: None,
        }])
    }

    /// Writes `key` durably; it reads as absent once `ttl` has elapsed.
    pub fn put_with_ttl(&self, key: &str, value: impl Into<Value>, ttl: Duration) -> KvResult<()> {
        validate_key(key)?;
        let key = key.to_string();
        let value = value.into();
        self.store
            .write_with(|_, now| {
                Some(vec![Op::Put {
                    key,
                    value,
                    expires_at: Some(expiry(now, ttl)),
                }])
            })
            .map(|_| ())
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &str) -> KvResult<()> {
        let key = key.to_string();
        self.store
            .write_with(|inner, _| {
                inner
                    .entries
                    .contains_key(&key)
                    .then(|| vec![Op::Delete { key }])
            })
            .map(|_| ())
    }

    /// Removes every key at or beneath `prefix` in one record.
    pub fn delete_partial(&self, prefix: &str) -> KvResult<()> {
        validate_key(prefix)?;
        let prefix = prefix.to_string();
        self.store
            .write_with(|inner, _| {
                let any = inner
                    .entries
                    .range(prefix.clone()..)
                    .take_while(|(k, _)| k.starts_with(prefix.as_str()))
                    .any(|(k, _)| under_prefix(k, &prefix));
                any.then(|| vec![Op::DeletePrefix { prefix }])
            })
            .map(|_| ())
    }

    /// Stages a write for the next [`Self::commit_cached`].
    pub fn put_cached(&mut self, key: &str, value: impl Into<Value>) -> KvResult<()> {
        validate_key(key)?;
        self.staged.push(Op::Put {
            key: key.to_string(),
            value: value.into(),
            expires_at: None,
        });
        Ok(())
    }

    /// Writes every staged change as one durable record.
    ///
    /// On error nothing from the batch is visible and the staged writes are
    /// dropped.
    pub fn commit_cached(&mut self) -> KvResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let ops = std::mem::take(&mut self.staged);
        let count = ops.len();
        self.store.write(ops)?;
        debug!(count, "committed cached batch");
        Ok(())
    }

    /// Drops every staged change.
    pub fn discard_cached(&mut self) {
        self.staged.clear();
    }

    /// Returns the number of staged writes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.staged.len()
    }

    /// Atomically sets a boolean flag unless it is already truthy.
    ///
    /// The check and the write happen under the exclusive store lock, so
    /// two processes can never both claim the flag. Returns `true` if this
    /// call set the flag.
    pub fn try_claim(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        validate_key(key)?;
        let key = key.to_string();
        self.store.write_with(|inner, now| {
            let held = inner.live(&key, now).is_some_and(Value::is_truthy);
            (!held).then(|| {
                vec![Op::Put {
                    key,
                    value: Value::Bool(true),
                    expires_at: Some(expiry(now, ttl)),
                }]
            })
        })
    }

    /// Ends the session, committing staged writes.
    pub fn close(mut self) -> KvResult<()> {
        self.commit_cached()
    }
}

impl Drop for KvSession<'_> {
    fn drop(&mut self) {
        if !self.staged.is_empty() {
            warn!(
                count = self.staged.len(),
                "session dropped with uncommitted writes; discarding"
            );
        }
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> KvError {
    KvError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: found.type_name(),
    }
}
