//! The global sync lock.
//!
//! A boolean at [`LOCK_KEY`] with a TTL. Claiming it is a single atomic
//! check-and-set in the store, so two processes can never both hold it. The
//! TTL bounds how long a crashed holder can block later runs.

use crate::catalog::LOCK_KEY;
use crate::error::SyncResult;
use contactbridge_kv::KvStore;
use std::time::Duration;
use tracing::{debug, error};

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30 * 60);

/// Proof that this process holds the sync lock.
///
/// Released by [`Self::release`] or, failing that, on drop.
#[derive(Debug)]
#[must_use = "the lock is released when the guard is dropped"]
pub struct SyncLockGuard<'a> {
    store: &'a KvStore,
    ttl: Duration,
    released: bool,
}

impl<'a> SyncLockGuard<'a> {
    /// Tries to take the lock.
    ///
    /// Returns `Ok(None)` if another run holds it.
    pub fn acquire(store: &'a KvStore, ttl: Duration) -> SyncResult<Option<Self>> {
        if !store.session().try_claim(LOCK_KEY, ttl)? {
            debug!("sync lock already held");
            return Ok(None);
        }
        debug!(ttl_secs = ttl.as_secs(), "sync lock acquired");
        Ok(Some(Self {
            store,
            ttl,
            released: false,
        }))
    }

    /// Releases the lock by writing `false`, still with the TTL.
    pub fn release(mut self) -> SyncResult<()> {
        self.released = true;
        write_released(self.store, self.ttl)
    }
}

fn write_released(store: &KvStore, ttl: Duration) -> SyncResult<()> {
    store.session().put_with_ttl(LOCK_KEY, false, ttl)?;
    debug!("sync lock released");
    Ok(())
}

impl Drop for SyncLockGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = write_released(self.store, self.ttl) {
                error!(error = %err, "failed to release sync lock; it expires with its TTL");
            }
        }
    }
}

/// Returns whether a run currently holds the lock.
pub fn is_locked(store: &KvStore) -> SyncResult<bool> {
    Ok(store.session().get_bool(LOCK_KEY)?.unwrap_or(false))
}
