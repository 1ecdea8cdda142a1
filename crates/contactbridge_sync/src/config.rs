//! Configuration for the orchestrator.

use crate::error::{SyncError, SyncResult};
use crate::lock::DEFAULT_LOCK_TTL;
use crate::syncevolution::DEFAULT_PROGRAM;
use contactbridge_dav::HttpDavClient;
use contactbridge_kv::KvConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform data directory.
pub const APP_DIR: &str = "contactbridge";

/// Configuration for a [`ContactBridge`](crate::ContactBridge).
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory holding the KV store.
    pub data_dir: PathBuf,
    /// Engine executable.
    pub engine_program: String,
    /// How long a sync lock survives a crashed holder.
    pub lock_ttl: Duration,
    /// Timeout for each discovery request.
    pub dav_timeout: Duration,
    /// Store options.
    pub kv: KvConfig,
}

impl BridgeConfig {
    /// Creates a configuration storing data in `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            engine_program: DEFAULT_PROGRAM.to_string(),
            lock_ttl: DEFAULT_LOCK_TTL,
            dav_timeout: HttpDavClient::DEFAULT_TIMEOUT,
            kv: KvConfig::default(),
        }
    }

    /// Creates a configuration under the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the platform has no data directory.
    pub fn from_platform() -> SyncResult<Self> {
        let base = dirs::data_dir()
            .ok_or_else(|| SyncError::Config("no platform data directory".into()))?;
        Ok(Self::new(base.join(APP_DIR)))
    }

    /// Returns the store directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Sets the engine executable.
    pub fn with_engine_program(mut self, program: impl Into<String>) -> Self {
        self.engine_program = program.into();
        self
    }

    /// Sets the sync lock TTL.
    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Sets the discovery request timeout.
    pub fn with_dav_timeout(mut self, timeout: Duration) -> Self {
        self.dav_timeout = timeout;
        self
    }

    /// Sets the store options.
    pub fn with_kv(mut self, kv: KvConfig) -> Self {
        self.kv = kv;
        self
    }

    /// Checks values that would make the orchestrator unusable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] describing the first bad value.
    pub fn validate(&self) -> SyncResult<()> {
        if self.engine_program.trim().is_empty() {
            return Err(SyncError::Config("engine program is empty".into()));
        }
        if self.lock_ttl.is_zero() {
            return Err(SyncError::Config("lock TTL must be positive".into()));
        }
        if self.dav_timeout.is_zero() {
            return Err(SyncError::Config("discovery timeout must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::new("/tmp/cb");
        assert_eq!(config.data_dir(), Path::new("/tmp/cb"));
        assert_eq!(config.engine_program, "syncevolution");
        assert_eq!(config.lock_ttl, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = BridgeConfig::new("/tmp/cb")
            .with_engine_program("/opt/bin/syncevolution")
            .with_lock_ttl(Duration::from_secs(60))
            .with_dav_timeout(Duration::from_secs(5))
            .with_kv(KvConfig::new().sync_on_commit(false));

        assert_eq!(config.engine_program, "/opt/bin/syncevolution");
        assert_eq!(config.lock_ttl, Duration::from_secs(60));
        assert_eq!(config.dav_timeout, Duration::from_secs(5));
        assert!(!config.kv.sync_on_commit);
    }

    #[test]
    fn rejects_unusable_values() {
        assert!(BridgeConfig::new("/tmp/cb")
            .with_engine_program(" ")
            .validate()
            .is_err());
        assert!(BridgeConfig::new("/tmp/cb")
            .with_lock_ttl(Duration::ZERO)
            .validate()
            .is_err());
    }
}
