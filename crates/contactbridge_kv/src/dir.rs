//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK            # Advisory lock serializing appends across processes
//! ├─ store.log       # Header + batch records
//! └─ store.log.tmp   # Compaction output, renamed over store.log
//! ```
//!
//! Unlike a single-writer database directory, the LOCK file is not held for
//! the lifetime of the store. The application UI and the background sync
//! job both open the same store, so the lock is taken per append (exclusive)
//! and per catch-up read (shared).

use crate::error::{KvError, KvResult};
use crate::record::{decode_header, LOG_HEADER_SIZE};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "store.log";
const LOG_TEMP: &str = "store.log.tmp";

/// The on-disk location of a store.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    lock_file: File,
}

/// Holds the directory lock until dropped.
#[derive(Debug)]
pub struct DirLock<'a> {
    file: &'a File,
}

impl Drop for DirLock<'_> {
    fn drop(&mut self) {
        // Closing the process also releases the lock, so a failed unlock
        // cannot wedge other processes.
        let _ = FileExt::unlock(self.file);
    }
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing and `create_if_missing`
    /// is false, the path is not a directory, or an I/O error occurs.
    pub fn open(path: &Path, create_if_missing: bool) -> KvResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(KvError::MissingDirectory(path.display().to_string()));
            }
        }

        if !path.is_dir() {
            return Err(KvError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        Ok(Self {
            path: path.to_path_buf(),
            lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Blocks until the exclusive lock is held.
    pub fn lock_exclusive(&self) -> KvResult<DirLock<'_>> {
        FileExt::lock_exclusive(&self.lock_file)?;
        Ok(DirLock {
            file: &self.lock_file,
        })
    }

    /// Blocks until a shared lock is held.
    pub fn lock_shared(&self) -> KvResult<DirLock<'_>> {
        FileExt::lock_shared(&self.lock_file)?;
        Ok(DirLock {
            file: &self.lock_file,
        })
    }

    /// Reads the generation from the log currently at [`Self::log_path`].
    ///
    /// Returns `None` if the file is missing or shorter than a header.
    pub fn read_generation(&self) -> KvResult<Option<u64>> {
        let mut file = match File::open(self.log_path()) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut header = [0u8; LOG_HEADER_SIZE];
        match file.read_exact(&mut header) {
            Ok(()) => decode_header(&header).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replaces the log with `contents`.
    ///
    /// Write-then-rename:
    /// 1. Write to the temporary file
    /// 2. Sync it to disk
    /// 3. Rename it over the log
    /// 4. Fsync the directory so the rename is durable
    pub fn replace_log(&self, contents: &[u8]) -> KvResult<()> {
        let temp_path = self.path.join(LOG_TEMP);

        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, self.log_path())?;
        self.sync_directory()?;
        Ok(())
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> KvResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> KvResult<()> {
        // NTFS journals metadata; directory fsync is not available.
        Ok(())
    }
}
