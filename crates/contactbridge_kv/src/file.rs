//! File-based log backend.

use crate::backend::LogBackend;
use crate::error::{KvError, KvResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A log stored in a single file.
///
/// Several processes may hold the same file open. The size is always taken
/// from file metadata so appends made elsewhere are observed; callers are
/// expected to serialize appends with the store's `LOCK` file.
///
/// # Durability
///
/// `sync()` calls `File::sync_data()`.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLog {
    /// Opens or creates the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> KvResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for FileLog {
    fn read_at(&self, offset: u64, len: usize) -> KvResult<Vec<u8>> {
        let mut file = self.file.lock();
        let size = file.metadata()?.len();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(KvError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> KvResult<u64> {
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        if !data.is_empty() {
            file.write_all(data)?;
            file.flush()?;
        }
        Ok(offset)
    }

    fn size(&self) -> KvResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn sync(&mut self) -> KvResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> KvResult<()> {
        let file = self.file.lock();
        let current = file.metadata()?.len();
        if new_size > current {
            return Err(KvError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate log of {current} bytes to {new_size}"),
            )));
        }
        file.set_len(new_size)?;
        file.sync_all()?;
        Ok(())
    }
}
