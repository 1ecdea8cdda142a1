//! Log backend trait definition.

use crate::error::KvResult;

/// An append-only byte log underneath the store.
///
/// Backends are opaque byte stores. The store owns the record format; a
/// backend only knows how to read ranges, append, make appended bytes
/// durable and cut off a torn tail.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `size` reflects appends made through *any* handle to the same log,
///   including other processes
/// - Backends must be `Send + Sync`
pub trait LogBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends past the end of the log or an
    /// I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> KvResult<Vec<u8>>;

    /// Appends data to the end of the log and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> KvResult<u64>;

    /// Returns the current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> KvResult<u64>;

    /// Makes all appended data durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> KvResult<()>;

    /// Truncates the log to `new_size` bytes, discarding a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> KvResult<()>;
}
