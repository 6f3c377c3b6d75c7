//! The byte-store seam under the position journal.

use crate::error::StorageResult;

/// Where journal bytes live.
///
/// A backend is an append-mostly byte array. Record framing, checksums and
/// CBOR payloads belong to the journal in `fieldpulse_core`; a backend only
/// moves bytes. The queue runs backend calls on blocking worker threads,
/// hence `Send + Sync`.
///
/// Offsets returned by `append` stay valid until the next `truncate` or
/// `replace`. `replace` must leave either the old or the new contents after
/// a crash.
pub trait StorageBackend: Send + Sync {
    /// Copies `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadPastEnd`](crate::StorageError::ReadPastEnd) when
    /// the range runs past the end; I/O errors.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Adds `data` at the end and returns the offset it starts at.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the OS.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn flush(&mut self) -> StorageResult<()>;

    /// Length in bytes.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn size(&self) -> StorageResult<u64>;

    /// Blocks until everything written so far is on stable storage.
    ///
    /// # Errors
    ///
    /// I/O errors.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything past `new_size`. Recovery uses this to cut a record
    /// torn by a crash mid-append.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidTruncate`](crate::StorageError::InvalidTruncate)
    /// when `new_size` exceeds the current length; I/O errors.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Swaps the whole contents for `data`. Compaction writes the surviving
    /// records through this.
    ///
    /// # Errors
    ///
    /// I/O errors, in which case the old contents are still in place.
    fn replace(&mut self, data: &[u8]) -> StorageResult<()>;
}
