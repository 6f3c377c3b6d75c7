//! Storage failures.

use std::io;
use thiserror::Error;

/// Shorthand for results carrying a [`StorageError`].
pub type StorageResult<T> = Result<T, StorageError>;

/// Why a backend call failed.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The OS reported an error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read asked for bytes past the end.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Start of the read.
        offset: u64,
        /// Bytes asked for.
        len: usize,
        /// Bytes available.
        size: u64,
    },

    /// Another process holds the storage lock.
    #[error("storage locked: {path} is in use by another process")]
    Locked {
        /// Path of the locked file.
        path: String,
    },

    /// Truncation target is past the current end.
    #[error("cannot truncate to {requested} bytes, storage holds {size}")]
    InvalidTruncate {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}
