//! Error types for FieldPulse core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in queue and codec operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] fieldpulse_storage::StorageError),

    /// CBOR encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The journal contains a damaged record.
    #[error("journal corruption at offset {offset}: {message}")]
    JournalCorruption {
        /// Offset of the damaged record.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Offset of the record.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The blocking worker running a queue operation died.
    #[error("queue worker failed: {0}")]
    Worker(String),

    /// A failure injected by a test double.
    #[error("injected fault: {0}")]
    Injected(&'static str),
}

impl CoreError {
    /// Creates a journal corruption error.
    pub fn corruption(offset: u64, message: impl Into<String>) -> Self {
        Self::JournalCorruption {
            offset,
            message: message.into(),
        }
    }

    /// Returns true if the error came from persisted storage (as opposed to
    /// a programming or format error).
    pub fn is_storage_fault(&self) -> bool {
        matches!(
            self,
            CoreError::Storage(_) | CoreError::Worker(_) | CoreError::Injected(_)
        )
    }
}
