//! Byte stores for the FieldPulse position journal.
//!
//! The journal in `fieldpulse_core` frames, checksums and encodes records;
//! the backends here only keep the bytes.
//!
//! - [`FileBackend`] keeps the journal in one locked file on disk.
//! - [`InMemoryBackend`] keeps it on the heap, for throwaway queues and
//!   tests, and can be told to fail writes.
//!
//! ```rust
//! use fieldpulse_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut journal = InMemoryBackend::new();
//! let offset = journal.append(b"lat=51.5").unwrap();
//! assert_eq!(journal.read_at(offset, 8).unwrap(), b"lat=51.5");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
