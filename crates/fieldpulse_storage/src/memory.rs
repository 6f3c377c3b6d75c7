//! Journal held in a heap buffer.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

/// A journal that lives only as long as the process.
///
/// Used for queues that need not survive a restart and throughout the test
/// suites. [`set_fail_writes`](Self::set_fail_writes) turns every mutation
/// into an I/O error, which is how the queue's storage-fault handling is
/// exercised.
///
/// ```rust
/// use fieldpulse_storage::{InMemoryBackend, StorageBackend};
///
/// let mut journal = InMemoryBackend::new();
/// assert_eq!(journal.append(b"fix").unwrap(), 0);
/// assert_eq!(journal.snapshot(), b"fix");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: RwLock<Vec<u8>>,
    failing: AtomicBool,
}

impl InMemoryBackend {
    /// An empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A journal that starts out holding `bytes`, as if reopened after a
    /// restart (torn tail included, if `bytes` has one).
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
            failing: AtomicBool::new(false),
        }
    }

    /// Current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// While `fail` is set, `append`, `flush`, `sync`, `truncate` and
    /// `replace` return an I/O error and change nothing.
    pub fn set_fail_writes(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    fn writable(&self) -> StorageResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure").into());
        }
        Ok(())
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let start = offset as usize;
        Ok(bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.writable()?;
        let bytes = self.bytes.get_mut();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.writable()
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.writable()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.writable()?;
        let bytes = self.bytes.get_mut();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }

        bytes.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        self.writable()?;
        *self.bytes.get_mut() = data.to_vec();
        Ok(())
    }
}
