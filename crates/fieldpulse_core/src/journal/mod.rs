//! Append-only position journal and the queue built on it.
//!
//! The journal is the only persisted state of the queue. On open it is
//! replayed into an ordered in-memory index; every mutation appends one
//! record before the index changes, so the index never runs ahead of the
//! disk.

mod record;

pub use record::{compute_crc32, JournalRecord, JournalRecordType, JOURNAL_MAGIC, JOURNAL_VERSION};

use crate::config::JournalConfig;
use crate::error::{CoreError, CoreResult};
use crate::position::Position;
use crate::queue::PositionQueue;
use async_trait::async_trait;
use fieldpulse_storage::{FileBackend, StorageBackend, StorageResult};
use parking_lot::Mutex;
use record::Decoded;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// State rebuilt from a journal.
#[derive(Debug, Clone, Default)]
pub struct Replay {
    /// Pending positions keyed by id.
    pub positions: BTreeMap<u64, Position>,
    /// Next id to assign.
    pub next_id: u64,
    /// Number of complete records read.
    pub records: usize,
    /// Records that no longer describe a pending position.
    pub dead_records: usize,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Bytes after the valid prefix (a torn final record).
    pub torn_bytes: u64,
}

/// Replays raw journal bytes.
///
/// A record cut short at the end is reported through
/// [`Replay::torn_bytes`]; damage to a complete record is an error.
///
/// # Errors
///
/// Returns [`CoreError::JournalCorruption`] or
/// [`CoreError::ChecksumMismatch`] for a damaged record.
pub fn replay(bytes: &[u8]) -> CoreResult<Replay> {
    let mut state = Replay {
        next_id: 1,
        ..Replay::default()
    };
    let mut offset = 0usize;

    while offset < bytes.len() {
        match JournalRecord::decode(&bytes[offset..], offset as u64)? {
            Decoded::Record(record, len) => {
                apply(&mut state, record, offset as u64)?;
                state.records += 1;
                offset += len;
            }
            Decoded::Truncated => break,
        }
    }

    state.valid_len = offset as u64;
    state.torn_bytes = (bytes.len() - offset) as u64;
    Ok(state)
}

fn apply(state: &mut Replay, record: JournalRecord, offset: u64) -> CoreResult<()> {
    match record {
        JournalRecord::Insert(position) => {
            let id = position.id;
            if state.positions.insert(id, position).is_some() {
                return Err(CoreError::corruption(offset, format!("duplicate id {id}")));
            }
            state.next_id = state.next_id.max(id + 1);
        }
        JournalRecord::Delete { id } => {
            // A delete kills its insert as well as itself.
            state.dead_records += if state.positions.remove(&id).is_some() {
                2
            } else {
                1
            };
        }
        JournalRecord::Sequence { next_id } => {
            state.next_id = state.next_id.max(next_id);
        }
    }
    Ok(())
}

/// Summary of a journal's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalReport {
    /// Journal size in bytes.
    pub size: u64,
    /// Complete records.
    pub records: usize,
    /// Pending positions.
    pub pending: usize,
    /// Dead records awaiting compaction.
    pub dead_records: usize,
    /// Next id to assign.
    pub next_id: u64,
    /// Bytes of a torn final record.
    pub torn_bytes: u64,
}

impl JournalReport {
    /// Replays a backend read-only and summarizes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a record is damaged.
    pub fn from_backend(backend: &dyn StorageBackend) -> CoreResult<Self> {
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;
        let replay = replay(&bytes)?;

        Ok(Self {
            size,
            records: replay.records,
            pending: replay.positions.len(),
            dead_records: replay.dead_records,
            next_id: replay.next_id,
            torn_bytes: replay.torn_bytes,
        })
    }
}

struct JournalState<B> {
    backend: B,
    config: JournalConfig,
    pending: BTreeMap<u64, Position>,
    next_id: u64,
    dead_records: usize,
}

impl<B: StorageBackend> JournalState<B> {
    fn append(&mut self, mut position: Position) -> CoreResult<u64> {
        // Burn the id even if the write fails; a record may have landed.
        let id = self.next_id;
        self.next_id += 1;
        position.id = id;

        let data = JournalRecord::Insert(position.clone()).encode()?;
        self.write(&data)?;
        self.pending.insert(id, position);
        Ok(id)
    }

    fn remove(&mut self, id: u64) -> CoreResult<()> {
        if !self.pending.contains_key(&id) {
            return Ok(());
        }

        let data = JournalRecord::Delete { id }.encode()?;
        self.write(&data)?;
        self.pending.remove(&id);
        self.dead_records += 2;

        if self.dead_records >= self.config.compact_threshold {
            if let Err(e) = self.compact() {
                warn!(error = %e, "journal compaction failed");
            }
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        let before = self.backend.size()?;
        if let Err(e) = self.write_durable(data) {
            if let Err(cut) = self.backend.truncate(before) {
                warn!(error = %cut, offset = before, "could not roll back partial journal record");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn write_durable(&mut self, data: &[u8]) -> StorageResult<()> {
        self.backend.append(data)?;
        if self.config.sync_on_write {
            self.backend.flush()?;
            self.backend.sync()?;
        }
        Ok(())
    }

    fn compact(&mut self) -> CoreResult<()> {
        let mut data = JournalRecord::Sequence {
            next_id: self.next_id,
        }
        .encode()?;
        for position in self.pending.values() {
            data.extend_from_slice(&JournalRecord::Insert(position.clone()).encode()?);
        }

        self.backend.replace(&data)?;
        debug!(
            live = self.pending.len(),
            dropped = self.dead_records,
            bytes = data.len(),
            "journal compacted"
        );
        self.dead_records = 0;
        Ok(())
    }
}

/// A persisted [`PositionQueue`] backed by an append-only journal.
///
/// Blocking journal work runs on tokio's blocking pool when driven through
/// the async trait; the synchronous methods are available for tooling.
///
/// # Example
///
/// ```
/// use fieldpulse_core::{JournalConfig, JournalQueue, Position};
/// use fieldpulse_storage::InMemoryBackend;
/// use chrono::Utc;
///
/// let queue = JournalQueue::open(InMemoryBackend::new(), JournalConfig::default()).unwrap();
/// let id = queue.append(Position::new("pulse-01", Utc::now(), 1.0, 2.0)).unwrap();
/// assert_eq!(queue.oldest().unwrap().id, id);
/// ```
pub struct JournalQueue<B: StorageBackend + 'static> {
    state: Arc<Mutex<JournalState<B>>>,
}

impl<B: StorageBackend + 'static> Clone for JournalQueue<B> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl JournalQueue<FileBackend> {
    /// Opens (or creates) a journal file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked by another process, cannot be
    /// opened, or contains a damaged record.
    pub fn open_path(path: &Path, config: JournalConfig) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(backend, config)
    }
}

impl<B: StorageBackend + 'static> JournalQueue<B> {
    /// Opens a queue over `backend`, replaying any existing journal.
    ///
    /// A torn final record is cut off.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or a complete record
    /// is damaged.
    pub fn open(mut backend: B, config: JournalConfig) -> CoreResult<Self> {
        let size = backend.size()?;
        let bytes = backend.read_at(0, size as usize)?;
        let replay = replay(&bytes)?;

        if replay.torn_bytes > 0 {
            warn!(
                torn_bytes = replay.torn_bytes,
                valid_len = replay.valid_len,
                "discarding torn journal tail"
            );
            backend.truncate(replay.valid_len)?;
        }

        debug!(
            pending = replay.positions.len(),
            next_id = replay.next_id,
            records = replay.records,
            "journal opened"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(JournalState {
                backend,
                config,
                pending: replay.positions,
                next_id: replay.next_id,
                dead_records: replay.dead_records,
            })),
        })
    }

    /// Persists a position and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error on storage fault. The id is consumed either way.
    pub fn append(&self, position: Position) -> CoreResult<u64> {
        self.state.lock().append(position)
    }

    /// Returns the pending position with the smallest id.
    pub fn oldest(&self) -> Option<Position> {
        self.state.lock().pending.values().next().cloned()
    }

    /// Removes a position; unknown ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on storage fault.
    pub fn remove(&self, id: u64) -> CoreResult<()> {
        self.state.lock().remove(id)
    }

    /// Rewrites the journal to hold only the pending positions.
    ///
    /// # Errors
    ///
    /// Returns an error on storage fault; the old journal stays intact.
    pub fn compact(&self) -> CoreResult<()> {
        self.state.lock().compact()
    }

    /// Returns the number of pending positions.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns all pending positions in FIFO order.
    pub fn snapshot(&self) -> Vec<Position> {
        self.state.lock().pending.values().cloned().collect()
    }

    /// Returns the id the next insert will receive.
    pub fn next_id(&self) -> u64 {
        self.state.lock().next_id
    }

    /// Summarizes the journal as it is on the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    pub fn report(&self) -> CoreResult<JournalReport> {
        JournalReport::from_backend(&self.state.lock().backend)
    }

    /// Runs `f` with shared access to the backend.
    pub fn with_backend<R>(&self, f: impl FnOnce(&B) -> R) -> R {
        f(&self.state.lock().backend)
    }

    async fn blocking<R, F>(&self, f: F) -> CoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut JournalState<B>) -> CoreResult<R> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        tokio::task::spawn_blocking(move || {
            let mut guard = state.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| CoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> PositionQueue for JournalQueue<B> {
    async fn insert(&self, position: Position) -> CoreResult<u64> {
        self.blocking(move |state| state.append(position)).await
    }

    async fn select_oldest(&self) -> CoreResult<Option<Position>> {
        self.blocking(|state| Ok(state.pending.values().next().cloned()))
            .await
    }

    async fn delete(&self, id: u64) -> CoreResult<()> {
        self.blocking(move |state| state.remove(id)).await
    }

    async fn len(&self) -> CoreResult<usize> {
        self.blocking(|state| Ok(state.pending.len())).await
    }

    async fn positions(&self) -> CoreResult<Vec<Position>> {
        self.blocking(|state| Ok(state.pending.values().cloned().collect()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fieldpulse_storage::InMemoryBackend;

    fn fix(device: &str, minute: u32) -> Position {
        let time = Utc.with_ymd_and_hms(2024, 5, 17, 9, minute, 0).unwrap();
        Position::new(device, time, 59.3293, 18.0686)
    }

    fn open(backend: InMemoryBackend) -> JournalQueue<InMemoryBackend> {
        JournalQueue::open(backend, JournalConfig::default()).unwrap()
    }

    fn reopen(queue: &JournalQueue<InMemoryBackend>) -> JournalQueue<InMemoryBackend> {
        open(InMemoryBackend::with_data(queue.with_backend(|b| b.snapshot())))
    }

    #[test]
    fn ids_are_assigned_in_order() {
        let queue = open(InMemoryBackend::new());

        assert_eq!(queue.append(fix("a", 1)).unwrap(), 1);
        assert_eq!(queue.append(fix("a", 2)).unwrap(), 2);
        assert_eq!(queue.append(fix("a", 3)).unwrap(), 3);
        assert_eq!(queue.oldest().unwrap().id, 1);
    }

    #[test]
    fn delete_unknown_id_is_ok_and_writes_nothing() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();
        let size = queue.with_backend(|b| b.size().unwrap());

        queue.remove(99).unwrap();
        assert_eq!(queue.with_backend(|b| b.size().unwrap()), size);
    }

    #[test]
    fn reopen_restores_pending_and_next_id() {
        let queue = open(InMemoryBackend::new());
        for minute in 0..4 {
            queue.append(fix("a", minute)).unwrap();
        }
        queue.remove(1).unwrap();
        queue.remove(3).unwrap();

        let reopened = reopen(&queue);
        let ids: Vec<u64> = reopened.snapshot().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 4]);
        assert_eq!(reopened.next_id(), 5);
    }

    #[test]
    fn ids_survive_an_emptied_and_compacted_queue() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();
        queue.append(fix("a", 2)).unwrap();
        queue.remove(1).unwrap();
        queue.remove(2).unwrap();
        queue.compact().unwrap();

        let reopened = reopen(&queue);
        assert_eq!(reopened.pending_count(), 0);
        assert_eq!(reopened.append(fix("a", 3)).unwrap(), 3);
    }

    #[test]
    fn compaction_triggers_at_threshold() {
        let config = JournalConfig::default().with_compact_threshold(4);
        let queue = JournalQueue::open(InMemoryBackend::new(), config).unwrap();
        for minute in 0..3 {
            queue.append(fix("a", minute)).unwrap();
        }

        queue.remove(1).unwrap();
        assert_eq!(queue.report().unwrap().dead_records, 2);

        queue.remove(2).unwrap();
        let report = queue.report().unwrap();
        assert_eq!(report.dead_records, 0);
        assert_eq!(report.records, 2); // sequence + insert of id 3
        assert_eq!(report.pending, 1);
        assert_eq!(report.next_id, 4);
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();
        queue.append(fix("a", 2)).unwrap();

        let mut data = queue.with_backend(|b| b.snapshot());
        data.truncate(data.len() - 3);

        let reopened = open(InMemoryBackend::with_data(data));
        assert_eq!(reopened.pending_count(), 1);
        assert_eq!(reopened.report().unwrap().torn_bytes, 0);
        assert_eq!(reopened.append(fix("a", 3)).unwrap(), 2);
    }

    #[test]
    fn corrupt_record_fails_open() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();
        queue.append(fix("a", 2)).unwrap();

        let mut data = queue.with_backend(|b| b.snapshot());
        data[20] ^= 0xFF;

        let result = JournalQueue::open(InMemoryBackend::with_data(data), JournalConfig::default());
        assert!(matches!(result, Err(CoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn failed_insert_burns_id_and_leaves_no_record() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();
        let size = queue.with_backend(|b| b.size().unwrap());

        queue.with_backend(|b| b.set_fail_writes(true));
        assert!(queue.append(fix("a", 2)).unwrap_err().is_storage_fault());
        queue.with_backend(|b| b.set_fail_writes(false));

        assert_eq!(queue.with_backend(|b| b.size().unwrap()), size);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.append(fix("a", 3)).unwrap(), 3);
    }

    #[test]
    fn failed_delete_keeps_position() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();

        queue.with_backend(|b| b.set_fail_writes(true));
        assert!(queue.remove(1).is_err());
        queue.with_backend(|b| b.set_fail_writes(false));

        assert_eq!(queue.oldest().unwrap().id, 1);
    }

    #[tokio::test]
    async fn async_contract() {
        let queue = open(InMemoryBackend::new());

        assert!(queue.select_oldest().await.unwrap().is_none());
        assert!(queue.is_empty().await.unwrap());

        let first = queue.insert(fix("a", 1)).await.unwrap();
        let second = queue.insert(fix("b", 2)).await.unwrap();
        assert!(second > first);

        // Selecting does not consume.
        assert_eq!(queue.select_oldest().await.unwrap().unwrap().id, first);
        assert_eq!(queue.select_oldest().await.unwrap().unwrap().id, first);

        queue.delete(first).await.unwrap();
        let oldest = queue.select_oldest().await.unwrap().unwrap();
        assert_eq!(oldest.id, second);
        assert_eq!(oldest.device_id, "b");
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn queries_wait_off_the_runtime_thread() {
        let queue = open(InMemoryBackend::new());
        queue.append(fix("a", 1)).unwrap();

        // Another thread holds the journal, as a long sync would.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = queue.clone();
        let thread = std::thread::spawn(move || {
            holder.with_backend(|_| {
                locked_tx.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(200));
            })
        });
        locked_rx.recv().unwrap();

        let other_task = tokio::spawn(async { std::time::Instant::now() });
        assert_eq!(queue.len().await.unwrap(), 1);
        let answered = std::time::Instant::now();

        // The runtime kept running other tasks while the query waited.
        assert!(other_task.await.unwrap() < answered);
        assert_eq!(queue.positions().await.unwrap().len(), 1);
        thread.join().unwrap();
    }
}
