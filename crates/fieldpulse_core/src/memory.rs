//! Non-persisted queue for tests and unbuffered tooling.

use crate::error::{CoreError, CoreResult};
use crate::position::Position;
use crate::queue::PositionQueue;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// One operation observed by a [`MemoryQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOp {
    /// A position was inserted with this id.
    Insert(u64),
    /// An insert failed.
    InsertFailed,
    /// A select returned this id (or nothing).
    Select(Option<u64>),
    /// A select failed.
    SelectFailed,
    /// A delete of this id succeeded.
    Delete(u64),
    /// A delete of this id failed.
    DeleteFailed(u64),
}

#[derive(Debug, Default)]
struct MemoryState {
    positions: BTreeMap<u64, Position>,
    next_id: u64,
    ops: Vec<QueueOp>,
}

/// In-memory [`PositionQueue`].
///
/// Besides the queue contract it can inject failures, delay every
/// operation, and record what the caller did so tests can assert on the
/// exact sequence of queue operations and on whether any overlapped.
#[derive(Debug)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    latency: Option<Duration>,
    fail_inserts: AtomicUsize,
    fail_selects: AtomicUsize,
    fail_deletes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl MemoryQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..MemoryState::default()
            }),
            latency: None,
            fail_inserts: AtomicUsize::new(0),
            fail_selects: AtomicUsize::new(0),
            fail_deletes: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delays every operation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next `count` inserts fail.
    pub fn fail_next_inserts(&self, count: usize) {
        self.fail_inserts.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` selects fail.
    pub fn fail_next_selects(&self, count: usize) {
        self.fail_selects.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` deletes fail.
    pub fn fail_next_deletes(&self, count: usize) {
        self.fail_deletes.store(count, Ordering::SeqCst);
    }

    /// Returns every operation seen so far.
    pub fn ops(&self) -> Vec<QueueOp> {
        self.state.lock().ops.clone()
    }

    /// Returns the ids of pending positions in FIFO order.
    pub fn ids(&self) -> Vec<u64> {
        self.state.lock().positions.keys().copied().collect()
    }

    /// Returns the highest number of operations that ran at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl PositionQueue for MemoryQueue {
    async fn insert(&self, mut position: Position) -> CoreResult<u64> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();

        let id = state.next_id;
        state.next_id += 1;
        if take_failure(&self.fail_inserts) {
            state.ops.push(QueueOp::InsertFailed);
            return Err(CoreError::Injected("insert"));
        }

        position.id = id;
        state.positions.insert(id, position);
        state.ops.push(QueueOp::Insert(id));
        Ok(id)
    }

    async fn select_oldest(&self) -> CoreResult<Option<Position>> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();

        if take_failure(&self.fail_selects) {
            state.ops.push(QueueOp::SelectFailed);
            return Err(CoreError::Injected("select"));
        }

        let oldest = state.positions.values().next().cloned();
        state.ops.push(QueueOp::Select(oldest.as_ref().map(|p| p.id)));
        Ok(oldest)
    }

    async fn delete(&self, id: u64) -> CoreResult<()> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();

        if take_failure(&self.fail_deletes) {
            state.ops.push(QueueOp::DeleteFailed(id));
            return Err(CoreError::Injected("delete"));
        }

        state.positions.remove(&id);
        state.ops.push(QueueOp::Delete(id));
        Ok(())
    }

    async fn len(&self) -> CoreResult<usize> {
        Ok(self.state.lock().positions.len())
    }

    async fn positions(&self) -> CoreResult<Vec<Position>> {
        Ok(self.state.lock().positions.values().cloned().collect())
    }
}
