//! The durable queue contract.

use crate::error::CoreResult;
use crate::position::Position;
use async_trait::async_trait;

/// An ordered store of positions awaiting delivery.
///
/// All operations are asynchronous; implementations may run the work on
/// worker threads but must report every storage fault as an error rather
/// than dropping it.
///
/// # Invariants
///
/// - `insert` assigns the next id; ids strictly increase and are never reused
/// - `select_oldest` returns the lowest pending id and never mutates the queue
/// - `delete` removes exactly one position; an unknown id is `Ok(())`
///
/// The delivery controller never issues a second operation while one is
/// outstanding, so implementations need not order concurrent calls.
#[async_trait]
pub trait PositionQueue: Send + Sync + 'static {
    /// Persists a new position and returns its assigned id.
    async fn insert(&self, position: Position) -> CoreResult<u64>;

    /// Returns the pending position with the smallest id, if any.
    async fn select_oldest(&self) -> CoreResult<Option<Position>>;

    /// Removes the position with the given id.
    async fn delete(&self, id: u64) -> CoreResult<()>;

    /// Returns the number of pending positions.
    async fn len(&self) -> CoreResult<usize>;

    /// Returns true if nothing is pending.
    async fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Returns a snapshot of all pending positions in FIFO order.
    async fn positions(&self) -> CoreResult<Vec<Position>>;
}
