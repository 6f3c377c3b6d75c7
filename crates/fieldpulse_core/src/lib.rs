//! # FieldPulse Core
//!
//! Position data model and the durable FIFO queue that holds positions
//! until the collector has confirmed them.
//!
//! This crate provides:
//! - [`Position`] - one location fix plus device attributes
//! - [`PositionQueue`] - the async queue contract the delivery controller
//!   drives (insert, select oldest, delete by id)
//! - [`JournalQueue`] - persisted queue backed by an append-only journal
//!   on any [`fieldpulse_storage::StorageBackend`]
//! - [`MemoryQueue`] - non-persisted queue with fault injection for tests
//!
//! ## Key Invariants
//!
//! - Ids are assigned at insertion, strictly increasing, never reused
//!   (not even after a restart or after the queue has emptied)
//! - `select_oldest` always yields the smallest pending id
//! - `delete` of an unknown id is not an error

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod journal;
mod memory;
mod position;
mod queue;

pub use config::JournalConfig;
pub use error::{CoreError, CoreResult};
pub use journal::{
    compute_crc32, replay, JournalQueue, JournalRecord, JournalRecordType, JournalReport,
    Replay, JOURNAL_MAGIC, JOURNAL_VERSION,
};
pub use memory::{MemoryQueue, QueueOp};
pub use position::{BatteryStatus, Position};
pub use queue::PositionQueue;
