//! User-visible status notifications.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A notification published by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// A fix arrived.
    LocationUpdate,
    /// Connectivity came back.
    NetworkOnline,
    /// Connectivity was lost.
    NetworkOffline,
    /// A send attempt failed.
    SendFailed,
    /// An unbuffered position was discarded after a failed send.
    Dropped {
        /// Capture time of the dropped fix.
        time: DateTime<Utc>,
    },
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::LocationUpdate => f.write_str("location update"),
            Status::NetworkOnline => f.write_str("network online"),
            Status::NetworkOffline => f.write_str("network offline"),
            Status::SendFailed => f.write_str("send failed"),
            Status::Dropped { .. } => f.write_str("position dropped"),
        }
    }
}

/// One-way notification channel; the controller never reads from it.
pub trait StatusSink: Send + Sync {
    /// Publishes a status. Must not block.
    fn publish(&self, status: Status);
}

/// Writes statuses to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn publish(&self, status: Status) {
        match &status {
            Status::Dropped { time } => info!(status = %status, time = %time, "status"),
            _ => info!(status = %status, "status"),
        }
    }
}

/// Forwards statuses to a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::Sender<Status>,
}

impl ChannelStatusSink {
    /// Creates a sink and the receiver its statuses arrive on.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Status>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelStatusSink {
    fn publish(&self, status: Status) {
        if let Err(e) = self.tx.try_send(status) {
            debug!(error = %e, "status dropped");
        }
    }
}

/// Records statuses in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusSink {
    statuses: Mutex<Vec<Status>>,
}

impl MemoryStatusSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything published so far.
    pub fn statuses(&self) -> Vec<Status> {
        self.statuses.lock().clone()
    }

    /// Counts published statuses matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&Status) -> bool) -> usize {
        self.statuses.lock().iter().filter(|s| predicate(s)).count()
    }
}

impl StatusSink for MemoryStatusSink {
    fn publish(&self, status: Status) {
        self.statuses.lock().push(status);
    }
}
