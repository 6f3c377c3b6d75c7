//! Delivery counters.

/// Counters kept by the delivery machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Fixes received from the position source.
    pub fixes_received: u64,
    /// Fix errors received, and fixes with non-finite coordinates (all ignored).
    pub fix_errors: u64,
    /// Positions persisted to the queue.
    pub written: u64,
    /// Fixes lost because the queue insert failed.
    pub write_failures: u64,
    /// Positions confirmed by the collector.
    pub sent: u64,
    /// Failed send attempts.
    pub send_failures: u64,
    /// Queued positions of another device deleted without sending.
    pub purged_stale: u64,
    /// Queued positions with non-finite coordinates deleted without sending.
    pub purged_unencodable: u64,
    /// Retry timers armed.
    pub retries_armed: u64,
    /// Unbuffered positions dropped after a failed send.
    pub dropped: u64,
}
