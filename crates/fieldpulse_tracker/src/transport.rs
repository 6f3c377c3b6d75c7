//! Transport abstraction.

use crate::error::{TrackerError, TrackerResult};
use async_trait::async_trait;
use fieldpulse_protocol::DeliveryRequest;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sends one formatted request to the collector.
///
/// Any outcome other than a confirmed delivery is an error; the controller
/// does not look at the cause.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `request` and resolves once the collector has acknowledged it.
    async fn send(&self, request: &DeliveryRequest) -> TrackerResult<()>;
}

/// A request recorded by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentRequest {
    /// The request.
    pub request: DeliveryRequest,
    /// When the send started.
    pub at: Instant,
    /// Whether it was reported as delivered.
    pub success: bool,
}

/// A scripted transport for testing.
///
/// Outcomes are taken from a script in order; once the script runs out the
/// default outcome applies.
pub struct MockTransport {
    script: Mutex<VecDeque<bool>>,
    default_success: AtomicBool,
    sent: Mutex<Vec<SentRequest>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Creates a transport that accepts everything.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_success: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            latency: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delays every send by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Appends outcomes to the script.
    pub fn script(&self, outcomes: &[bool]) {
        self.script.lock().extend(outcomes.iter().copied());
    }

    /// Sets the outcome used when the script is empty.
    pub fn set_default_success(&self, success: bool) {
        self.default_success.store(success, Ordering::SeqCst);
    }

    /// Returns every recorded send.
    pub fn sent(&self) -> Vec<SentRequest> {
        self.sent.lock().clone()
    }

    /// Returns every request that was reported as delivered, in order.
    pub fn delivered(&self) -> Vec<DeliveryRequest> {
        self.sent
            .lock()
            .iter()
            .filter(|s| s.success)
            .map(|s| s.request.clone())
            .collect()
    }

    /// Returns the highest number of sends that ran at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &DeliveryRequest) -> TrackerResult<()> {
        let at = Instant::now();
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let success = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_success.load(Ordering::SeqCst));
        self.sent.lock().push(SentRequest {
            request: request.clone(),
            at,
            success,
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if success {
            Ok(())
        } else {
            Err(TrackerError::transport_retryable("scripted failure"))
        }
    }
}
