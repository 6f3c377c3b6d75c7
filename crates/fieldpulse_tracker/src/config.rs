//! Configuration for the tracker.

use crate::error::{TrackerError, TrackerResult};
use fieldpulse_protocol::check_endpoint;
use std::time::Duration;

/// Default delay before a failed read, send or delete is retried.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Controller configuration, fixed for the controller's lifetime.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Collector endpoint URL.
    pub endpoint_url: String,
    /// Persist positions until delivery is confirmed.
    pub buffering: bool,
    /// Identity of this device; queued positions of other ids are stale.
    pub device_id: String,
    /// Delay of the one-shot retry timer.
    pub retry_delay: Duration,
}

impl TrackerConfig {
    /// Creates a configuration with buffering on and the default retry delay.
    pub fn new(endpoint_url: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            buffering: true,
            device_id: device_id.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Enables or disables buffering.
    pub fn with_buffering(mut self, buffering: bool) -> Self {
        self.buffering = buffering;
        self
    }

    /// Sets the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Checks that the configuration can drive a controller.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Config`] for an endpoint that is not an
    /// http(s) URL with a host, or an empty device id.
    pub fn validate(&self) -> TrackerResult<()> {
        if self.endpoint_url.trim().is_empty() {
            return Err(TrackerError::Config("endpoint URL is empty".into()));
        }
        check_endpoint(&self.endpoint_url).map_err(|e| TrackerError::Config(e.to_string()))?;
        if self.device_id.trim().is_empty() {
            return Err(TrackerError::Config("device id is empty".into()));
        }
        Ok(())
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Configuration for [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
}

impl HttpTransportConfig {
    /// Creates the default configuration (15 s request, 10 s connect).
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self::new()
    }
}
