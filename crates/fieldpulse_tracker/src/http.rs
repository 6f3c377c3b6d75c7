//! HTTP transport implementation.

use crate::config::HttpTransportConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::transport::Transport;
use async_trait::async_trait;
use fieldpulse_protocol::DeliveryRequest;
use reqwest::Client;
use tracing::debug;

/// Delivers requests with an HTTP POST.
///
/// The query pairs are appended to the endpoint and the body is empty. Only
/// a 2xx status counts as delivered.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Creates a transport.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Config`] if the HTTP client cannot be built.
    pub fn new(config: HttpTransportConfig) -> TrackerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TrackerError::Config(format!("http client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

fn classify(err: reqwest::Error) -> TrackerError {
    if err.is_timeout() {
        TrackerError::Timeout
    } else if err.is_builder() {
        TrackerError::transport_fatal(err.to_string())
    } else {
        TrackerError::transport_retryable(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &DeliveryRequest) -> TrackerResult<()> {
        let response = self
            .client
            .post(&request.endpoint)
            .query(&request.query)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            debug!(endpoint = %request.endpoint, status = %status, "collector accepted position");
            Ok(())
        } else {
            Err(TrackerError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
