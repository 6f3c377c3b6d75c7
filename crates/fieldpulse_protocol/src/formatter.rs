//! Position to request mapping.

use crate::error::{ProtocolError, ProtocolResult};
use crate::request::DeliveryRequest;
use fieldpulse_core::Position;

/// Builds the request that delivers one position to an endpoint.
///
/// Implementations are pure: the same inputs always yield the same request.
pub trait RequestFormatter: Send + Sync + 'static {
    /// Formats `position` for delivery to `endpoint`.
    fn format(&self, endpoint: &str, position: &Position) -> ProtocolResult<DeliveryRequest>;
}

impl<F> RequestFormatter for F
where
    F: Fn(&str, &Position) -> ProtocolResult<DeliveryRequest> + Send + Sync + 'static,
{
    fn format(&self, endpoint: &str, position: &Position) -> ProtocolResult<DeliveryRequest> {
        self(endpoint, position)
    }
}

/// The OsmAnd protocol: every attribute as a query parameter.
///
/// Speed is in knots and the timestamp in unix seconds. `charge` and `mock`
/// are only sent when true.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsmAndFormatter;

impl OsmAndFormatter {
    /// Creates the formatter.
    pub fn new() -> Self {
        Self
    }
}

/// Checks that `endpoint` is an http(s) URL with a host.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidEndpoint`] otherwise.
pub fn check_endpoint(endpoint: &str) -> ProtocolResult<()> {
    if endpoint.trim().is_empty() {
        return Err(ProtocolError::invalid_endpoint(endpoint, "empty endpoint"));
    }

    let lower = endpoint.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))
        .ok_or_else(|| ProtocolError::invalid_endpoint(endpoint, "unsupported scheme"))?;

    if rest.is_empty() || rest.starts_with(['/', '?', ':']) {
        return Err(ProtocolError::invalid_endpoint(endpoint, "missing host"));
    }
    Ok(())
}

impl RequestFormatter for OsmAndFormatter {
    fn format(&self, endpoint: &str, position: &Position) -> ProtocolResult<DeliveryRequest> {
        check_endpoint(endpoint)?;

        if !position.has_finite_coordinates() {
            return Err(ProtocolError::Unencodable {
                id: position.id,
                reason: "coordinates are not finite",
            });
        }

        let mut request = DeliveryRequest::new(endpoint)
            .param("id", &position.device_id)
            .param("timestamp", position.time.timestamp())
            .param("lat", position.latitude)
            .param("lon", position.longitude)
            .param("speed", position.speed)
            .param("bearing", position.course)
            .param("altitude", position.altitude)
            .param("accuracy", position.accuracy)
            .param("batt", position.battery.level);

        if position.battery.charging {
            request = request.param("charge", true);
        }
        if position.mock {
            request = request.param("mock", true);
        }
        Ok(request)
    }
}
