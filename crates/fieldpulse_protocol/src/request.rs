//! Transport-ready requests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One request to the collector.
///
/// The query pairs are kept unencoded and in protocol order; the HTTP
/// client encodes them and appends them to any query already on the
/// endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Collector endpoint URL.
    pub endpoint: String,
    /// Query parameters in order.
    pub query: Vec<(String, String)>,
}

impl DeliveryRequest {
    /// Creates a request with no parameters.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            query: Vec::new(),
        }
    }

    /// Appends a parameter.
    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Returns the first value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for DeliveryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)?;
        let mut sep = if self.endpoint.contains('?') { '&' } else { '?' };
        for (key, value) in &self.query {
            write!(f, "{sep}{key}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_params() {
        let request = DeliveryRequest::new("http://collector:5055")
            .param("id", "pulse-01")
            .param("lat", 1.5);
        assert_eq!(request.to_string(), "http://collector:5055?id=pulse-01&lat=1.5");
        assert_eq!(request.get("lat"), Some("1.5"));
        assert_eq!(request.get("lon"), None);
    }

    #[test]
    fn display_extends_existing_query() {
        let request = DeliveryRequest::new("https://c.example/api?key=abc").param("id", "d");
        assert_eq!(request.to_string(), "https://c.example/api?key=abc&id=d");
    }

    #[test]
    fn display_without_params_is_endpoint() {
        assert_eq!(DeliveryRequest::new("http://c").to_string(), "http://c");
    }
}
