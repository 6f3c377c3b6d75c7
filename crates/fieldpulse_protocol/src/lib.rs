//! # FieldPulse Protocol
//!
//! Maps a queued [`fieldpulse_core::Position`] to the request the collector
//! expects.
//!
//! This crate provides:
//! - [`RequestFormatter`] - pure `(endpoint, position) -> request` mapping
//! - [`OsmAndFormatter`] - the OsmAnd query-string protocol
//! - [`DeliveryRequest`] - a transport-ready request
//! - [`check_endpoint`] - endpoint validation shared with configuration
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod formatter;
mod request;

pub use error::{ProtocolError, ProtocolResult};
pub use formatter::{check_endpoint, OsmAndFormatter, RequestFormatter};
pub use request::DeliveryRequest;
