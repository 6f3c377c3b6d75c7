//! # FieldPulse Tracker
//!
//! The position delivery controller: takes fixes from a position source and
//! forwards them to a collector, tolerating outages and failed sends without
//! losing or duplicating data.
//!
//! This crate provides:
//! - [`DeliveryMachine`] - sans-IO delivery state machine
//!   (read → send → delete → read, retry on failure)
//! - [`TrackingController`] - tokio driver running the machine on a single
//!   event loop
//! - [`Transport`] with [`HttpTransport`] and the scripted [`MockTransport`]
//! - [`PositionSource`] / [`ConnectivityMonitor`] event producers
//! - [`StatusSink`] for user-visible notifications
//!
//! ## Architecture
//!
//! Every event (fix, connectivity change, queue or transport completion,
//! retry timer) is fed to the machine one at a time. The machine answers
//! with [`Command`]s; the driver runs them as tasks whose completions come
//! back through the same channel.
//!
//! ## Key Invariants
//!
//! - At most one queue operation and at most one send are in flight
//! - With buffering enabled, positions reach the collector in queue order
//!   and are deleted only after a confirmed send (or as stale records)
//! - A retry is gated on connectivity when it fires, not when it is armed
//! - After stop, late completions never cause a transition

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod controller;
mod error;
mod http;
mod machine;
mod source;
mod stats;
mod status;
mod transport;

pub use config::{HttpTransportConfig, TrackerConfig};
pub use controller::{TrackerHandle, TrackingController};
pub use error::{TrackerError, TrackerResult};
pub use http::HttpTransport;
pub use machine::{Command, DeliveryMachine, Input, ReadOutcome, Removal, Stage, Ticket};
pub use source::{
    ChannelPositionSource, ConnectivityMonitor, ConnectivitySink, FixSink, ManualConnectivity,
    PositionSource, SourceError,
};
pub use stats::DeliveryStats;
pub use status::{ChannelStatusSink, LogStatusSink, MemoryStatusSink, Status, StatusSink};
pub use transport::{MockTransport, SentRequest, Transport};
