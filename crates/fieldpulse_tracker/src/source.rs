//! Position sources and connectivity monitors.
//!
//! Both are external producers. They push events through a sink into the
//! controller's event loop; the sinks are cheap to clone and never block.

use crate::machine::Input;
use fieldpulse_core::Position;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Errors raised when starting or stopping a position source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The platform refused access to location data.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The source cannot produce fixes.
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Delivers fixes and fix errors to the controller.
#[derive(Debug, Clone)]
pub struct FixSink {
    tx: UnboundedSender<Input>,
}

impl FixSink {
    pub(crate) fn new(tx: UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Delivers a fix. Returns false once the controller has stopped.
    pub fn fix(&self, position: Position) -> bool {
        self.tx.send(Input::Fix(position)).is_ok()
    }

    /// Reports a failed fix. Returns false once the controller has stopped.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.tx.send(Input::FixError(message.into())).is_ok()
    }
}

/// Delivers connectivity changes to the controller.
#[derive(Debug, Clone)]
pub struct ConnectivitySink {
    tx: UnboundedSender<Input>,
}

impl ConnectivitySink {
    pub(crate) fn new(tx: UnboundedSender<Input>) -> Self {
        Self { tx }
    }

    /// Reports the current state; repeating the last state is harmless.
    pub fn set_online(&self, online: bool) -> bool {
        self.tx.send(Input::Connectivity(online)).is_ok()
    }
}

/// Produces position fixes.
pub trait PositionSource: Send + Sync {
    /// Starts delivering fixes to `sink`.
    fn start(&self, sink: FixSink) -> Result<(), SourceError>;

    /// Stops delivering fixes.
    fn stop(&self) -> Result<(), SourceError>;
}

/// Produces connectivity transitions.
pub trait ConnectivityMonitor: Send + Sync {
    /// Returns the current connectivity.
    fn is_online(&self) -> bool;

    /// Starts delivering changes to `sink`.
    fn start(&self, sink: ConnectivitySink);

    /// Stops delivering changes.
    fn stop(&self);
}

/// A position source fed by its owner.
#[derive(Debug, Default)]
pub struct ChannelPositionSource {
    sink: Mutex<Option<FixSink>>,
    deny: AtomicBool,
}

impl ChannelPositionSource {
    /// Creates a source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `start` and `stop` fail with [`SourceError::PermissionDenied`].
    pub fn deny_permission(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Returns true while a controller is subscribed.
    pub fn is_started(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Pushes a fix. Returns false if no controller is subscribed.
    pub fn push(&self, position: Position) -> bool {
        self.sink.lock().as_ref().is_some_and(|s| s.fix(position))
    }

    /// Pushes a fix error. Returns false if no controller is subscribed.
    pub fn push_error(&self, message: impl Into<String>) -> bool {
        self.sink.lock().as_ref().is_some_and(|s| s.error(message))
    }

    fn check_permission(&self) -> Result<(), SourceError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SourceError::PermissionDenied("location access revoked".into()));
        }
        Ok(())
    }
}

impl PositionSource for ChannelPositionSource {
    fn start(&self, sink: FixSink) -> Result<(), SourceError> {
        self.check_permission()?;
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&self) -> Result<(), SourceError> {
        self.check_permission()?;
        *self.sink.lock() = None;
        Ok(())
    }
}

/// A connectivity monitor switched by its owner.
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
    sink: Mutex<Option<ConnectivitySink>>,
}

impl ManualConnectivity {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            sink: Mutex::new(None),
        }
    }

    /// Sets the state and reports it, even if unchanged.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.set_online(online);
        }
    }
}

impl ConnectivityMonitor for ManualConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn start(&self, sink: ConnectivitySink) {
        // Covers a change between is_online() and subscription.
        sink.set_online(self.is_online());
        *self.sink.lock() = Some(sink);
    }

    fn stop(&self) {
        *self.sink.lock() = None;
    }
}
