//! Position source reading JSON lines.
//!
//! Each line is either a fix:
//!
//! ```text
//! {"lat": 52.52, "lon": 13.405, "speed": 4.2, "battery": 80, "charging": true}
//! ```
//!
//! or a reported fix failure:
//!
//! ```text
//! {"error": "no satellites"}
//! ```
//!
//! A missing `time` is stamped with the current time; a missing `device_id`
//! is filled in by the controller.

use chrono::{DateTime, Utc};
use fieldpulse_core::Position;
use fieldpulse_tracker::{FixSink, PositionSource, SourceError};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Boxed line reader.
pub type LineReader = Box<dyn AsyncBufRead + Unpin + Send>;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixLine {
    Error { error: String },
    Fix(Box<FixRecord>),
}

#[derive(Debug, Deserialize)]
struct FixRecord {
    #[serde(default)]
    device_id: Option<String>,
    #[serde(default)]
    time: Option<DateTime<Utc>>,
    lat: f64,
    lon: f64,
    #[serde(default)]
    altitude: f64,
    #[serde(default)]
    speed: f64,
    #[serde(default)]
    course: f64,
    #[serde(default)]
    accuracy: f64,
    #[serde(default)]
    battery: f64,
    #[serde(default)]
    charging: bool,
    #[serde(default)]
    mock: bool,
}

impl FixRecord {
    fn into_position(self) -> Position {
        let mut position = Position::new(
            self.device_id.unwrap_or_default(),
            self.time.unwrap_or_else(Utc::now),
            self.lat,
            self.lon,
        )
        .with_altitude(self.altitude)
        .with_motion(self.speed, self.course)
        .with_accuracy(self.accuracy)
        .with_battery(self.battery, self.charging);
        position.mock = self.mock;
        position
    }
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// A location fix.
    Fix(Position),
    /// A fix failure reported by the producer.
    Error(String),
}

/// Parses one input line.
pub fn parse_line(line: &str) -> Result<Line, serde_json::Error> {
    Ok(match serde_json::from_str(line)? {
        FixLine::Error { error } => Line::Error(error),
        FixLine::Fix(record) => Line::Fix(record.into_position()),
    })
}

/// Feeds fixes read line by line from a reader.
pub struct JsonLinesSource {
    reader: Mutex<Option<LineReader>>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    delivered: Arc<AtomicU64>,
    eof: Arc<AtomicBool>,
    done: Arc<Notify>,
}

impl JsonLinesSource {
    /// Creates a source over `reader`. The reader is consumed by the first
    /// start.
    pub fn new(reader: LineReader) -> Self {
        Self {
            reader: Mutex::new(Some(reader)),
            interval: Duration::ZERO,
            task: Mutex::new(None),
            delivered: Arc::new(AtomicU64::new(0)),
            eof: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
        }
    }

    /// Sets a pause after each fix.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the number of fixes handed to the controller.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Waits until the input is exhausted.
    pub async fn finished(&self) {
        loop {
            let notified = self.done.notified();
            if self.eof.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

impl PositionSource for JsonLinesSource {
    fn start(&self, sink: FixSink) -> Result<(), SourceError> {
        let reader = self
            .reader
            .lock()
            .take()
            .ok_or_else(|| SourceError::Unavailable("input already consumed".into()))?;

        let interval = self.interval;
        let delivered = Arc::clone(&self.delivered);
        let eof = Arc::clone(&self.eof);
        let done = Arc::clone(&self.done);

        let task = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "fix input failed");
                        sink.error(format!("input error: {e}"));
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let accepted = match parse_line(line) {
                    Ok(Line::Fix(position)) => {
                        let accepted = sink.fix(position);
                        if accepted {
                            delivered.fetch_add(1, Ordering::SeqCst);
                            if !interval.is_zero() {
                                tokio::time::sleep(interval).await;
                            }
                        }
                        accepted
                    }
                    Ok(Line::Error(message)) => sink.error(message),
                    Err(e) => sink.error(format!("invalid fix: {e}")),
                };
                if !accepted {
                    debug!("controller stopped, closing fix input");
                    break;
                }
            }
            eof.store(true, Ordering::SeqCst);
            done.notify_waiters();
        });

        *self.task.lock() = Some(task);
        Ok(())
    }

    fn stop(&self) -> Result<(), SourceError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        Ok(())
    }
}
