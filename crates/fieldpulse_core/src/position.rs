//! Position data model.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Battery state of the reporting device at capture time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// Charge level in percent (0-100).
    pub level: f64,
    /// Whether the device was charging.
    pub charging: bool,
}

/// A single location observation.
///
/// `id` is zero until the position has been persisted by a
/// [`crate::PositionQueue`]; once assigned it never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Queue-assigned id (0 = not persisted).
    #[serde(default)]
    pub id: u64,
    /// Identity of the reporting device at capture time.
    pub device_id: String,
    /// Fix time.
    pub time: DateTime<Utc>,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude in metres.
    #[serde(default)]
    pub altitude: f64,
    /// Ground speed in knots.
    #[serde(default)]
    pub speed: f64,
    /// Course over ground in degrees.
    #[serde(default)]
    pub course: f64,
    /// Horizontal accuracy in metres.
    #[serde(default)]
    pub accuracy: f64,
    /// Battery state.
    #[serde(default)]
    pub battery: BatteryStatus,
    /// Whether the fix came from a mock location provider.
    #[serde(default)]
    pub mock: bool,
}

impl Position {
    /// Creates an unpersisted position with zeroed optional attributes.
    pub fn new(
        device_id: impl Into<String>,
        time: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
    ) -> Self {
        Self {
            id: 0,
            device_id: device_id.into(),
            time,
            latitude,
            longitude,
            altitude: 0.0,
            speed: 0.0,
            course: 0.0,
            accuracy: 0.0,
            battery: BatteryStatus::default(),
            mock: false,
        }
    }

    /// Sets the altitude in metres.
    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    /// Sets speed (knots) and course (degrees).
    pub fn with_motion(mut self, speed: f64, course: f64) -> Self {
        self.speed = speed;
        self.course = course;
        self
    }

    /// Sets the horizontal accuracy in metres.
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    /// Sets the battery state.
    pub fn with_battery(mut self, level: f64, charging: bool) -> Self {
        self.battery = BatteryStatus { level, charging };
        self
    }

    /// Returns true if latitude and longitude are finite numbers.
    pub fn has_finite_coordinates(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Returns true once a queue has assigned an id.
    pub fn is_persisted(&self) -> bool {
        self.id != 0
    }

    /// Encodes the position as CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if serialization fails.
    pub fn to_cbor(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::Codec(e.to_string()))?;
        Ok(buf)
    }

    /// Decodes a position from CBOR.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Codec`] if the bytes are not a valid position.
    pub fn from_cbor(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::Codec(e.to_string()))
    }
}
