//! Sensor reading types for the tracking core.
//!
//! Drivers for GPS, heart-rate straps, footpods and power meters live outside
//! this crate. They hand over cleaned values in the shapes defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    /// GPS receiver
    Gps,
    /// Heart rate monitor (chest strap, optical)
    HeartRateMonitor,
    /// Dedicated running power meter
    PowerMeter,
    /// Power estimated and corrected with heart rate / cadence
    Fused,
    /// Power estimated from speed and elevation only
    Estimated,
}

impl ReadingSource {
    /// Fixed token used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingSource::Gps => "gps",
            ReadingSource::HeartRateMonitor => "heart_rate_monitor",
            ReadingSource::PowerMeter => "power_meter",
            ReadingSource::Fused => "fused",
            ReadingSource::Estimated => "estimated",
        }
    }
}

impl std::str::FromStr for ReadingSource {
    type Err = ReadingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(ReadingSource::Gps),
            "heart_rate_monitor" => Ok(ReadingSource::HeartRateMonitor),
            "power_meter" => Ok(ReadingSource::PowerMeter),
            "fused" => Ok(ReadingSource::Fused),
            "estimated" => Ok(ReadingSource::Estimated),
            other => Err(ReadingError::UnknownSource(other.to_string())),
        }
    }
}

impl std::fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadingSource::Gps => write!(f, "GPS"),
            ReadingSource::HeartRateMonitor => write!(f, "Heart Rate"),
            ReadingSource::PowerMeter => write!(f, "Power Meter"),
            ReadingSource::Fused => write!(f, "Fused"),
            ReadingSource::Estimated => write!(f, "Estimated"),
        }
    }
}

/// One timestamped multi-sensor sample.
///
/// Readings are immutable once built. Filling in a missing power value
/// produces a new reading through [`SensorReading::with_power`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    heart_rate_bpm: Option<u16>,
    power_watts: Option<u16>,
    cadence_spm: Option<u16>,
    source: ReadingSource,
}

impl SensorReading {
    /// Create a reading with no sensor values.
    pub fn new(timestamp: DateTime<Utc>, source: ReadingSource) -> Self {
        Self {
            timestamp,
            heart_rate_bpm: None,
            power_watts: None,
            cadence_spm: None,
            source,
        }
    }

    /// Heart rate only.
    pub fn heart_rate(timestamp: DateTime<Utc>, bpm: u16) -> Self {
        Self::new(timestamp, ReadingSource::HeartRateMonitor).with_heart_rate(Some(bpm))
    }

    /// Power (and usually cadence) from a power meter.
    pub fn power(timestamp: DateTime<Utc>, watts: u16, cadence: Option<u16>) -> Self {
        Self::new(timestamp, ReadingSource::PowerMeter)
            .with_power(Some(watts))
            .with_cadence(cadence)
    }

    pub fn with_heart_rate(mut self, bpm: Option<u16>) -> Self {
        self.heart_rate_bpm = bpm;
        self
    }

    pub fn with_power(mut self, watts: Option<u16>) -> Self {
        self.power_watts = watts;
        self
    }

    pub fn with_cadence(mut self, spm: Option<u16>) -> Self {
        self.cadence_spm = spm;
        self
    }

    pub fn with_source(mut self, source: ReadingSource) -> Self {
        self.source = source;
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn heart_rate_bpm(&self) -> Option<u16> {
        self.heart_rate_bpm
    }

    pub fn power_watts(&self) -> Option<u16> {
        self.power_watts
    }

    pub fn cadence_spm(&self) -> Option<u16> {
        self.cadence_spm
    }

    pub fn source(&self) -> ReadingSource {
        self.source
    }

    /// Whether this reading carries a usable (strictly positive) power value.
    pub fn has_valid_power(&self) -> bool {
        valid(self.power_watts).is_some()
    }

    /// Check the reading against physiological limits.
    pub fn validate(&self, limits: &ReadingLimits) -> Result<(), ReadingError> {
        if let Some(hr) = self.heart_rate_bpm {
            if hr > limits.max_heart_rate {
                return Err(ReadingError::OutOfRange {
                    field: "heart_rate",
                    value: hr as f64,
                });
            }
        }
        if let Some(power) = self.power_watts {
            if power > limits.max_power {
                return Err(ReadingError::OutOfRange {
                    field: "power",
                    value: power as f64,
                });
            }
        }
        if let Some(cadence) = self.cadence_spm {
            if cadence > limits.max_cadence {
                return Err(ReadingError::OutOfRange {
                    field: "cadence",
                    value: cadence as f64,
                });
            }
        }
        Ok(())
    }
}

/// Filter a field down to a valid value: present and strictly positive.
pub fn valid(value: Option<u16>) -> Option<u16> {
    value.filter(|v| *v > 0)
}

/// Upper bounds above which a reading is treated as sensor garbage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingLimits {
    pub max_heart_rate: u16,
    pub max_power: u16,
    pub max_cadence: u16,
}

impl Default for ReadingLimits {
    fn default() -> Self {
        Self {
            max_heart_rate: 250,
            max_power: 2500,
            max_cadence: 300,
        }
    }
}

/// A position sample from the GPS stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above sea level in meters
    pub altitude_m: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: Option<f64>,
}

impl GpsFix {
    pub fn new(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp,
            latitude,
            longitude,
            altitude_m: None,
            accuracy_m: None,
        }
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    /// Reject coordinates that cannot be a position on Earth.
    pub fn validate(&self) -> Result<(), ReadingError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ReadingError::OutOfRange {
                field: "latitude",
                value: self.latitude,
            });
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ReadingError::OutOfRange {
                field: "longitude",
                value: self.longitude,
            });
        }
        if let Some(alt) = self.altitude_m {
            if !alt.is_finite() {
                return Err(ReadingError::OutOfRange {
                    field: "altitude",
                    value: alt,
                });
            }
        }
        Ok(())
    }
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS: f64 = 6_371_000.0; // meters

    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS * c
}

/// Events pushed by the sensor streams into the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SensorEvent {
    /// Heart rate / power / cadence sample
    Reading(SensorReading),
    /// GPS position
    Fix(GpsFix),
}

/// Errors for malformed sensor input.
#[derive(Debug, Error, PartialEq)]
pub enum ReadingError {
    /// A value is outside its plausible range
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    /// GPS fix does not advance in time
    #[error("Fix timestamp does not advance past the previous fix")]
    NonMonotonicFix,

    /// GPS fix too inaccurate to use
    #[error("Fix accuracy {0:.1} m exceeds limit")]
    Inaccurate(f64),

    /// Unknown source token in stored data
    #[error("Unknown reading source: {0}")]
    UnknownSource(String),
}
