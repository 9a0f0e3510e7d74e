//! Activity record types, tracker state and errors.

use crate::metrics::aggregator::MetricsSummary;
use crate::metrics::error::MetricsError;
use crate::sensors::types::{ReadingError, ReadingLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    /// No activity
    #[default]
    Idle,
    /// Actively tracking
    Tracking,
    /// Tracking paused
    Paused,
    /// Activity finished
    Completed,
}

impl std::fmt::Display for TrackerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackerState::Idle => write!(f, "Idle"),
            TrackerState::Tracking => write!(f, "Tracking"),
            TrackerState::Paused => write!(f, "Paused"),
            TrackerState::Completed => write!(f, "Completed"),
        }
    }
}

/// Persisted status of an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    InProgress,
    Paused,
    Completed,
}

impl ActivityStatus {
    /// Fixed token used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::InProgress => "in_progress",
            ActivityStatus::Paused => "paused",
            ActivityStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for ActivityStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(ActivityStatus::InProgress),
            "paused" => Ok(ActivityStatus::Paused),
            "completed" => Ok(ActivityStatus::Completed),
            other => Err(format!("Unknown activity status: {}", other)),
        }
    }
}

/// A point on the recorded route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
}

impl RoutePoint {
    /// Whether the point describes a real position.
    pub fn is_valid(&self) -> bool {
        self.timestamp_ms >= 0
            && self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
            && self.altitude_m.map_or(true, f64::is_finite)
    }
}

/// A tracked running activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Unique identifier
    pub id: Uuid,
    /// User-editable name
    pub name: String,
    /// Start timestamp
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    /// End timestamp
    #[serde(with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Active time in whole seconds
    pub duration_seconds: u32,
    /// Total distance in meters
    pub distance_meters: f64,
    /// Cumulative climb in meters
    pub elevation_gain_meters: f64,
    /// Cumulative descent in meters
    pub elevation_loss_meters: f64,
    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub avg_power: Option<u16>,
    pub max_power: Option<u16>,
    pub avg_cadence: Option<u16>,
    pub max_cadence: Option<u16>,
    /// Average pace in seconds per kilometer
    pub avg_pace_seconds_per_km: Option<u32>,
    /// Recorded route
    pub route: Vec<RoutePoint>,
    pub status: ActivityStatus,
    /// User notes
    pub notes: Option<String>,
}

impl ActivityRecord {
    /// Create a new in-progress activity starting at the given time.
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: default_name(started_at),
            started_at,
            ended_at: None,
            duration_seconds: 0,
            distance_meters: 0.0,
            elevation_gain_meters: 0.0,
            elevation_loss_meters: 0.0,
            avg_heart_rate: None,
            max_heart_rate: None,
            avg_power: None,
            max_power: None,
            avg_cadence: None,
            max_cadence: None,
            avg_pace_seconds_per_km: None,
            route: Vec::new(),
            status: ActivityStatus::InProgress,
            notes: None,
        }
    }

    /// Copy aggregated statistics onto the record.
    pub fn apply_summary(&mut self, summary: &MetricsSummary) {
        self.duration_seconds = summary.duration_seconds;
        self.distance_meters = summary.distance_meters;
        self.elevation_gain_meters = summary.elevation_gain_meters;
        self.elevation_loss_meters = summary.elevation_loss_meters;
        self.avg_heart_rate = summary.avg_heart_rate;
        self.max_heart_rate = summary.max_heart_rate;
        self.avg_power = summary.avg_power;
        self.max_power = summary.max_power;
        self.avg_cadence = summary.avg_cadence;
        self.max_cadence = summary.max_cadence;
        self.avg_pace_seconds_per_km = summary.avg_pace_seconds_per_km;
    }

    /// Row shown in history listings.
    pub fn summary(&self) -> ActivitySummary {
        ActivitySummary {
            id: self.id,
            name: self.name.clone(),
            started_at: self.started_at,
            status: self.status,
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            avg_pace_seconds_per_km: self.avg_pace_seconds_per_km,
        }
    }
}

/// Default activity name derived from the start time.
pub fn default_name(started_at: DateTime<Utc>) -> String {
    format!("Run {}", started_at.format("%Y-%m-%d %H:%M"))
}

/// History listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    pub status: ActivityStatus,
    pub duration_seconds: u32,
    pub distance_meters: f64,
    pub avg_pace_seconds_per_km: Option<u32>,
}

/// A state transition, delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: TrackerState,
    pub to: TrackerState,
    pub activity_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

/// Receives tracker state transitions.
pub trait StateObserver: Send + Sync {
    fn on_state_change(&self, change: &StateChange);
}

/// Configuration for the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Live refresh interval in milliseconds
    pub tick_interval_ms: u64,
    /// Checkpoint interval in seconds (0 disables checkpoints)
    pub checkpoint_interval_secs: u32,
    /// Maximum heart rate before a reading is treated as noise
    pub max_heart_rate: u16,
    /// Maximum power before a reading is treated as noise
    pub max_power: u16,
    /// Maximum cadence before a reading is treated as noise
    pub max_cadence: u16,
    /// GPS fixes with a worse accuracy radius are dropped
    pub max_gps_accuracy_m: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let limits = ReadingLimits::default();
        Self {
            tick_interval_ms: 1000,
            checkpoint_interval_secs: 30,
            max_heart_rate: limits.max_heart_rate,
            max_power: limits.max_power,
            max_cadence: limits.max_cadence,
            max_gps_accuracy_m: 50.0,
        }
    }
}

impl TrackerConfig {
    pub fn reading_limits(&self) -> ReadingLimits {
        ReadingLimits {
            max_heart_rate: self.max_heart_rate,
            max_power: self.max_power,
            max_cadence: self.max_cadence,
        }
    }
}

/// Live metrics for display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveMetrics {
    pub state: TrackerState,
    pub activity_id: Option<Uuid>,
    pub duration_seconds: u32,
    pub distance_meters: f64,
    pub elevation_gain_meters: f64,
    pub elevation_loss_meters: f64,
    pub avg_pace_seconds_per_km: Option<u32>,
    pub current_heart_rate: Option<u16>,
    pub current_power: Option<u16>,
    pub current_cadence: Option<u16>,
    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub avg_power: Option<u16>,
    pub max_power: Option<u16>,
    pub avg_cadence: Option<u16>,
    pub max_cadence: Option<u16>,
    /// Whether the current power value is estimated rather than measured
    pub power_estimated: bool,
}

/// Errors from the activity tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Lifecycle call not allowed in the current state
    #[error("Cannot {action} while {from}")]
    InvalidStateTransition {
        from: TrackerState,
        action: &'static str,
    },

    /// Sensor input arrived while not tracking
    #[error("Not currently tracking")]
    NotTracking,

    /// Malformed reading or estimator input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage collaborator failed; the record is kept for retry
    #[error("Failed to persist activity: {0}")]
    PersistenceFailure(String),

    /// No activity record exists
    #[error("No activity")]
    NoActivity,

    /// The background tracker task is no longer running
    #[error("Tracker service stopped")]
    ServiceStopped,
}

impl From<ReadingError> for TrackerError {
    fn from(err: ReadingError) -> Self {
        TrackerError::InvalidInput(err.to_string())
    }
}

impl From<MetricsError> for TrackerError {
    fn from(err: MetricsError) -> Self {
        TrackerError::InvalidInput(err.to_string())
    }
}

/// Export format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// TCX format (XML, Strava/Garmin compatible)
    Tcx,
    /// CSV format (spreadsheet compatible)
    Csv,
    /// JSON document
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Tcx => "tcx",
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Tcx => write!(f, "TCX"),
            ExportFormat::Csv => write!(f, "CSV"),
            ExportFormat::Json => write!(f, "JSON"),
        }
    }
}

/// Errors during activity export.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No readings or route to export
    #[error("Activity has no data to export")]
    NoData,

    /// Failed to write export data
    #[error("Failed to write data: {0}")]
    WriteFailed(String),

    /// XML generation error
    #[error("XML error: {0}")]
    XmlError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}
