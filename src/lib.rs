//! RunTrack - running activity tracker
//!
//! Records running activities from GPS, heart rate, power and cadence sensors,
//! fills in running power from a physics model when no power meter is present,
//! aggregates live metrics, and persists completed activities to SQLite.

pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use metrics::aggregator::MetricsAggregator;
pub use metrics::power::PowerEstimator;
pub use recording::service::{TrackerHandle, TrackerService};
pub use recording::tracker::ActivityStateMachine;
pub use recording::types::{ActivityRecord, TrackerError, TrackerState};
pub use sensors::fusion::{PowerFusion, SensorFusion};
pub use sensors::types::{GpsFix, SensorEvent, SensorReading};
pub use storage::database::Database;
pub use storage::store::ActivityStore;
