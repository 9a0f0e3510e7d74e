//! Sensor input types and power fusion.

pub mod fusion;
pub mod types;

pub use fusion::{FusionDiagnostics, FusionMode, PowerFusion, PowerFusionConfig, SensorFusion};
pub use types::{
    haversine_distance, GpsFix, ReadingError, ReadingLimits, ReadingSource, SensorEvent,
    SensorReading,
};
