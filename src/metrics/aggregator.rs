//! Incremental metrics aggregation for a running activity.
//!
//! Every reading and GPS delta is folded in with O(1) work. Summary statistics
//! are computed on demand from the running sums, so live display refreshes and
//! the final summary share the same code path.

use crate::sensors::types::{valid, SensorReading};
use serde::{Deserialize, Serialize};

/// Pace plausibility bounds and other aggregation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Paces at or below this value (s/km) are discarded
    pub pace_min_exclusive: u32,
    /// Paces at or above this value (s/km) are discarded
    pub pace_max_exclusive: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            pace_min_exclusive: 0,
            pace_max_exclusive: 1200,
        }
    }
}

/// Running sum, count and maximum of one sensor channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    sum: u64,
    count: u64,
    max: Option<u16>,
}

impl ChannelStats {
    /// Fold in a value. Missing and zero values are ignored.
    pub fn observe(&mut self, value: Option<u16>) {
        if let Some(v) = valid(value) {
            self.sum += v as u64;
            self.count += 1;
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    /// Rounded mean of the valid values, `None` if there were none.
    ///
    /// Ties round half away from zero. All values are positive, so the
    /// integer form `(2·sum + count) / (2·count)` is exact.
    pub fn average(&self) -> Option<u16> {
        if self.count == 0 {
            return None;
        }
        let mean = (2 * self.sum + self.count) / (2 * self.count);
        Some(mean.min(u16::MAX as u64) as u16)
    }

    pub fn max(&self) -> Option<u16> {
        self.max
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

/// Summary statistics derived from the aggregator state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub duration_seconds: u32,
    pub distance_meters: f64,
    pub elevation_gain_meters: f64,
    pub elevation_loss_meters: f64,
    pub avg_heart_rate: Option<u16>,
    pub max_heart_rate: Option<u16>,
    pub avg_power: Option<u16>,
    pub max_power: Option<u16>,
    pub avg_cadence: Option<u16>,
    pub max_cadence: Option<u16>,
    /// Average pace in seconds per kilometer
    pub avg_pace_seconds_per_km: Option<u32>,
}

/// Incrementally maintains running sums, maxima and accumulators.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    config: AggregatorConfig,
    heart_rate: ChannelStats,
    power: ChannelStats,
    cadence: ChannelStats,
    distance_meters: f64,
    elevation_gain_meters: f64,
    elevation_loss_meters: f64,
    duration_seconds: u32,
}

impl MetricsAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Fold a sensor reading into the heart rate, power and cadence channels.
    pub fn ingest_reading(&mut self, reading: &SensorReading) {
        self.heart_rate.observe(reading.heart_rate_bpm());
        self.power.observe(reading.power_watts());
        self.cadence.observe(reading.cadence_spm());
    }

    /// Fold a GPS movement into distance and elevation.
    ///
    /// Negative or non-finite distance is treated as noise and clamped to
    /// zero. Positive altitude change counts as gain, negative as loss.
    pub fn ingest_gps_delta(&mut self, distance_delta_m: f64, altitude_delta_m: f64) {
        if distance_delta_m.is_finite() && distance_delta_m > 0.0 {
            self.distance_meters += distance_delta_m;
        }
        if altitude_delta_m.is_finite() {
            if altitude_delta_m > 0.0 {
                self.elevation_gain_meters += altitude_delta_m;
            } else if altitude_delta_m < 0.0 {
                self.elevation_loss_meters += -altitude_delta_m;
            }
        }
    }

    /// Move the active duration forward. Never moves backwards.
    pub fn advance_duration(&mut self, duration_seconds: u32) {
        self.duration_seconds = self.duration_seconds.max(duration_seconds);
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn heart_rate(&self) -> &ChannelStats {
        &self.heart_rate
    }

    pub fn power(&self) -> &ChannelStats {
        &self.power
    }

    pub fn cadence(&self) -> &ChannelStats {
        &self.cadence
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Compute averages and pace from the current state.
    ///
    /// Pure with respect to the aggregator: calling it repeatedly without new
    /// input returns identical summaries.
    pub fn finalize_averages(&self) -> MetricsSummary {
        MetricsSummary {
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            elevation_gain_meters: self.elevation_gain_meters,
            elevation_loss_meters: self.elevation_loss_meters,
            avg_heart_rate: self.heart_rate.average(),
            max_heart_rate: self.heart_rate.max(),
            avg_power: self.power.average(),
            max_power: self.power.max(),
            avg_cadence: self.cadence.average(),
            max_cadence: self.cadence.max(),
            avg_pace_seconds_per_km: average_pace(
                self.duration_seconds,
                self.distance_meters,
                &self.config,
            ),
        }
    }

    /// Reset all state for a new activity.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }

    /// Rebuild state from a saved activity.
    ///
    /// Distance and elevation cannot be recomputed from readings, so they are
    /// taken as given; the channel statistics are folded again from readings.
    pub fn restore(
        &mut self,
        duration_seconds: u32,
        distance_meters: f64,
        elevation_gain_meters: f64,
        elevation_loss_meters: f64,
        readings: &[SensorReading],
    ) {
        self.reset();
        self.duration_seconds = duration_seconds;
        self.ingest_gps_delta(distance_meters, 0.0);
        if elevation_gain_meters.is_finite() && elevation_gain_meters > 0.0 {
            self.elevation_gain_meters = elevation_gain_meters;
        }
        if elevation_loss_meters.is_finite() && elevation_loss_meters > 0.0 {
            self.elevation_loss_meters = elevation_loss_meters;
        }
        for reading in readings {
            self.ingest_reading(reading);
        }
    }
}

/// Average pace in whole seconds per kilometer, if plausible.
pub fn average_pace(
    duration_seconds: u32,
    distance_meters: f64,
    config: &AggregatorConfig,
) -> Option<u32> {
    if duration_seconds == 0 || !distance_meters.is_finite() || distance_meters <= 0.0 {
        return None;
    }
    let pace = (duration_seconds as f64 / (distance_meters / 1000.0)).round();
    if pace > config.pace_min_exclusive as f64 && pace < config.pace_max_exclusive as f64 {
        Some(pace as u32)
    } else {
        None
    }
}

/// Format a pace as `MM:SS`.
pub fn format_pace(seconds_per_km: u32) -> String {
    format!("{:02}:{:02}", seconds_per_km / 60, seconds_per_km % 60)
}
