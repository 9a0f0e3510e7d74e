//! Mock run generator for integration tests.
//!
//! Produces a steady run heading due north: one GPS fix and one sensor
//! reading per second.

use chrono::{DateTime, Duration, TimeZone, Utc};
use runtrack::sensors::{GpsFix, ReadingSource, SensorEvent, SensorReading};

/// Meters per degree of latitude on the haversine sphere.
const METERS_PER_DEGREE: f64 = 6_371_000.0 * std::f64::consts::PI / 180.0;

/// Start of every mock run.
pub fn run_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 6, 30, 0).unwrap()
}

/// Parameters of a steady mock run.
#[derive(Debug, Clone)]
pub struct MockRun {
    pub start: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    /// Meters of climb per second
    pub climb_rate: f64,
    pub speed_mps: f64,
    pub heart_rate: Option<u16>,
    pub cadence: Option<u16>,
    /// Set to simulate a footpod power meter
    pub power_meter_watts: Option<u16>,
}

impl Default for MockRun {
    fn default() -> Self {
        Self {
            start: run_start(),
            latitude: 47.3769,
            longitude: 8.5417,
            altitude_m: None,
            climb_rate: 0.0,
            // 5:00/km
            speed_mps: 1000.0 / 300.0,
            heart_rate: Some(150),
            cadence: Some(170),
            power_meter_watts: None,
        }
    }
}

impl MockRun {
    /// Time of the sample at `second`.
    pub fn time_at(&self, second: i64) -> DateTime<Utc> {
        self.start + Duration::seconds(second)
    }

    /// GPS fix at `second` after the start.
    pub fn fix_at(&self, second: i64) -> GpsFix {
        let meters = self.speed_mps * second as f64;
        let fix = GpsFix::new(
            self.time_at(second),
            self.latitude + meters / METERS_PER_DEGREE,
            self.longitude,
        )
        .with_accuracy(5.0);
        match self.altitude_m {
            Some(alt) => fix.with_altitude(alt + self.climb_rate * second as f64),
            None => fix,
        }
    }

    /// Sensor reading at `second` after the start.
    pub fn reading_at(&self, second: i64) -> SensorReading {
        let timestamp = self.time_at(second);
        match self.power_meter_watts {
            Some(watts) => SensorReading::power(timestamp, watts, self.cadence)
                .with_heart_rate(self.heart_rate),
            None => SensorReading::new(timestamp, ReadingSource::HeartRateMonitor)
                .with_heart_rate(self.heart_rate)
                .with_cadence(self.cadence),
        }
    }

    /// Fix then reading for every second in `from..=to`.
    pub fn events(&self, from: i64, to: i64) -> Vec<SensorEvent> {
        (from..=to)
            .flat_map(|s| {
                [
                    SensorEvent::Fix(self.fix_at(s)),
                    SensorEvent::Reading(self.reading_at(s)),
                ]
            })
            .collect()
    }
}

#[test]
fn test_mock_fix_spacing() {
    let run = MockRun::default();
    let a = run.fix_at(0);
    let b = run.fix_at(3);

    let d = runtrack::sensors::haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude);
    assert!((d - 10.0).abs() < 1e-3, "got {}", d);
}

#[test]
fn test_mock_events_interleave() {
    let events = MockRun::default().events(0, 4);
    assert_eq!(events.len(), 10);
    assert!(matches!(events[0], SensorEvent::Fix(_)));
    assert!(matches!(events[1], SensorEvent::Reading(_)));
}
