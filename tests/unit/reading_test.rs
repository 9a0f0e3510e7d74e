//! Unit tests for sensor readings, GPS fixes and the event wire shape.

use chrono::{DateTime, TimeZone, Utc};
use runtrack::sensors::{
    haversine_distance, GpsFix, ReadingError, ReadingLimits, ReadingSource, SensorEvent,
    SensorReading,
};

fn t0() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_720_000_000_000).unwrap()
}

#[test]
fn test_builder_sets_fields() {
    let reading = SensorReading::new(t0(), ReadingSource::Fused)
        .with_heart_rate(Some(151))
        .with_power(Some(262))
        .with_cadence(Some(176));

    assert_eq!(reading.timestamp(), t0());
    assert_eq!(reading.heart_rate_bpm(), Some(151));
    assert_eq!(reading.power_watts(), Some(262));
    assert_eq!(reading.cadence_spm(), Some(176));
    assert_eq!(reading.source(), ReadingSource::Fused);
}

#[test]
fn test_zero_power_is_not_valid() {
    assert!(!SensorReading::power(t0(), 0, None).has_valid_power());
    assert!(SensorReading::power(t0(), 1, None).has_valid_power());
    assert!(!SensorReading::heart_rate(t0(), 140).has_valid_power());
}

#[test]
fn test_validation_limits() {
    let limits = ReadingLimits::default();

    assert!(SensorReading::heart_rate(t0(), 250).validate(&limits).is_ok());
    assert!(matches!(
        SensorReading::heart_rate(t0(), 251).validate(&limits),
        Err(ReadingError::OutOfRange { field: "heart_rate", .. })
    ));
    assert!(SensorReading::power(t0(), 2600, None)
        .validate(&limits)
        .is_err());
    assert!(SensorReading::power(t0(), 300, Some(400))
        .validate(&limits)
        .is_err());
}

#[test]
fn test_custom_limits() {
    let limits = ReadingLimits {
        max_heart_rate: 200,
        ..Default::default()
    };
    assert!(SensorReading::heart_rate(t0(), 210).validate(&limits).is_err());
}

#[test]
fn test_fix_validation() {
    assert!(GpsFix::new(t0(), 47.37, 8.54).validate().is_ok());
    assert!(GpsFix::new(t0(), 91.0, 8.54).validate().is_err());
    assert!(GpsFix::new(t0(), 47.37, -181.0).validate().is_err());
    assert!(GpsFix::new(t0(), f64::NAN, 8.54).validate().is_err());
    assert!(GpsFix::new(t0(), 47.37, 8.54)
        .with_altitude(f64::INFINITY)
        .validate()
        .is_err());
}

#[test]
fn test_haversine_known_distance() {
    // One degree of latitude is about 111.2 km
    let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
    assert!((d - 111_195.0).abs() < 10.0, "got {}", d);

    assert_eq!(haversine_distance(47.0, 8.0, 47.0, 8.0), 0.0);
}

#[test]
fn test_haversine_symmetric() {
    let a = haversine_distance(47.3769, 8.5417, 46.9480, 7.4474);
    let b = haversine_distance(46.9480, 7.4474, 47.3769, 8.5417);
    assert!((a - b).abs() < 1e-6);
}

#[test]
fn test_event_json_shape() {
    let event = SensorEvent::Reading(SensorReading::heart_rate(t0(), 148));
    let value = serde_json::to_value(&event).unwrap();

    assert_eq!(value["kind"], "reading");
    assert_eq!(value["timestamp"], 1_720_000_000_000i64);
    assert_eq!(value["heart_rate_bpm"], 148);
    assert_eq!(value["source"], "heart_rate_monitor");
}

#[test]
fn test_event_parses_from_log_line() {
    let line = r#"{"kind":"fix","timestamp":1720000000000,"latitude":47.1,"longitude":8.2,"altitude_m":410.0}"#;
    let event: SensorEvent = serde_json::from_str(line).unwrap();

    match event {
        SensorEvent::Fix(fix) => {
            assert_eq!(fix.timestamp, t0());
            assert_eq!(fix.altitude_m, Some(410.0));
            assert_eq!(fix.accuracy_m, None);
        }
        other => panic!("expected fix, got {:?}", other),
    }

    let line = r#"{"kind":"reading","timestamp":1720000000000,"cadence_spm":172,"source":"power_meter"}"#;
    let event: SensorEvent = serde_json::from_str(line).unwrap();
    assert!(matches!(event, SensorEvent::Reading(r) if r.cadence_spm() == Some(172)));
}

#[test]
fn test_source_tokens() {
    assert_eq!(ReadingSource::HeartRateMonitor.as_str(), "heart_rate_monitor");
    assert_eq!("estimated".parse::<ReadingSource>(), Ok(ReadingSource::Estimated));
    assert_eq!(
        "ant".parse::<ReadingSource>(),
        Err(ReadingError::UnknownSource("ant".to_string()))
    );
}
