//! TCX export of running activities.
//!
//! Route points and sensor readings are merged into trackpoints by
//! timestamp. Power and run cadence go into the ActivityExtension (TPX).

use crate::recording::types::{ActivityRecord, ExportError};
use crate::sensors::types::{valid, SensorReading};
use chrono::DateTime;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::BTreeMap;
use std::io::Cursor;

/// TCX XML namespaces
const NS_TCX: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";
const NS_TPX: &str = "http://www.garmin.com/xmlschemas/ActivityExtension/v2";
const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
const SCHEMA_LOCATION: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2 http://www.garmin.com/xmlschemas/TrainingCenterDatabasev2.xsd";

/// One merged trackpoint.
#[derive(Debug, Default, Clone, Copy)]
struct TrackSample {
    position: Option<(f64, f64)>,
    altitude_m: Option<f64>,
    heart_rate: Option<u16>,
    cadence: Option<u16>,
    power: Option<u16>,
}

/// Export an activity to TCX format.
pub fn export_tcx(
    record: &ActivityRecord,
    readings: &[SensorReading],
) -> Result<String, ExportError> {
    if readings.is_empty() && record.route.is_empty() {
        return Err(ExportError::NoData);
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    let mut root = BytesStart::new("TrainingCenterDatabase");
    root.push_attribute(("xmlns", NS_TCX));
    root.push_attribute(("xmlns:ns3", NS_TPX));
    root.push_attribute(("xmlns:xsi", NS_XSI));
    root.push_attribute(("xsi:schemaLocation", SCHEMA_LOCATION));
    writer
        .write_event(Event::Start(root))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    writer
        .write_event(Event::Start(BytesStart::new("Activities")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    let mut activity = BytesStart::new("Activity");
    activity.push_attribute(("Sport", "Running"));
    writer
        .write_event(Event::Start(activity))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    write_element(&mut writer, "Id", &record.started_at.to_rfc3339())?;

    write_lap(&mut writer, record, &merge_samples(record, readings))?;

    if let Some(notes) = &record.notes {
        write_element(&mut writer, "Notes", notes)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Activity")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    writer
        .write_event(Event::End(BytesEnd::new("Activities")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    writer
        .write_event(Event::End(BytesEnd::new("TrainingCenterDatabase")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    let result = writer.into_inner().into_inner();
    String::from_utf8(result).map_err(|e| ExportError::XmlError(e.to_string()))
}

/// Merge route points and readings into trackpoints keyed by epoch millis.
fn merge_samples(
    record: &ActivityRecord,
    readings: &[SensorReading],
) -> BTreeMap<i64, TrackSample> {
    let mut samples: BTreeMap<i64, TrackSample> = BTreeMap::new();

    for point in &record.route {
        let sample = samples.entry(point.timestamp_ms).or_default();
        sample.position = Some((point.latitude, point.longitude));
        sample.altitude_m = point.altitude_m;
    }

    for reading in readings {
        let sample = samples
            .entry(reading.timestamp().timestamp_millis())
            .or_default();
        if let Some(hr) = valid(reading.heart_rate_bpm()) {
            sample.heart_rate = Some(hr);
        }
        if let Some(cadence) = valid(reading.cadence_spm()) {
            sample.cadence = Some(cadence);
        }
        if let Some(power) = valid(reading.power_watts()) {
            sample.power = Some(power);
        }
    }

    samples
}

/// Write the single lap covering the activity.
fn write_lap<W: std::io::Write>(
    writer: &mut Writer<W>,
    record: &ActivityRecord,
    samples: &BTreeMap<i64, TrackSample>,
) -> Result<(), ExportError> {
    let mut lap = BytesStart::new("Lap");
    lap.push_attribute(("StartTime", record.started_at.to_rfc3339().as_str()));
    writer
        .write_event(Event::Start(lap))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    write_element(
        writer,
        "TotalTimeSeconds",
        &record.duration_seconds.to_string(),
    )?;
    write_element(
        writer,
        "DistanceMeters",
        &format!("{:.1}", record.distance_meters),
    )?;
    // Required by the schema; not tracked
    write_element(writer, "Calories", "0")?;

    if let Some(avg_hr) = record.avg_heart_rate {
        write_heart_rate_element(writer, "AverageHeartRateBpm", avg_hr)?;
    }
    if let Some(max_hr) = record.max_heart_rate {
        write_heart_rate_element(writer, "MaximumHeartRateBpm", max_hr)?;
    }

    write_element(writer, "Intensity", "Active")?;
    write_element(writer, "TriggerMethod", "Manual")?;

    write_track(writer, samples)?;
    write_lap_extensions(writer, record)?;

    writer
        .write_event(Event::End(BytesEnd::new("Lap")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

fn write_track<W: std::io::Write>(
    writer: &mut Writer<W>,
    samples: &BTreeMap<i64, TrackSample>,
) -> Result<(), ExportError> {
    writer
        .write_event(Event::Start(BytesStart::new("Track")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    for (timestamp_ms, sample) in samples {
        write_trackpoint(writer, *timestamp_ms, sample)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("Track")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

fn write_trackpoint<W: std::io::Write>(
    writer: &mut Writer<W>,
    timestamp_ms: i64,
    sample: &TrackSample,
) -> Result<(), ExportError> {
    let time = DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| ExportError::WriteFailed(format!("Invalid timestamp {}", timestamp_ms)))?;

    writer
        .write_event(Event::Start(BytesStart::new("Trackpoint")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    write_element(writer, "Time", &time.to_rfc3339())?;

    if let Some((lat, lon)) = sample.position {
        writer
            .write_event(Event::Start(BytesStart::new("Position")))
            .map_err(|e| ExportError::XmlError(e.to_string()))?;
        write_element(writer, "LatitudeDegrees", &format!("{:.7}", lat))?;
        write_element(writer, "LongitudeDegrees", &format!("{:.7}", lon))?;
        writer
            .write_event(Event::End(BytesEnd::new("Position")))
            .map_err(|e| ExportError::XmlError(e.to_string()))?;
    }

    if let Some(altitude) = sample.altitude_m {
        write_element(writer, "AltitudeMeters", &format!("{:.1}", altitude))?;
    }

    if let Some(hr) = sample.heart_rate {
        write_heart_rate_element(writer, "HeartRateBpm", hr)?;
    }

    write_trackpoint_extensions(writer, sample)?;

    writer
        .write_event(Event::End(BytesEnd::new("Trackpoint")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

/// Write trackpoint extensions (power and run cadence).
fn write_trackpoint_extensions<W: std::io::Write>(
    writer: &mut Writer<W>,
    sample: &TrackSample,
) -> Result<(), ExportError> {
    if sample.power.is_none() && sample.cadence.is_none() {
        return Ok(());
    }

    writer
        .write_event(Event::Start(BytesStart::new("Extensions")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    writer
        .write_event(Event::Start(BytesStart::new("ns3:TPX")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    if let Some(cadence) = sample.cadence {
        write_element(writer, "ns3:RunCadence", &cadence.to_string())?;
    }
    if let Some(power) = sample.power {
        write_element(writer, "ns3:Watts", &power.to_string())?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("ns3:TPX")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new("Extensions")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

/// Write lap extensions (cadence and power summaries).
fn write_lap_extensions<W: std::io::Write>(
    writer: &mut Writer<W>,
    record: &ActivityRecord,
) -> Result<(), ExportError> {
    let values = [
        ("ns3:AvgRunCadence", record.avg_cadence),
        ("ns3:MaxRunCadence", record.max_cadence),
        ("ns3:AvgWatts", record.avg_power),
        ("ns3:MaxWatts", record.max_power),
    ];
    if values.iter().all(|(_, v)| v.is_none()) {
        return Ok(());
    }

    writer
        .write_event(Event::Start(BytesStart::new("Extensions")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    writer
        .write_event(Event::Start(BytesStart::new("ns3:LX")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    for (name, value) in values {
        if let Some(value) = value {
            write_element(writer, name, &value.to_string())?;
        }
    }

    writer
        .write_event(Event::End(BytesEnd::new("ns3:LX")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;
    writer
        .write_event(Event::End(BytesEnd::new("Extensions")))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

/// Write a simple element with text content.
fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), ExportError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

/// Write a heart rate element with Value sub-element.
fn write_heart_rate_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: u16,
) -> Result<(), ExportError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    write_element(writer, "Value", &value.to_string())?;

    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(|e| ExportError::XmlError(e.to_string()))?;

    Ok(())
}

/// Export an activity to TCX and write to a file.
pub fn export_tcx_to_file(
    record: &ActivityRecord,
    readings: &[SensorReading],
    path: &std::path::Path,
) -> Result<(), ExportError> {
    let content = export_tcx(record, readings)?;
    std::fs::write(path, content).map_err(|e| ExportError::WriteFailed(e.to_string()))
}
