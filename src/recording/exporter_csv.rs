//! CSV export of activity readings and summaries.

use crate::metrics::aggregator::format_pace;
use crate::recording::types::{ActivityRecord, ExportError};
use crate::sensors::types::SensorReading;
use std::io::Write;

/// Export the reading stream to CSV.
pub fn export_csv(
    record: &ActivityRecord,
    readings: &[SensorReading],
) -> Result<String, ExportError> {
    if readings.is_empty() {
        return Err(ExportError::NoData);
    }

    let mut output = Vec::new();

    writeln!(
        output,
        "timestamp,elapsed_ms,source,heart_rate_bpm,power_watts,cadence_spm"
    )
    .map_err(|e| ExportError::WriteFailed(e.to_string()))?;

    for reading in readings {
        let elapsed_ms = (reading.timestamp() - record.started_at).num_milliseconds();
        writeln!(
            output,
            "{},{},{},{},{},{}",
            reading.timestamp().to_rfc3339(),
            elapsed_ms,
            reading.source().as_str(),
            opt(reading.heart_rate_bpm()),
            opt(reading.power_watts()),
            opt(reading.cadence_spm()),
        )
        .map_err(|e| ExportError::WriteFailed(e.to_string()))?;
    }

    String::from_utf8(output).map_err(|e| ExportError::WriteFailed(e.to_string()))
}

/// Export the activity summary as a single CSV row.
pub fn export_summary_csv(record: &ActivityRecord) -> Result<String, ExportError> {
    let mut output = Vec::new();

    writeln!(
        output,
        "id,name,started_at,ended_at,status,duration_seconds,distance_meters,elevation_gain_meters,elevation_loss_meters,avg_pace,avg_hr,max_hr,avg_power,max_power,avg_cadence,max_cadence"
    )
    .map_err(|e| ExportError::WriteFailed(e.to_string()))?;

    writeln!(
        output,
        "{},{},{},{},{},{},{:.1},{:.1},{:.1},{},{},{},{},{},{},{}",
        record.id,
        escape(&record.name),
        record.started_at.to_rfc3339(),
        record.ended_at.map_or(String::new(), |dt| dt.to_rfc3339()),
        record.status.as_str(),
        record.duration_seconds,
        record.distance_meters,
        record.elevation_gain_meters,
        record.elevation_loss_meters,
        record
            .avg_pace_seconds_per_km
            .map_or(String::new(), format_pace),
        opt(record.avg_heart_rate),
        opt(record.max_heart_rate),
        opt(record.avg_power),
        opt(record.max_power),
        opt(record.avg_cadence),
        opt(record.max_cadence),
    )
    .map_err(|e| ExportError::WriteFailed(e.to_string()))?;

    String::from_utf8(output).map_err(|e| ExportError::WriteFailed(e.to_string()))
}

/// Export readings to CSV and write to a file.
pub fn export_csv_to_file(
    record: &ActivityRecord,
    readings: &[SensorReading],
    path: &std::path::Path,
) -> Result<(), ExportError> {
    let content = export_csv(record, readings)?;
    std::fs::write(path, content).map_err(|e| ExportError::WriteFailed(e.to_string()))
}

fn opt(value: Option<u16>) -> String {
    value.map_or(String::new(), |v| v.to_string())
}

/// Quote a field if it contains separators or quotes.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
