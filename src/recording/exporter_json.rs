//! JSON export of a complete activity.

use crate::metrics::aggregator::format_pace;
use crate::recording::types::{ActivityRecord, ExportError};
use crate::sensors::types::SensorReading;
use serde::{Deserialize, Serialize};

/// Version of the exported document layout.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ExportDocument<'a> {
    export_version: u32,
    /// Pace as `MM:SS` for readers that do not want to format it themselves
    avg_pace: Option<String>,
    activity: &'a ActivityRecord,
    readings: &'a [SensorReading],
}

#[derive(Deserialize)]
struct ImportDocument {
    export_version: u32,
    activity: ActivityRecord,
    #[serde(default)]
    readings: Vec<SensorReading>,
}

/// Export an activity and its readings as pretty-printed JSON.
pub fn export_json(
    record: &ActivityRecord,
    readings: &[SensorReading],
) -> Result<String, ExportError> {
    let document = ExportDocument {
        export_version: EXPORT_VERSION,
        avg_pace: record.avg_pace_seconds_per_km.map(format_pace),
        activity: record,
        readings,
    };

    serde_json::to_string_pretty(&document)
        .map_err(|e| ExportError::SerializationError(e.to_string()))
}

/// Read back a document written by [`export_json`].
pub fn import_json(content: &str) -> Result<(ActivityRecord, Vec<SensorReading>), ExportError> {
    let document: ImportDocument = serde_json::from_str(content)
        .map_err(|e| ExportError::SerializationError(e.to_string()))?;

    if document.export_version > EXPORT_VERSION {
        return Err(ExportError::SerializationError(format!(
            "Unsupported export version {}",
            document.export_version
        )));
    }

    Ok((document.activity, document.readings))
}

/// Export an activity to JSON and write to a file.
pub fn export_json_to_file(
    record: &ActivityRecord,
    readings: &[SensorReading],
    path: &std::path::Path,
) -> Result<(), ExportError> {
    let content = export_json(record, readings)?;
    std::fs::write(path, content).map_err(|e| ExportError::WriteFailed(e.to_string()))
}
