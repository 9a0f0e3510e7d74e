//! Database operations using rusqlite.

use crate::recording::route_codec::{decode_route, encode_route};
use crate::recording::types::{ActivityRecord, ActivityStatus, ActivitySummary};
use crate::sensors::types::{ReadingSource, SensorReading};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::storage::store::{ActivityStore, Checkpoint};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqliteResult};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

const ACTIVITY_COLUMNS: &str = "id, name, started_at, ended_at, duration_seconds, distance_meters,
    elevation_gain_meters, elevation_loss_meters, avg_heart_rate, max_heart_rate, avg_power,
    max_power, avg_cadence, max_cadence, avg_pace_seconds_per_km, route, status, notes";

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        // Create schema version table
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Delete an activity and its readings.
    pub fn delete_activity(&self, id: &Uuid) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM activities WHERE id = ?1",
                params![id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(deleted > 0)
    }

    /// Check if checkpoint data exists.
    pub fn has_checkpoint(&self) -> Result<bool, DatabaseError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM checkpoint", [], |row| row.get(0))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(count > 0)
    }
}

impl ActivityStore for Database {
    fn save(&mut self, record: &ActivityRecord) -> Result<(), DatabaseError> {
        upsert_activity(&self.conn, record)
    }

    fn save_readings(
        &mut self,
        activity_id: &Uuid,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        replace_readings(&tx, activity_id, readings)?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    /// Activity row and readings are written in one transaction.
    fn save_activity(
        &mut self,
        record: &ActivityRecord,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        upsert_activity(&tx, record)?;
        replace_readings(&tx, &record.id, readings)?;

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    fn load(&self, activity_id: &Uuid) -> Result<Option<ActivityRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM activities WHERE id = ?1",
                ACTIVITY_COLUMNS
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let result = stmt.query_row(params![activity_id.to_string()], ActivityRow::from_row);

        match result {
            Ok(row) => Ok(Some(row.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    fn list_all(&self) -> Result<Vec<ActivitySummary>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, started_at, status, duration_seconds, distance_meters,
                 avg_pace_seconds_per_km
                 FROM activities ORDER BY started_at DESC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SummaryRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    started_at: row.get(2)?,
                    status: row.get(3)?,
                    duration_seconds: row.get(4)?,
                    distance_meters: row.get(5)?,
                    avg_pace_seconds_per_km: row.get(6)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut summaries = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            summaries.push(row.into_summary()?);
        }

        Ok(summaries)
    }

    fn load_readings(&self, activity_id: &Uuid) -> Result<Vec<SensorReading>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT timestamp_ms, heart_rate_bpm, power_watts, cadence_spm, source
                 FROM readings WHERE activity_id = ?1 ORDER BY seq",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![activity_id.to_string()], |row| {
                Ok(ReadingRow {
                    timestamp_ms: row.get(0)?,
                    heart_rate_bpm: row.get(1)?,
                    power_watts: row.get(2)?,
                    cadence_spm: row.get(3)?,
                    source: row.get(4)?,
                })
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut readings = Vec::new();
        for row in rows {
            let row = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            readings.push(row.into_reading()?);
        }

        Ok(readings)
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        let record_json = serde_json::to_string(&checkpoint.record)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;
        let readings_json = serde_json::to_string(&checkpoint.readings)
            .map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO checkpoint (id, record_json, readings_json, saved_at)
                 VALUES (1, ?1, ?2, ?3)",
                params![
                    record_json,
                    readings_json,
                    checkpoint.saved_at.timestamp_millis()
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, DatabaseError> {
        let result: Result<(String, String, i64), _> = self.conn.query_row(
            "SELECT record_json, readings_json, saved_at FROM checkpoint WHERE id = 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        );

        match result {
            Ok((record_json, readings_json, saved_at)) => {
                let record: ActivityRecord = serde_json::from_str(&record_json)
                    .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
                let readings: Vec<SensorReading> = serde_json::from_str(&readings_json)
                    .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;
                Ok(Some(Checkpoint {
                    record,
                    readings,
                    saved_at: millis_to_datetime(saved_at, "checkpoint time")?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    fn clear_checkpoint(&mut self) -> Result<(), DatabaseError> {
        self.conn
            .execute("DELETE FROM checkpoint", [])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}

/// Insert or update one activity row.
fn upsert_activity(conn: &Connection, record: &ActivityRecord) -> Result<(), DatabaseError> {
    let route =
        encode_route(&record.route).map_err(|e| DatabaseError::SerializationError(e.to_string()))?;

    conn.execute(
        "INSERT INTO activities (id, name, started_at, ended_at, duration_seconds,
         distance_meters, elevation_gain_meters, elevation_loss_meters, avg_heart_rate,
         max_heart_rate, avg_power, max_power, avg_cadence, max_cadence,
         avg_pace_seconds_per_km, route, status, notes, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            ended_at = excluded.ended_at,
            duration_seconds = excluded.duration_seconds,
            distance_meters = excluded.distance_meters,
            elevation_gain_meters = excluded.elevation_gain_meters,
            elevation_loss_meters = excluded.elevation_loss_meters,
            avg_heart_rate = excluded.avg_heart_rate,
            max_heart_rate = excluded.max_heart_rate,
            avg_power = excluded.avg_power,
            max_power = excluded.max_power,
            avg_cadence = excluded.avg_cadence,
            max_cadence = excluded.max_cadence,
            avg_pace_seconds_per_km = excluded.avg_pace_seconds_per_km,
            route = excluded.route,
            status = excluded.status,
            notes = excluded.notes,
            updated_at = excluded.updated_at",
        params![
            record.id.to_string(),
            record.name,
            record.started_at.timestamp_millis(),
            record.ended_at.map(|dt| dt.timestamp_millis()),
            record.duration_seconds,
            record.distance_meters,
            record.elevation_gain_meters,
            record.elevation_loss_meters,
            record.avg_heart_rate,
            record.max_heart_rate,
            record.avg_power,
            record.max_power,
            record.avg_cadence,
            record.max_cadence,
            record.avg_pace_seconds_per_km,
            route,
            record.status.as_str(),
            record.notes,
            Utc::now().timestamp_millis(),
        ],
    )
    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

    Ok(())
}

/// Replace the reading rows of an activity. Callers own the transaction.
fn replace_readings(
    conn: &Connection,
    activity_id: &Uuid,
    readings: &[SensorReading],
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM readings WHERE activity_id = ?1",
        params![activity_id.to_string()],
    )
    .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "INSERT INTO readings (activity_id, seq, timestamp_ms, heart_rate_bpm,
             power_watts, cadence_spm, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

    for (seq, reading) in readings.iter().enumerate() {
        stmt.execute(params![
            activity_id.to_string(),
            seq as i64,
            reading.timestamp().timestamp_millis(),
            reading.heart_rate_bpm(),
            reading.power_watts(),
            reading.cadence_spm(),
            reading.source().as_str(),
        ])
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::NotFound(activity_id.to_string())
            }
            e => DatabaseError::QueryFailed(e.to_string()),
        })?;
    }

    Ok(())
}

fn millis_to_datetime(ms: i64, what: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DatabaseError::DeserializationError(format!("Invalid {}: {}", what, ms)))
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::DeserializationError(format!("Invalid UUID: {}", e)))
}

fn parse_status(s: &str) -> Result<ActivityStatus, DatabaseError> {
    s.parse::<ActivityStatus>()
        .map_err(DatabaseError::DeserializationError)
}

/// Intermediate row struct for activities.
struct ActivityRow {
    id: String,
    name: String,
    started_at: i64,
    ended_at: Option<i64>,
    duration_seconds: u32,
    distance_meters: f64,
    elevation_gain_meters: f64,
    elevation_loss_meters: f64,
    avg_heart_rate: Option<u16>,
    max_heart_rate: Option<u16>,
    avg_power: Option<u16>,
    max_power: Option<u16>,
    avg_cadence: Option<u16>,
    max_cadence: Option<u16>,
    avg_pace_seconds_per_km: Option<u32>,
    route: Option<Vec<u8>>,
    status: String,
    notes: Option<String>,
}

impl ActivityRow {
    fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            started_at: row.get(2)?,
            ended_at: row.get(3)?,
            duration_seconds: row.get(4)?,
            distance_meters: row.get(5)?,
            elevation_gain_meters: row.get(6)?,
            elevation_loss_meters: row.get(7)?,
            avg_heart_rate: row.get(8)?,
            max_heart_rate: row.get(9)?,
            avg_power: row.get(10)?,
            max_power: row.get(11)?,
            avg_cadence: row.get(12)?,
            max_cadence: row.get(13)?,
            avg_pace_seconds_per_km: row.get(14)?,
            route: row.get(15)?,
            status: row.get(16)?,
            notes: row.get(17)?,
        })
    }

    fn into_record(self) -> Result<ActivityRecord, DatabaseError> {
        let id = parse_uuid(&self.id)?;
        let started_at = millis_to_datetime(self.started_at, "start time")?;
        let ended_at = self
            .ended_at
            .map(|ms| millis_to_datetime(ms, "end time"))
            .transpose()?;
        let status = parse_status(&self.status)?;

        // A damaged route never prevents loading the activity itself
        let route = match self.route.as_deref().map(decode_route) {
            Some(Ok(decoded)) => decoded.points,
            Some(Err(e)) => {
                tracing::warn!("Discarding unreadable route of activity {}: {}", id, e);
                Vec::new()
            }
            None => Vec::new(),
        };

        Ok(ActivityRecord {
            id,
            name: self.name,
            started_at,
            ended_at,
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            elevation_gain_meters: self.elevation_gain_meters,
            elevation_loss_meters: self.elevation_loss_meters,
            avg_heart_rate: self.avg_heart_rate,
            max_heart_rate: self.max_heart_rate,
            avg_power: self.avg_power,
            max_power: self.max_power,
            avg_cadence: self.avg_cadence,
            max_cadence: self.max_cadence,
            avg_pace_seconds_per_km: self.avg_pace_seconds_per_km,
            route,
            status,
            notes: self.notes,
        })
    }
}

/// Intermediate row struct for history listings.
struct SummaryRow {
    id: String,
    name: String,
    started_at: i64,
    status: String,
    duration_seconds: u32,
    distance_meters: f64,
    avg_pace_seconds_per_km: Option<u32>,
}

impl SummaryRow {
    fn into_summary(self) -> Result<ActivitySummary, DatabaseError> {
        Ok(ActivitySummary {
            id: parse_uuid(&self.id)?,
            name: self.name,
            started_at: millis_to_datetime(self.started_at, "start time")?,
            status: parse_status(&self.status)?,
            duration_seconds: self.duration_seconds,
            distance_meters: self.distance_meters,
            avg_pace_seconds_per_km: self.avg_pace_seconds_per_km,
        })
    }
}

/// Intermediate row struct for readings.
struct ReadingRow {
    timestamp_ms: i64,
    heart_rate_bpm: Option<u16>,
    power_watts: Option<u16>,
    cadence_spm: Option<u16>,
    source: String,
}

impl ReadingRow {
    fn into_reading(self) -> Result<SensorReading, DatabaseError> {
        let timestamp = millis_to_datetime(self.timestamp_ms, "reading timestamp")?;
        let source = self
            .source
            .parse::<ReadingSource>()
            .map_err(|e| DatabaseError::DeserializationError(e.to_string()))?;

        Ok(SensorReading::new(timestamp, source)
            .with_heart_rate(self.heart_rate_bpm)
            .with_power(self.power_watts)
            .with_cadence(self.cadence_spm))
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
