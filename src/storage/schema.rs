//! Database schema definitions.

/// SQL schema for creating all database tables.
///
/// Timestamps are epoch milliseconds. The route is the binary blob produced by
/// the route codec.
pub const SCHEMA: &str = r#"
-- Activities table
CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    duration_seconds INTEGER NOT NULL,
    distance_meters REAL NOT NULL,
    elevation_gain_meters REAL NOT NULL DEFAULT 0,
    elevation_loss_meters REAL NOT NULL DEFAULT 0,
    avg_heart_rate INTEGER,
    max_heart_rate INTEGER,
    avg_power INTEGER,
    max_power INTEGER,
    avg_cadence INTEGER,
    max_cadence INTEGER,
    avg_pace_seconds_per_km INTEGER,
    route BLOB,
    status TEXT NOT NULL CHECK (status IN ('in_progress', 'paused', 'completed')),
    notes TEXT,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activities_started_at ON activities(started_at);

-- Sensor readings table
CREATE TABLE IF NOT EXISTS readings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    activity_id TEXT NOT NULL REFERENCES activities(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    timestamp_ms INTEGER NOT NULL,
    heart_rate_bpm INTEGER,
    power_watts INTEGER,
    cadence_spm INTEGER,
    source TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_readings_activity_seq ON readings(activity_id, seq);

-- Crash recovery checkpoint (single row)
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    record_json TEXT NOT NULL,
    readings_json TEXT NOT NULL,
    saved_at INTEGER NOT NULL
);
"#;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;
