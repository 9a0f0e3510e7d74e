//! Persistence contract for activities.

use crate::recording::types::{ActivityRecord, ActivitySummary};
use crate::sensors::types::SensorReading;
use crate::storage::database::DatabaseError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Snapshot of an unfinished activity kept for crash recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub record: ActivityRecord,
    pub readings: Vec<SensorReading>,
    /// Tracker clock time when the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

/// Storage of completed activities, their readings and a single
/// crash-recovery checkpoint.
///
/// `save` is an upsert and `save_readings` replaces the stored stream, so
/// retries after a failure are safe.
pub trait ActivityStore: Send {
    /// Insert or update an activity.
    fn save(&mut self, record: &ActivityRecord) -> Result<(), DatabaseError>;

    /// Replace the reading stream of an activity.
    fn save_readings(
        &mut self,
        activity_id: &Uuid,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError>;

    /// Save an activity together with its reading stream.
    ///
    /// The default runs `save` then `save_readings` and is not atomic: if
    /// the second step fails the activity is stored without readings until
    /// the call is retried. Stores that support transactions override this
    /// so that either both parts are written or neither is.
    fn save_activity(
        &mut self,
        record: &ActivityRecord,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError> {
        self.save(record)?;
        self.save_readings(&record.id, readings)
    }

    fn load(&self, activity_id: &Uuid) -> Result<Option<ActivityRecord>, DatabaseError>;

    /// All activities, newest first.
    fn list_all(&self) -> Result<Vec<ActivitySummary>, DatabaseError>;

    fn load_readings(&self, activity_id: &Uuid) -> Result<Vec<SensorReading>, DatabaseError>;

    /// Replace the stored checkpoint.
    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DatabaseError>;

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, DatabaseError>;

    fn clear_checkpoint(&mut self) -> Result<(), DatabaseError>;
}

/// Volatile store kept entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    activities: HashMap<Uuid, ActivityRecord>,
    readings: HashMap<Uuid, Vec<SensorReading>>,
    checkpoint: Option<Checkpoint>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }
}

impl ActivityStore for MemoryStore {
    fn save(&mut self, record: &ActivityRecord) -> Result<(), DatabaseError> {
        self.activities.insert(record.id, record.clone());
        Ok(())
    }

    fn save_readings(
        &mut self,
        activity_id: &Uuid,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError> {
        if !self.activities.contains_key(activity_id) {
            return Err(DatabaseError::NotFound(activity_id.to_string()));
        }
        self.readings.insert(*activity_id, readings.to_vec());
        Ok(())
    }

    fn load(&self, activity_id: &Uuid) -> Result<Option<ActivityRecord>, DatabaseError> {
        Ok(self.activities.get(activity_id).cloned())
    }

    fn list_all(&self) -> Result<Vec<ActivitySummary>, DatabaseError> {
        let mut summaries: Vec<_> = self.activities.values().map(|r| r.summary()).collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    fn load_readings(&self, activity_id: &Uuid) -> Result<Vec<SensorReading>, DatabaseError> {
        Ok(self.readings.get(activity_id).cloned().unwrap_or_default())
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        self.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, DatabaseError> {
        Ok(self.checkpoint.clone())
    }

    fn clear_checkpoint(&mut self) -> Result<(), DatabaseError> {
        self.checkpoint = None;
        Ok(())
    }
}
