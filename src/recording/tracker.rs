//! Activity state machine.
//!
//! Owns the live [`ActivityRecord`] and decides which operations are legal:
//! `Idle → Tracking ⇄ Paused → Completed`. Sensor input is accepted only while
//! tracking. Each accepted reading or fix is folded into the metrics aggregator
//! in O(1); power is filled in from the estimator and fusion model when no
//! power meter is delivering data.

use crate::metrics::aggregator::{average_pace, AggregatorConfig, MetricsAggregator};
use crate::metrics::power::{PowerEstimator, PowerModelConfig};
use crate::recording::clock::{Clock, SystemClock};
use crate::recording::types::{
    ActivityRecord, ActivityStatus, LiveMetrics, RoutePoint, StateChange, StateObserver,
    TrackerConfig, TrackerError, TrackerState,
};
use crate::sensors::fusion::{FusionMode, PowerFusion, PowerFusionConfig, SensorFusion};
use crate::sensors::types::{
    haversine_distance, valid, GpsFix, ReadingError, ReadingSource, SensorReading,
};
use crate::storage::config::AppConfig;
use crate::storage::store::{ActivityStore, Checkpoint};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Most recent value seen on each channel.
#[derive(Debug, Clone, Copy, Default)]
struct CurrentValues {
    heart_rate: Option<u16>,
    power: Option<u16>,
    cadence: Option<u16>,
    power_estimated: bool,
}

/// Lifecycle owner of a single running activity.
pub struct ActivityStateMachine {
    /// Configuration
    config: TrackerConfig,
    /// Time source
    clock: Arc<dyn Clock>,
    /// Power model
    estimator: PowerEstimator,
    /// Power correction from heart rate and cadence
    fusion: Box<dyn SensorFusion>,
    /// Running statistics
    aggregator: MetricsAggregator,
    /// Current state
    state: TrackerState,
    /// Activity being tracked (kept after completion until taken)
    record: Option<ActivityRecord>,
    /// Accepted readings in arrival order
    readings: Vec<SensorReading>,
    /// Active milliseconds from closed tracking segments
    closed_active_ms: i64,
    /// Start of the open tracking segment
    segment_started: Option<DateTime<Utc>>,
    /// Previous accepted fix in the current segment
    last_fix: Option<GpsFix>,
    /// Power estimate from the latest GPS interval
    estimated_power: Option<f64>,
    /// Whether a power meter has delivered a positive value
    power_meter_present: bool,
    current: CurrentValues,
    observers: Vec<Arc<dyn StateObserver>>,
}

impl ActivityStateMachine {
    /// Create a state machine with default models and the system clock.
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            estimator: PowerEstimator::default(),
            fusion: Box::new(PowerFusion::new()),
            aggregator: MetricsAggregator::default(),
            state: TrackerState::Idle,
            record: None,
            readings: Vec::new(),
            closed_active_ms: 0,
            segment_started: None,
            last_fix: None,
            estimated_power: None,
            power_meter_present: false,
            current: CurrentValues::default(),
            observers: Vec::new(),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(TrackerConfig::default())
    }

    /// Create from the application configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.tracker.clone())
            .with_aggregator_config(config.aggregator.clone())
            .with_power_model(config.power.clone())
            .with_fusion_config(config.fusion.clone())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator = MetricsAggregator::new(config);
        self
    }

    pub fn with_power_model(mut self, config: PowerModelConfig) -> Self {
        self.estimator = PowerEstimator::new(config);
        self
    }

    pub fn with_fusion_config(mut self, config: PowerFusionConfig) -> Self {
        self.fusion = Box::new(PowerFusion::with_config(config));
        self
    }

    /// Use a custom fusion algorithm.
    pub fn with_fusion(mut self, fusion: Box<dyn SensorFusion>) -> Self {
        self.fusion = fusion;
        self
    }

    /// Register a state-change observer.
    pub fn add_observer(&mut self, observer: Arc<dyn StateObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// The live or completed record, if any.
    pub fn record(&self) -> Option<&ActivityRecord> {
        self.record.as_ref()
    }

    /// Accepted readings of the current activity.
    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    /// Start a new activity.
    pub fn start(&mut self) -> Result<&ActivityRecord, TrackerError> {
        if self.state != TrackerState::Idle {
            return Err(self.illegal("start"));
        }

        let now = self.clock.now();
        self.reset_session();
        self.segment_started = Some(now);
        self.record = Some(ActivityRecord::new(now));
        self.transition(TrackerState::Tracking, now);

        tracing::info!("Started activity {}", self.activity_id_string());
        self.record.as_ref().ok_or(TrackerError::NoActivity)
    }

    /// Pause tracking and freeze the duration clock.
    pub fn pause(&mut self) -> Result<(), TrackerError> {
        if self.state != TrackerState::Tracking {
            return Err(self.illegal("pause"));
        }

        let now = self.clock.now();
        self.close_segment(now);
        // The distance covered while paused is not part of the activity
        self.last_fix = None;
        self.estimated_power = None;
        self.refresh_record(now);
        if let Some(record) = self.record.as_mut() {
            record.status = ActivityStatus::Paused;
        }
        self.transition(TrackerState::Paused, now);

        tracing::info!("Paused activity {}", self.activity_id_string());
        Ok(())
    }

    /// Resume a paused activity.
    pub fn resume(&mut self) -> Result<(), TrackerError> {
        if self.state != TrackerState::Paused {
            return Err(self.illegal("resume"));
        }

        let now = self.clock.now();
        self.segment_started = Some(now);
        if let Some(record) = self.record.as_mut() {
            record.status = ActivityStatus::InProgress;
        }
        self.transition(TrackerState::Tracking, now);

        tracing::info!("Resumed activity {}", self.activity_id_string());
        Ok(())
    }

    /// Finish the activity and compute the final summary.
    pub fn stop(&mut self) -> Result<ActivityRecord, TrackerError> {
        let now = self.clock.now();
        self.finish(now)
    }

    /// Complete an interrupted activity as of its checkpoint.
    ///
    /// The activity ends at the checkpoint time, so a run checkpointed while
    /// paused keeps the paused interval between its last movement and the end.
    pub fn recover(&mut self, checkpoint: Checkpoint) -> Result<ActivityRecord, TrackerError> {
        let ended_at = checkpoint.saved_at;
        self.restore(checkpoint.record, checkpoint.readings)?;
        self.finish(ended_at)
    }

    fn finish(&mut self, now: DateTime<Utc>) -> Result<ActivityRecord, TrackerError> {
        if !matches!(self.state, TrackerState::Tracking | TrackerState::Paused) {
            return Err(self.illegal("stop"));
        }

        self.close_segment(now);
        self.last_fix = None;
        self.refresh_record(now);

        let record = self.record.as_mut().ok_or(TrackerError::NoActivity)?;
        record.ended_at = Some(now);
        record.status = ActivityStatus::Completed;
        let completed = record.clone();
        self.transition(TrackerState::Completed, now);

        tracing::info!(
            "Completed activity {} ({} s, {:.0} m, {} readings)",
            completed.id,
            completed.duration_seconds,
            completed.distance_meters,
            self.readings.len()
        );
        Ok(completed)
    }

    /// Accept a sensor reading.
    ///
    /// Returns the reading as stored, which carries a fused or estimated power
    /// value when the incoming reading had none and no power meter is connected.
    pub fn accept_reading(&mut self, reading: SensorReading) -> Result<SensorReading, TrackerError> {
        if self.state != TrackerState::Tracking {
            return Err(TrackerError::NotTracking);
        }
        reading.validate(&self.config.reading_limits())?;

        if reading.source() == ReadingSource::PowerMeter && reading.has_valid_power() {
            self.power_meter_present = true;
        }

        let reading = self.fill_power(reading);
        self.aggregator.ingest_reading(&reading);
        self.update_current(&reading);
        self.readings.push(reading.clone());

        let now = self.clock.now();
        self.refresh_record(now);
        Ok(reading)
    }

    /// Accept a GPS fix, extending the route and distance.
    pub fn accept_fix(&mut self, fix: GpsFix) -> Result<(), TrackerError> {
        if self.state != TrackerState::Tracking {
            return Err(TrackerError::NotTracking);
        }
        fix.validate()?;
        if let Some(accuracy) = fix.accuracy_m {
            if !accuracy.is_finite() || accuracy > self.config.max_gps_accuracy_m {
                return Err(ReadingError::Inaccurate(accuracy).into());
            }
        }

        if let Some(prev) = self.last_fix {
            let elapsed_ms = (fix.timestamp - prev.timestamp).num_milliseconds();
            if elapsed_ms <= 0 {
                return Err(ReadingError::NonMonotonicFix.into());
            }

            let distance = haversine_distance(
                prev.latitude,
                prev.longitude,
                fix.latitude,
                fix.longitude,
            );
            let altitude_delta = match (prev.altitude_m, fix.altitude_m) {
                (Some(a), Some(b)) => b - a,
                _ => 0.0,
            };
            self.aggregator.ingest_gps_delta(distance, altitude_delta);

            let elapsed_s = elapsed_ms as f64 / 1000.0;
            match self
                .estimator
                .estimate(distance / elapsed_s, altitude_delta, elapsed_s)
            {
                Ok(watts) => self.estimated_power = Some(watts),
                Err(e) => tracing::debug!("Power estimate skipped: {}", e),
            }
        }

        if let Some(record) = self.record.as_mut() {
            record.route.push(RoutePoint {
                timestamp_ms: fix.timestamp.timestamp_millis(),
                latitude: fix.latitude,
                longitude: fix.longitude,
                altitude_m: fix.altitude_m,
            });
        }
        self.last_fix = Some(fix);

        let now = self.clock.now();
        self.refresh_record(now);
        Ok(())
    }

    /// Accept a precomputed movement (treadmill, footpod).
    pub fn accept_gps_delta(
        &mut self,
        distance_delta_m: f64,
        altitude_delta_m: f64,
    ) -> Result<(), TrackerError> {
        if self.state != TrackerState::Tracking {
            return Err(TrackerError::NotTracking);
        }
        self.aggregator
            .ingest_gps_delta(distance_delta_m, altitude_delta_m);
        let now = self.clock.now();
        self.refresh_record(now);
        Ok(())
    }

    /// Periodic refresh of duration and averages. Returns whether tracking.
    pub fn tick(&mut self) -> bool {
        if self.state != TrackerState::Tracking {
            return false;
        }
        let now = self.clock.now();
        self.refresh_record(now);
        true
    }

    /// Snapshot of live metrics for display. Does not modify state.
    pub fn snapshot(&self) -> LiveMetrics {
        let summary = self.aggregator.finalize_averages();
        let duration = match self.state {
            TrackerState::Tracking => summary
                .duration_seconds
                .max(self.active_seconds(self.clock.now())),
            _ => summary.duration_seconds,
        };

        LiveMetrics {
            state: self.state,
            activity_id: self.record.as_ref().map(|r| r.id),
            duration_seconds: duration,
            distance_meters: summary.distance_meters,
            elevation_gain_meters: summary.elevation_gain_meters,
            elevation_loss_meters: summary.elevation_loss_meters,
            avg_pace_seconds_per_km: average_pace(
                duration,
                summary.distance_meters,
                self.aggregator.config(),
            ),
            current_heart_rate: self.current.heart_rate,
            current_power: self.current.power,
            current_cadence: self.current.cadence,
            avg_heart_rate: summary.avg_heart_rate,
            max_heart_rate: summary.max_heart_rate,
            avg_power: summary.avg_power,
            max_power: summary.max_power,
            avg_cadence: summary.avg_cadence,
            max_cadence: summary.max_cadence,
            power_estimated: self.current.power_estimated,
        }
    }

    /// Rename the activity. Allowed in any state with a record.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), TrackerError> {
        let record = self.record.as_mut().ok_or(TrackerError::NoActivity)?;
        record.name = name.into();
        Ok(())
    }

    /// Set or clear the activity note.
    pub fn set_note(&mut self, note: Option<String>) -> Result<(), TrackerError> {
        let record = self.record.as_mut().ok_or(TrackerError::NoActivity)?;
        record.notes = note;
        Ok(())
    }

    /// Save the completed activity and its readings.
    ///
    /// On failure the record stays in memory so the save can be retried.
    pub fn persist(&self, store: &mut dyn ActivityStore) -> Result<(), TrackerError> {
        let (record, readings) = self.completed_payload()?;
        save_completed(store, &record, &readings)
    }

    /// Owned copy of the completed record and readings for a store write.
    pub fn completed_payload(&self) -> Result<(ActivityRecord, Vec<SensorReading>), TrackerError> {
        if self.state != TrackerState::Completed {
            return Err(self.illegal("persist"));
        }
        let record = self.record.as_ref().ok_or(TrackerError::NoActivity)?;
        Ok((record.clone(), self.readings.clone()))
    }

    /// Owned snapshot of the live activity for a checkpoint write.
    pub fn checkpoint_payload(&mut self) -> Option<Checkpoint> {
        if !matches!(self.state, TrackerState::Tracking | TrackerState::Paused) {
            return None;
        }
        let now = self.clock.now();
        self.refresh_record(now);
        self.record.as_ref().map(|record| Checkpoint {
            record: record.clone(),
            readings: self.readings.clone(),
            saved_at: now,
        })
    }

    /// Write the live record to the store's checkpoint slot.
    pub fn checkpoint(&mut self, store: &mut dyn ActivityStore) -> Result<(), TrackerError> {
        let checkpoint = self.checkpoint_payload().ok_or(TrackerError::NotTracking)?;
        store
            .save_checkpoint(&checkpoint)
            .map_err(|e| TrackerError::PersistenceFailure(e.to_string()))?;
        tracing::debug!("Checkpointed activity {}", checkpoint.record.id);
        Ok(())
    }

    /// Restore an interrupted activity from a checkpoint.
    ///
    /// The activity comes back paused; call [`resume`](Self::resume) to go on.
    pub fn restore(
        &mut self,
        mut record: ActivityRecord,
        readings: Vec<SensorReading>,
    ) -> Result<(), TrackerError> {
        if self.state != TrackerState::Idle {
            return Err(self.illegal("restore"));
        }

        let now = self.clock.now();
        self.reset_session();
        self.aggregator.restore(
            record.duration_seconds,
            record.distance_meters,
            record.elevation_gain_meters,
            record.elevation_loss_meters,
            &readings,
        );
        self.closed_active_ms = record.duration_seconds as i64 * 1000;
        self.power_meter_present = readings
            .iter()
            .any(|r| r.source() == ReadingSource::PowerMeter && r.has_valid_power());
        if let Some(last) = readings.last() {
            self.update_current(last);
        }
        self.readings = readings;

        record.status = ActivityStatus::Paused;
        record.ended_at = None;
        record.apply_summary(&self.aggregator.finalize_averages());
        tracing::info!("Restored activity {} from checkpoint", record.id);
        self.record = Some(record);
        self.transition(TrackerState::Paused, now);
        Ok(())
    }

    /// Hand over the completed activity and return to idle.
    pub fn take_completed(
        &mut self,
    ) -> Result<(ActivityRecord, Vec<SensorReading>), TrackerError> {
        if self.state != TrackerState::Completed {
            return Err(self.illegal("take completed activity"));
        }
        let record = self.record.take().ok_or(TrackerError::NoActivity)?;
        let readings = std::mem::take(&mut self.readings);
        let now = self.clock.now();
        self.reset_session();
        self.transition(TrackerState::Idle, now);
        Ok((record, readings))
    }

    /// Drop the current activity, whatever its state.
    pub fn discard(&mut self) {
        let now = self.clock.now();
        let had_record = self.record.is_some();
        self.record = None;
        self.reset_session();
        if self.state != TrackerState::Idle {
            self.transition(TrackerState::Idle, now);
        }
        if had_record {
            tracing::info!("Discarded activity");
        }
    }

    fn illegal(&self, action: &'static str) -> TrackerError {
        TrackerError::InvalidStateTransition {
            from: self.state,
            action,
        }
    }

    fn transition(&mut self, to: TrackerState, at: DateTime<Utc>) {
        let change = StateChange {
            from: self.state,
            to,
            activity_id: self.record.as_ref().map(|r| r.id),
            at,
        };
        self.state = to;
        for observer in &self.observers {
            observer.on_state_change(&change);
        }
    }

    fn reset_session(&mut self) {
        self.aggregator.reset();
        self.readings.clear();
        self.closed_active_ms = 0;
        self.segment_started = None;
        self.last_fix = None;
        self.estimated_power = None;
        self.power_meter_present = false;
        self.current = CurrentValues::default();
    }

    fn active_seconds(&self, now: DateTime<Utc>) -> u32 {
        let open_ms = self
            .segment_started
            .map(|start| (now - start).num_milliseconds().max(0))
            .unwrap_or(0);
        ((self.closed_active_ms + open_ms) / 1000).clamp(0, u32::MAX as i64) as u32
    }

    fn close_segment(&mut self, now: DateTime<Utc>) {
        if let Some(start) = self.segment_started.take() {
            self.closed_active_ms += (now - start).num_milliseconds().max(0);
        }
    }

    fn refresh_record(&mut self, now: DateTime<Utc>) {
        self.aggregator.advance_duration(self.active_seconds(now));
        let summary = self.aggregator.finalize_averages();
        if let Some(record) = self.record.as_mut() {
            record.apply_summary(&summary);
        }
    }

    fn update_current(&mut self, reading: &SensorReading) {
        if let Some(hr) = valid(reading.heart_rate_bpm()) {
            self.current.heart_rate = Some(hr);
        }
        if let Some(cadence) = valid(reading.cadence_spm()) {
            self.current.cadence = Some(cadence);
        }
        if let Some(power) = valid(reading.power_watts()) {
            self.current.power = Some(power);
            self.current.power_estimated = matches!(
                reading.source(),
                ReadingSource::Fused | ReadingSource::Estimated
            );
        }
    }

    fn fill_power(&self, reading: SensorReading) -> SensorReading {
        if reading.has_valid_power() || self.power_meter_present {
            return reading;
        }
        let Some(basic) = self.estimated_power else {
            return reading;
        };

        let heart_rate = valid(reading.heart_rate_bpm()).or(self.current.heart_rate);
        let cadence = valid(reading.cadence_spm()).or(self.current.cadence);
        let diag = self
            .fusion
            .fuse_with_diagnostics(basic, heart_rate, cadence);

        let watts = diag
            .fused_watts
            .round()
            .clamp(0.0, self.config.max_power as f64) as u16;
        if watts == 0 {
            return reading;
        }

        let source = if diag.mode == FusionMode::Passthrough {
            ReadingSource::Estimated
        } else {
            ReadingSource::Fused
        };
        reading.with_power(Some(watts)).with_source(source)
    }

    fn activity_id_string(&self) -> String {
        self.record
            .as_ref()
            .map(|r| r.id.to_string())
            .unwrap_or_default()
    }
}

/// Write a completed activity and drop the checkpoint it supersedes.
///
/// Record and readings go through [`ActivityStore::save_activity`], so a
/// transactional store never holds one without the other.
pub fn save_completed(
    store: &mut dyn ActivityStore,
    record: &ActivityRecord,
    readings: &[SensorReading],
) -> Result<(), TrackerError> {
    if let Err(e) = store.save_activity(record, readings) {
        tracing::warn!("Saving activity {} failed: {}", record.id, e);
        return Err(TrackerError::PersistenceFailure(e.to_string()));
    }

    if let Err(e) = store.clear_checkpoint() {
        tracing::warn!("Failed to clear checkpoint: {}", e);
    }

    tracing::info!(
        "Saved activity {} with {} readings",
        record.id,
        readings.len()
    );
    Ok(())
}

impl Default for ActivityStateMachine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
