//! Integration tests for the background tracker service.

use crate::persistence_test::FlakyStore;
use crate::sensor_mock::MockRun;
use chrono::Duration;
use runtrack::recording::{
    ActivityRecord, ActivitySummary, ManualClock, SharedStore, TrackerConfig, TrackerState,
};
use runtrack::storage::{Checkpoint, DatabaseError, MemoryStore};
use runtrack::{
    ActivityStateMachine, ActivityStore, Database, SensorReading, TrackerError, TrackerService,
};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// Memory store with a disk-like delay on activity writes.
struct SlowStore {
    inner: MemoryStore,
    save_delay: std::time::Duration,
}

impl ActivityStore for SlowStore {
    fn save(&mut self, record: &ActivityRecord) -> Result<(), DatabaseError> {
        std::thread::sleep(self.save_delay);
        self.inner.save(record)
    }

    fn save_readings(
        &mut self,
        activity_id: &Uuid,
        readings: &[SensorReading],
    ) -> Result<(), DatabaseError> {
        self.inner.save_readings(activity_id, readings)
    }

    fn load(&self, activity_id: &Uuid) -> Result<Option<ActivityRecord>, DatabaseError> {
        self.inner.load(activity_id)
    }

    fn list_all(&self) -> Result<Vec<ActivitySummary>, DatabaseError> {
        self.inner.list_all()
    }

    fn load_readings(&self, activity_id: &Uuid) -> Result<Vec<SensorReading>, DatabaseError> {
        self.inner.load_readings(activity_id)
    }

    fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), DatabaseError> {
        self.inner.save_checkpoint(checkpoint)
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>, DatabaseError> {
        self.inner.load_checkpoint()
    }

    fn clear_checkpoint(&mut self) -> Result<(), DatabaseError> {
        self.inner.clear_checkpoint()
    }
}

fn machine_for(run: &MockRun) -> (ActivityStateMachine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(run.start));
    let config = TrackerConfig {
        tick_interval_ms: 20,
        ..Default::default()
    };
    let machine = ActivityStateMachine::new(config).with_clock(clock.clone());
    (machine, clock)
}

/// Poll until the condition holds or a second has passed.
async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_streamed_run_is_recorded_and_saved() {
    let run = MockRun::default();
    let (machine, clock) = machine_for(&run);
    let store = Arc::new(Mutex::new(MemoryStore::new()));
    let shared: SharedStore = store.clone();
    let handle = TrackerService::spawn(machine, Some(shared));

    let id = handle.start().await.unwrap();
    handle
        .attach_stream(futures::stream::iter(run.events(0, 60)))
        .await
        .unwrap();
    clock.advance(Duration::seconds(60));

    let record = handle.stop().await.unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.duration_seconds, 60);
    assert!((record.distance_meters - 200.0).abs() < 0.01);
    assert_eq!(record.avg_pace_seconds_per_km, Some(300));
    assert_eq!(handle.state(), TrackerState::Completed);
    handle.shutdown().await;

    let store = store.lock().unwrap();
    assert_eq!(store.load(&id).unwrap(), Some(record));
    assert_eq!(store.load_readings(&id).unwrap().len(), 61);
}

#[tokio::test]
async fn test_snapshot_reflects_stream() {
    let run = MockRun::default();
    let (machine, clock) = machine_for(&run);
    let handle = TrackerService::spawn(machine, None);

    handle.start().await.unwrap();
    handle
        .attach_stream(futures::stream::iter(run.events(0, 30)))
        .await
        .unwrap();
    clock.advance(Duration::seconds(30));

    // Events are queued; wait for the loop to drain them
    assert!(eventually(|| handle.snapshot().distance_meters > 99.99).await);
    let live = handle.snapshot();
    assert_eq!(live.state, TrackerState::Tracking);
    assert_eq!(live.duration_seconds, 30);
    assert_eq!(live.current_heart_rate, Some(150));
    assert_eq!(live.current_cadence, Some(170));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let (machine, _clock) = machine_for(&MockRun::default());
    let handle = TrackerService::spawn(machine, None);
    let mut rx = handle.subscribe();

    handle.start().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), TrackerState::Tracking);

    handle.pause().await.unwrap();
    handle.resume().await.unwrap();
    handle.stop().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), TrackerState::Completed);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_pause_writes_checkpoint() {
    let run = MockRun::default();
    let (machine, clock) = machine_for(&run);
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let shared: SharedStore = db.clone();
    let handle = TrackerService::spawn(machine, Some(shared));

    let id = handle.start().await.unwrap();
    handle
        .attach_stream(futures::stream::iter(run.events(0, 20)))
        .await
        .unwrap();
    clock.advance(Duration::seconds(20));
    handle.pause().await.unwrap();

    assert!(eventually(|| db.lock().unwrap().has_checkpoint().unwrap()).await);
    let checkpoint = db.lock().unwrap().load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.record.id, id);
    assert_eq!(checkpoint.readings.len(), 21);
    assert_eq!(checkpoint.saved_at, run.time_at(20));

    handle.stop().await.unwrap();
    assert!(!db.lock().unwrap().has_checkpoint().unwrap());
    assert!(db.lock().unwrap().load(&id).unwrap().is_some());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_save_can_be_retried() {
    let run = MockRun::default();
    let (machine, clock) = machine_for(&run);
    let store = Arc::new(Mutex::new(FlakyStore {
        inner: MemoryStore::new(),
        failing: true,
    }));
    let shared: SharedStore = store.clone();
    let handle = TrackerService::spawn(machine, Some(shared));

    let id = handle.start().await.unwrap();
    handle
        .attach_stream(futures::stream::iter(run.events(0, 10)))
        .await
        .unwrap();
    clock.advance(Duration::seconds(10));

    let err = handle.stop().await.unwrap_err();
    assert!(matches!(err, TrackerError::PersistenceFailure(_)));
    assert_eq!(handle.state(), TrackerState::Completed);
    assert!(handle.with_machine(|m| m.record().is_some()));

    store.lock().unwrap().failing = false;
    handle.save().await.unwrap();
    assert!(store.lock().unwrap().load(&id).unwrap().is_some());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_events_before_start_are_dropped() {
    let run = MockRun::default();
    let (machine, _clock) = machine_for(&run);
    let handle = TrackerService::spawn(machine, None);

    handle
        .attach_stream(futures::stream::iter(run.events(0, 5)))
        .await
        .unwrap();
    handle.start().await.unwrap();

    let live = handle.snapshot();
    assert_eq!(live.distance_meters, 0.0);
    assert_eq!(live.avg_heart_rate, None);
    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_right_after_pause_clears_checkpoint() {
    let run = MockRun::default();
    for _ in 0..100 {
        let (machine, clock) = machine_for(&run);
        let store = Arc::new(Mutex::new(MemoryStore::new()));
        let shared: SharedStore = store.clone();
        let handle = TrackerService::spawn(machine, Some(shared));

        let id = handle.start().await.unwrap();
        handle
            .attach_stream(futures::stream::iter(run.events(0, 5)))
            .await
            .unwrap();
        clock.advance(Duration::seconds(5));

        let (paused, stopped) = tokio::join!(handle.pause(), handle.stop());
        paused.unwrap();
        stopped.unwrap();
        handle.shutdown().await;

        // The pause checkpoint must not land after the save cleared it
        let store = store.lock().unwrap();
        assert!(store.load_checkpoint().unwrap().is_none());
        assert!(store.load(&id).unwrap().is_some());
    }
}

#[tokio::test]
async fn test_snapshot_not_blocked_by_slow_save() {
    let run = MockRun::default();
    let (machine, clock) = machine_for(&run);
    let store = Arc::new(Mutex::new(SlowStore {
        inner: MemoryStore::new(),
        save_delay: std::time::Duration::from_millis(500),
    }));
    let shared: SharedStore = store.clone();
    let handle = TrackerService::spawn(machine, Some(shared));

    let id = handle.start().await.unwrap();
    clock.advance(Duration::seconds(10));

    let (stopped, (state, waited)) = tokio::join!(handle.stop(), async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let began = Instant::now();
        let live = handle.snapshot();
        (live.state, began.elapsed())
    });

    stopped.unwrap();
    assert_eq!(state, TrackerState::Completed);
    assert!(
        waited < std::time::Duration::from_millis(200),
        "snapshot waited {:?} on the store write",
        waited
    );
    assert!(store.lock().unwrap().load(&id).unwrap().is_some());
    handle.shutdown().await;
}
