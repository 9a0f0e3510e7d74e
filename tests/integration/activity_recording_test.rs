//! Integration tests for activity recording.
//!
//! Drives the state machine with a mock run on a manual clock, the way a
//! replayed sensor log does.

use crate::sensor_mock::MockRun;
use runtrack::recording::{ActivityStatus, ManualClock, TrackerState};
use runtrack::sensors::{ReadingSource, SensorEvent};
use runtrack::{ActivityStateMachine, TrackerError};
use std::sync::Arc;

fn machine_for(run: &MockRun) -> (ActivityStateMachine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(run.start));
    let machine = ActivityStateMachine::with_defaults().with_clock(clock.clone());
    (machine, clock)
}

/// Feed seconds `from..=to` of the run, moving the clock along.
fn drive(machine: &mut ActivityStateMachine, clock: &ManualClock, run: &MockRun, from: i64, to: i64) {
    for second in from..=to {
        clock.set(run.time_at(second));
        machine.accept_fix(run.fix_at(second)).unwrap();
        machine.accept_reading(run.reading_at(second)).unwrap();
    }
}

#[test]
fn test_full_recording_flow() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);

    assert_eq!(machine.state(), TrackerState::Idle);
    let id = machine.start().unwrap().id;
    assert_eq!(machine.state(), TrackerState::Tracking);

    drive(&mut machine, &clock, &run, 0, 300);

    // Live view while running
    let live = machine.snapshot();
    assert_eq!(live.activity_id, Some(id));
    assert_eq!(live.duration_seconds, 300);
    assert_eq!(live.current_heart_rate, Some(150));
    assert!(live.power_estimated);

    let record = machine.stop().unwrap();
    assert_eq!(machine.state(), TrackerState::Completed);
    assert_eq!(record.id, id);
    assert_eq!(record.status, ActivityStatus::Completed);
    assert_eq!(record.ended_at, Some(run.time_at(300)));
    assert_eq!(record.duration_seconds, 300);
    assert!((record.distance_meters - 1000.0).abs() < 0.01);
    assert_eq!(record.avg_pace_seconds_per_km, Some(300));
    assert_eq!(record.avg_heart_rate, Some(150));
    assert_eq!(record.max_heart_rate, Some(150));
    assert_eq!(record.avg_cadence, Some(170));
    assert_eq!(record.route.len(), 301);
    assert_eq!(machine.readings().len(), 301);

    // No further input once completed
    assert!(matches!(
        machine.accept_reading(run.reading_at(301)),
        Err(TrackerError::NotTracking)
    ));
    assert!(machine.start().is_err());
}

#[test]
fn test_power_estimated_without_power_meter() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();
    drive(&mut machine, &clock, &run, 0, 60);
    let record = machine.stop().unwrap();

    // First reading comes before any GPS interval and has no power
    let readings = machine.readings();
    assert_eq!(readings[0].power_watts(), None);
    for reading in &readings[1..] {
        // Reference heart rate and cadence leave the estimate untouched
        assert_eq!(reading.power_watts(), Some(248));
        assert_eq!(reading.source(), ReadingSource::Fused);
    }
    assert_eq!(record.avg_power, Some(248));
    assert_eq!(record.max_power, Some(248));
}

#[test]
fn test_power_without_aux_signals_is_estimated() {
    let run = MockRun {
        heart_rate: None,
        cadence: None,
        ..Default::default()
    };
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();
    drive(&mut machine, &clock, &run, 0, 10);

    let last = machine.readings().last().unwrap();
    assert_eq!(last.source(), ReadingSource::Estimated);
    assert_eq!(last.power_watts(), Some(248));
}

#[test]
fn test_power_meter_takes_precedence() {
    let run = MockRun {
        power_meter_watts: Some(280),
        ..Default::default()
    };
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();
    drive(&mut machine, &clock, &run, 0, 30);

    // Heart rate strap readings after the meter was seen stay without power
    let hr_only = MockRun {
        power_meter_watts: None,
        ..run.clone()
    };
    drive(&mut machine, &clock, &hr_only, 31, 40);

    let record = machine.stop().unwrap();
    assert_eq!(record.avg_power, Some(280));
    assert_eq!(record.max_power, Some(280));
    assert!(machine.readings()[31..]
        .iter()
        .all(|r| r.power_watts().is_none()));
    assert!(!machine.snapshot().power_estimated);
}

#[test]
fn test_pause_resume_no_double_counting() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();

    drive(&mut machine, &clock, &run, 0, 60);
    machine.pause().unwrap();
    let paused = machine.record().unwrap().clone();
    assert_eq!(paused.status, ActivityStatus::Paused);
    assert_eq!(paused.duration_seconds, 60);

    // Still moving while paused, nothing is recorded
    for second in 61..120 {
        clock.set(run.time_at(second));
        assert!(machine.accept_fix(run.fix_at(second)).is_err());
        assert!(machine.accept_reading(run.reading_at(second)).is_err());
    }
    assert_eq!(machine.snapshot().duration_seconds, 60);

    clock.set(run.time_at(120));
    machine.resume().unwrap();
    drive(&mut machine, &clock, &run, 120, 180);
    let record = machine.stop().unwrap();

    assert_eq!(record.duration_seconds, 120);
    // 60 s before and 60 s after the pause, the gap is not covered
    assert!((record.distance_meters - 400.0).abs() < 0.01);
    assert_eq!(record.avg_pace_seconds_per_km, Some(300));
    assert_eq!(machine.readings().len(), 122);
}

#[test]
fn test_repeated_pause_resume() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();

    for lap in 0..5 {
        let base = lap * 100;
        clock.set(run.time_at(base));
        if lap > 0 {
            machine.resume().unwrap();
        }
        drive(&mut machine, &clock, &run, base, base + 30);
        machine.pause().unwrap();
    }

    let record = machine.stop().unwrap();
    assert_eq!(record.duration_seconds, 150);
    assert!((record.distance_meters - 500.0).abs() < 0.01);
}

#[test]
fn test_elevation_gain_on_climb() {
    let run = MockRun {
        altitude_m: Some(400.0),
        climb_rate: 0.2,
        ..Default::default()
    };
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();
    drive(&mut machine, &clock, &run, 0, 100);
    let record = machine.stop().unwrap();

    assert!((record.elevation_gain_meters - 20.0).abs() < 1e-6);
    assert_eq!(record.elevation_loss_meters, 0.0);
    // Climbing costs more than the flat 248 W
    assert!(record.avg_power.unwrap() > 248);
    assert_eq!(record.route[100].altitude_m, Some(420.0));
}

#[test]
fn test_event_log_replay() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);
    machine.start().unwrap();

    for event in run.events(0, 30) {
        match event {
            SensorEvent::Fix(fix) => {
                clock.set(fix.timestamp);
                machine.accept_fix(fix).unwrap();
            }
            SensorEvent::Reading(reading) => {
                machine.accept_reading(reading).unwrap();
            }
        }
    }

    let record = machine.stop().unwrap();
    assert!((record.distance_meters - 100.0).abs() < 0.01);
    assert_eq!(record.duration_seconds, 30);
}

#[test]
fn test_take_completed_allows_next_activity() {
    let run = MockRun::default();
    let (mut machine, clock) = machine_for(&run);
    let first = machine.start().unwrap().id;
    drive(&mut machine, &clock, &run, 0, 10);
    machine.stop().unwrap();

    let (record, readings) = machine.take_completed().unwrap();
    assert_eq!(record.id, first);
    assert_eq!(readings.len(), 11);
    assert_eq!(machine.state(), TrackerState::Idle);

    let second = machine.start().unwrap().id;
    assert_ne!(first, second);
    assert!(machine.readings().is_empty());
    assert_eq!(machine.record().unwrap().distance_meters, 0.0);
}
