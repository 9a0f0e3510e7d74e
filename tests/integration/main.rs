//! Integration test modules.

mod activity_recording_test;
mod sensor_mock;
mod service_test;
