//! Activity tracking, persistence hand-off and export.

pub mod clock;
pub mod exporter_csv;
pub mod exporter_json;
pub mod exporter_tcx;
pub mod route_codec;
pub mod service;
pub mod tracker;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use route_codec::{decode_route, encode_route, DecodedRoute, RouteCodecError};
pub use service::{EventSender, SharedStore, TrackerHandle, TrackerService, WatchObserver};
pub use tracker::ActivityStateMachine;
pub use types::{
    ActivityRecord, ActivityStatus, ActivitySummary, ExportError, ExportFormat, LiveMetrics,
    RoutePoint, StateChange, StateObserver, TrackerConfig, TrackerError, TrackerState,
};
