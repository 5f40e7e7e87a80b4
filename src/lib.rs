//! Multi-object tracking for fish counting.
//!
//! Two interchangeable trackers share the same geometry, Kalman filters and
//! matching primitives:
//!
//! - [`BYTETracker`]: two-stage association with directional heuristics and a
//!   provisional buffer that delays identity allocation.
//! - [`OCSort`]: velocity-direction-consistent association with
//!   observation-centric recovery.
//!
//! Both implement [`Tracker`], so callers can pick one from a
//! [`TrackingConfig`] through [`build_tracker`].

pub mod config;
pub mod error;
pub mod integration;
pub mod tracker;

pub use config::{
    ByteTrackParams, CameraMotionParams, Direction, HeuristicParams, OcSortParams,
    ProvisionalParams, TrackerKind, TrackingConfig, TtlBands,
};
pub use error::{ConfigError, TrackError};
pub use integration::{DetectionBuilder, DetectionSource, IntoDetections, TrackerPipeline};
pub use tracker::{
    AssignmentSolver, BYTETracker, Detection, KalmanBoxTracker, OCSort, Rect, STrack,
    TrackSnapshot, TrackState, Tracker, build_tracker,
};
