mod box_tracker;
mod byte_tracker;
mod heuristics;
mod kalman_box;
mod kalman_filter;
mod matching;
mod ocsort;
mod provisional;
mod rect;
mod strack;
mod track_state;

pub use box_tracker::{KalmanBoxTracker, ObservationHistory, speed_direction};
pub use byte_tracker::BYTETracker;
pub use heuristics::{CameraMotionEstimator, MatchHistory, adaptive_ttl};
pub use kalman_box::KalmanBoxFilter;
pub use kalman_filter::KalmanFilter;
pub use matching::{
    AssignmentResult, AssignmentSolver, Detection, MAX_COST, ciou_distance, diou_distance,
    giou_distance, greedy_assignment, iou_distance, linear_assignment, position_distance,
};
pub use ocsort::OCSort;
pub use provisional::{ProvisionalBuffer, ProvisionalCandidate};
pub use rect::{Rect, iou_batch};
pub use strack::STrack;
pub use track_state::TrackState;

use crate::config::{TrackerKind, TrackingConfig};

/// Read-only view of a track, as reported to callers each frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSnapshot {
    pub track_id: u64,
    pub bbox: Rect,
    /// Center in normalized image coordinates
    pub position: (f32, f32),
    pub state: TrackState,
    pub score: f32,
    pub class: String,
    pub counted: bool,
}

/// Per-frame multi-object tracker.
///
/// Calls must be serialized: one `update` per frame, `reset` only between
/// frames.
pub trait Tracker {
    /// Associate this frame's detections and return the active tracks.
    fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackSnapshot>;

    /// Drop all state and restart identity numbering.
    fn reset(&mut self);

    fn active_tracks(&self) -> Vec<TrackSnapshot>;

    /// Flag a track as counted. Returns `false` if no live track has this id.
    fn mark_counted(&mut self, track_id: u64) -> bool;
}

pub fn build_tracker(config: &TrackingConfig) -> Box<dyn Tracker> {
    match config.algorithm {
        TrackerKind::ByteTrack => Box::new(BYTETracker::new(config)),
        TrackerKind::OcSort => Box::new(OCSort::new(config)),
    }
}
