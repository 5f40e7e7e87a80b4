//! Tracking configuration.
//!
//! Every struct deserializes with `#[serde(default)]`, so a JSON document only
//! needs to name the values it overrides. Values are taken as given; range
//! checking belongs to whoever produces the document.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tracker::AssignmentSolver;

/// Expected direction of travel through the frame.
///
/// Image coordinates: x grows to the right, y grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    TopToBottom,
    BottomToTop,
    LeftToRight,
    RightToLeft,
}

impl Direction {
    /// Unit vector of the expected movement in normalized image coordinates.
    #[inline]
    pub fn unit_vector(self) -> (f32, f32) {
        match self {
            Direction::TopToBottom => (0.0, 1.0),
            Direction::BottomToTop => (0.0, -1.0),
            Direction::LeftToRight => (1.0, 0.0),
            Direction::RightToLeft => (-1.0, 0.0),
        }
    }

    #[inline]
    pub fn is_vertical(self) -> bool {
        matches!(self, Direction::TopToBottom | Direction::BottomToTop)
    }
}

/// Which orchestrator [`crate::build_tracker`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    #[default]
    ByteTrack,
    OcSort,
}

/// Threshold bands mapping movement consistency to a time-to-live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlBands {
    pub high_consistency: f32,
    pub medium_consistency: f32,
    /// Expected-direction moves required for the high band.
    pub high_moves: u32,
    /// Expected-direction moves required for the medium band.
    pub medium_moves: u32,
    pub high_ttl: u32,
    pub medium_ttl: u32,
    pub low_ttl: u32,
}

impl TtlBands {
    /// Bands for continuously tracked objects.
    pub fn tracking() -> Self {
        Self {
            high_consistency: 0.7,
            medium_consistency: 0.4,
            high_moves: 5,
            medium_moves: 2,
            high_ttl: 15,
            medium_ttl: 10,
            low_ttl: 5,
        }
    }

    /// Stricter bands for tracks that were just recovered from the lost set.
    pub fn reactivation() -> Self {
        Self {
            high_consistency: 0.8,
            medium_consistency: 0.5,
            high_moves: 8,
            medium_moves: 4,
            high_ttl: 10,
            medium_ttl: 6,
            low_ttl: 3,
        }
    }
}

impl Default for TtlBands {
    fn default() -> Self {
        Self::tracking()
    }
}

/// Inter-frame camera motion estimation and compensation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraMotionParams {
    pub enabled: bool,
    /// Largest accepted per-frame motion magnitude (normalized units).
    pub max_motion: f32,
    /// Weight of the previous estimate in the exponential smoothing.
    pub smoothing: f32,
    /// Nearest-neighbor radius when pairing current and previous centers.
    pub max_pair_distance: f32,
    /// How much of the correction a track's own velocity may cancel, 0..=1.
    pub velocity_damping: f32,
}

impl Default for CameraMotionParams {
    fn default() -> Self {
        Self {
            enabled: true,
            max_motion: 0.02,
            smoothing: 0.7,
            max_pair_distance: 0.1,
            velocity_damping: 1.0,
        }
    }
}

/// Cost-matrix biases applied before stage-one and stage-two assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicParams {
    /// Cells remembered per track.
    pub history_capacity: usize,
    /// Side of the grid cell used to quantize matched detection centers.
    pub history_cell_size: f32,
    /// Number of tracks with a remembered history.
    pub max_history_tracks: usize,
    pub history_bonus: f32,
    pub direction_bonus: f32,
    /// Cosine above which a displacement or velocity counts as aligned.
    pub min_alignment: f32,
    pub strong_alignment_cos: f32,
    pub strong_alignment_bonus: f32,
    /// Upper bound on the combined directional reduction.
    pub max_direction_bias: f32,
    pub proximity_distance: f32,
    pub proximity_bonus: f32,
}

impl Default for HeuristicParams {
    fn default() -> Self {
        Self {
            history_capacity: 10,
            history_cell_size: 0.05,
            max_history_tracks: 512,
            history_bonus: 0.1,
            direction_bonus: 0.1,
            min_alignment: 0.0,
            strong_alignment_cos: 0.9,
            strong_alignment_bonus: 0.05,
            max_direction_bias: 0.2,
            proximity_distance: 0.03,
            proximity_bonus: 0.1,
        }
    }
}

/// Provisional buffer that holds candidates before they receive an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionalParams {
    /// Consecutive frames a candidate must be seen before promotion.
    pub min_frames: u32,
    /// Center distance for matching a detection to a candidate.
    pub match_distance: f32,
    /// Frames a candidate may go unseen before it is dropped.
    pub max_missed_frames: u32,
    /// Detections below this score never enter the buffer.
    pub min_confidence: f32,
    pub max_candidates: usize,
}

impl Default for ProvisionalParams {
    fn default() -> Self {
        Self {
            min_frames: 2,
            match_distance: 0.1,
            max_missed_frames: 2,
            min_confidence: 0.3,
            max_candidates: 200,
        }
    }
}

/// Parameters for [`crate::BYTETracker`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteTrackParams {
    /// Stage-one overlap cost threshold.
    pub match_thresh_high: f32,
    /// Stage-two position distance threshold.
    pub match_thresh_low: f32,
    /// Frames without a match after which a track is removed.
    pub max_time_lost: u32,
    pub duplicate_iou: f32,
    pub initial_consistency: f32,
    /// Consistency EMA rate on a regular update.
    pub update_rate: f32,
    /// Consistency EMA rate on reactivation.
    pub reactivation_rate: f32,
    /// Smallest displacement along the expected direction that counts as a move.
    pub min_expected_step: f32,
    pub ttl: TtlBands,
    pub reactivation_ttl: TtlBands,
    pub provisional: ProvisionalParams,
    pub heuristics: HeuristicParams,
    pub camera: CameraMotionParams,
    pub max_active_tracks: usize,
    pub max_lost_tracks: usize,
    pub initial_track_id: u64,
}

impl Default for ByteTrackParams {
    fn default() -> Self {
        Self {
            match_thresh_high: 0.8,
            match_thresh_low: 0.15,
            max_time_lost: 30,
            duplicate_iou: 0.85,
            initial_consistency: 0.5,
            update_rate: 0.3,
            reactivation_rate: 0.15,
            min_expected_step: 0.002,
            ttl: TtlBands::tracking(),
            reactivation_ttl: TtlBands::reactivation(),
            provisional: ProvisionalParams::default(),
            heuristics: HeuristicParams::default(),
            camera: CameraMotionParams::default(),
            max_active_tracks: 200,
            max_lost_tracks: 200,
            initial_track_id: 1,
        }
    }
}

/// Parameters for [`crate::OCSort`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcSortParams {
    /// High/low confidence split. Kept below the detector's own cutoff.
    pub det_thresh: f32,
    /// Detections at or below this score are ignored entirely.
    pub low_score_floor: f32,
    pub max_age: u32,
    pub min_hits: u32,
    /// Minimum IoU for stage-one and BYTE-stage matches.
    pub iou_threshold: f32,
    /// Minimum IoU for observation-centric recovery.
    pub ocr_threshold: f32,
    /// Frames back used for the velocity direction estimate.
    pub delta_t: u32,
    /// Weight of the velocity direction consistency term.
    pub vdc_weight: f32,
    pub use_byte: bool,
    pub max_observations: usize,
    pub max_trackers: usize,
    pub measurement_noise: [f64; 4],
    pub process_noise: [f64; 7],
    pub initial_track_id: u64,
}

impl Default for OcSortParams {
    fn default() -> Self {
        Self {
            det_thresh: 0.2,
            low_score_floor: 0.1,
            max_age: 30,
            min_hits: 3,
            iou_threshold: 0.3,
            ocr_threshold: 0.2,
            delta_t: 3,
            vdc_weight: 0.2,
            use_byte: true,
            max_observations: 30,
            max_trackers: 500,
            measurement_noise: [1e-4, 1e-4, 1e-5, 1e-2],
            process_noise: [4e-4, 4e-4, 4e-5, 1e-3, 1e-6, 1e-6, 1e-8],
            initial_track_id: 1,
        }
    }
}

/// Top-level configuration for a tracking session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub algorithm: TrackerKind,
    pub direction: Direction,
    pub solver: AssignmentSolver,
    pub bytetrack: ByteTrackParams,
    pub ocsort: OcSortParams,
}

impl TrackingConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Default profile for an expected direction.
    ///
    /// Fish crossing the frame horizontally cover more distance per frame in
    /// typical portrait captures, so the distance-based gates are wider.
    pub fn for_direction(direction: Direction) -> Self {
        let mut config = Self {
            direction,
            ..Self::default()
        };
        if !direction.is_vertical() {
            config.bytetrack.match_thresh_low = 0.2;
            config.bytetrack.provisional.match_distance = 0.12;
            config.bytetrack.camera.max_pair_distance = 0.12;
        }
        config
    }

    pub fn with_algorithm(mut self, algorithm: TrackerKind) -> Self {
        self.algorithm = algorithm;
        self
    }
}
