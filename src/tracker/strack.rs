//! Single object track (STrack) for the ByteTrack-style tracker.

use ndarray::{Array1, Array2};

use crate::error::TrackError;
use crate::tracker::TrackSnapshot;
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Single object track.
#[derive(Debug, Clone)]
pub struct STrack {
    /// Unique track identifier, assigned on activation
    pub track_id: u64,
    /// Current track state
    pub state: TrackState,
    /// Detection confidence score of the last observation
    pub score: f32,
    /// Class label of the last observation
    pub class: String,
    /// Frame of the last matched observation
    pub frame_id: u32,
    /// Frame ID when track was started
    pub start_frame: u32,
    /// Frame at which the track was last marked lost
    pub lost_frame: Option<u32>,
    /// Consecutive updates since activation or reactivation
    pub tracklet_len: u32,
    /// Kalman filter state mean (8-dim)
    pub mean: Option<Array1<f64>>,
    /// Kalman filter state covariance (8x8)
    pub covariance: Option<Array2<f64>>,
    /// Last observed detection box (TLWH format)
    pub tlwh: Rect,
    /// Current center, from the filter once activated
    pub position: (f32, f32),
    /// Frames left before an unmatched track is marked lost
    pub ttl: u32,
    /// Rolling share of updates that moved in the expected direction
    pub consistency: f32,
    /// Number of updates that moved in the expected direction
    pub expected_moves: u32,
    /// Set by the counting side; never cleared here
    pub counted: bool,
}

fn to_measurement(rect: &Rect) -> [f64; 4] {
    let xyah = rect.to_xyah();
    [
        xyah[0] as f64,
        xyah[1] as f64,
        xyah[2] as f64,
        xyah[3] as f64,
    ]
}

impl STrack {
    /// Create a new, not yet activated track from a detection.
    pub fn new(detection: &Detection, initial_consistency: f32) -> Self {
        Self {
            track_id: 0,
            state: TrackState::New,
            score: detection.score,
            class: detection.class.clone(),
            frame_id: 0,
            start_frame: 0,
            lost_frame: None,
            tracklet_len: 0,
            mean: None,
            covariance: None,
            tlwh: detection.bbox,
            position: detection.bbox.center(),
            ttl: 0,
            consistency: initial_consistency,
            expected_moves: 0,
            counted: false,
        }
    }

    /// Box from the filter state, or the last observation before activation.
    pub fn rect(&self) -> Rect {
        match &self.mean {
            Some(mean) => Rect::from_xyah(
                mean[0] as f32,
                mean[1] as f32,
                mean[2] as f32,
                mean[3] as f32,
            ),
            None => self.tlwh,
        }
    }

    /// Last observed box moved onto the current (predicted) position.
    ///
    /// `None` when there is no usable observation, which keeps the track out
    /// of overlap-based matching.
    pub fn predicted_box(&self) -> Option<Rect> {
        if self.tlwh.area() > 0.0 && self.tlwh.is_finite() {
            Some(self.tlwh.recentered(self.position.0, self.position.1))
        } else {
            None
        }
    }

    /// Filtered center velocity per frame.
    pub fn velocity(&self) -> (f32, f32) {
        match &self.mean {
            Some(mean) => (mean[4] as f32, mean[5] as f32),
            None => (0.0, 0.0),
        }
    }

    pub fn end_frame(&self) -> u32 {
        self.frame_id
    }

    fn sync_position(&mut self) {
        if let Some(mean) = &self.mean {
            self.position = (mean[0] as f32, mean[1] as f32);
        }
    }

    pub fn activate(&mut self, kalman_filter: &KalmanFilter, track_id: u64, frame_id: u32, ttl: u32) {
        self.track_id = track_id;

        let (mean, covariance) = kalman_filter.initiate(to_measurement(&self.tlwh));
        self.mean = Some(mean);
        self.covariance = Some(covariance);
        self.sync_position();

        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.ttl = ttl;
        self.frame_id = frame_id;
        self.start_frame = frame_id;
    }

    fn fold_observation(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
    ) -> Result<(), TrackError> {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let (new_mean, new_cov) =
                kalman_filter.update(mean, cov, to_measurement(&detection.bbox))?;
            self.mean = Some(new_mean);
            self.covariance = Some(new_cov);
        }
        self.tlwh = detection.bbox;
        self.score = detection.score;
        self.class.clone_from(&detection.class);
        self.sync_position();
        Ok(())
    }

    /// Bring a lost track back with a new observation. Keeps its identity.
    pub fn re_activate(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
    ) -> Result<(), TrackError> {
        self.fold_observation(detection, kalman_filter)?;
        self.tracklet_len = 0;
        self.state = TrackState::Tracked;
        self.lost_frame = None;
        self.frame_id = frame_id;
        Ok(())
    }

    pub fn update(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanFilter,
        frame_id: u32,
    ) -> Result<(), TrackError> {
        self.fold_observation(detection, kalman_filter)?;
        self.tracklet_len += 1;
        self.state = TrackState::Tracked;
        self.frame_id = frame_id;
        Ok(())
    }

    pub fn predict(&mut self, kalman_filter: &KalmanFilter) -> Result<(), TrackError> {
        if let (Some(mean), Some(cov)) = (&self.mean, &self.covariance) {
            let mut mean_to_predict = mean.clone();
            if self.state != TrackState::Tracked {
                mean_to_predict[7] = 0.0;
            }
            let (new_mean, new_cov) = kalman_filter.predict(&mean_to_predict, cov)?;
            self.mean = Some(new_mean);
            self.covariance = Some(new_cov);
            self.sync_position();
        }
        Ok(())
    }

    /// Move the estimated center, e.g. to undo camera motion.
    pub fn shift(&mut self, dx: f32, dy: f32) {
        if let Some(mean) = &mut self.mean {
            mean[0] += dx as f64;
            mean[1] += dy as f64;
        }
        self.position = (self.position.0 + dx, self.position.1 + dy);
    }

    /// Fold one update into the movement-consistency score.
    pub fn record_movement(&mut self, moved_as_expected: bool, rate: f32) {
        let sample = if moved_as_expected { 1.0 } else { 0.0 };
        self.consistency = ((1.0 - rate) * self.consistency + rate * sample).clamp(0.0, 1.0);
        if moved_as_expected {
            self.expected_moves += 1;
        }
    }

    pub fn mark_lost(&mut self, frame_id: u32) {
        self.state = TrackState::Lost;
        self.lost_frame = Some(frame_id);
    }

    pub fn mark_removed(&mut self) {
        self.state = TrackState::Removed;
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.track_id,
            bbox: self.rect(),
            position: self.position,
            state: self.state,
            score: self.score,
            class: self.class.clone(),
            counted: self.counted,
        }
    }
}
