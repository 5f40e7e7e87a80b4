//! Per-object tracker for the OC-SORT-style orchestrator.

use std::collections::VecDeque;

use crate::error::TrackError;
use crate::tracker::TrackSnapshot;
use crate::tracker::kalman_box::{BoxCovariance, BoxMean, KalmanBoxFilter};
use crate::tracker::matching::Detection;
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Past observations keyed by tracker age, oldest evicted first.
#[derive(Debug, Clone)]
pub struct ObservationHistory {
    capacity: usize,
    entries: VecDeque<(u32, Rect)>,
}

impl ObservationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, age: u32, bbox: Rect) {
        if let Some(entry) = self.entries.iter_mut().find(|(a, _)| *a == age) {
            entry.1 = bbox;
            return;
        }
        self.entries.push_back((age, bbox));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn get(&self, age: u32) -> Option<Rect> {
        self.entries
            .iter()
            .rev()
            .find(|(a, _)| *a == age)
            .map(|(_, b)| *b)
    }

    /// Observation with the highest age.
    pub fn latest(&self) -> Option<Rect> {
        self.entries
            .iter()
            .max_by_key(|(a, _)| *a)
            .map(|(_, b)| *b)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Unit vector from the center of `from` to the center of `to`.
pub fn speed_direction(from: &Rect, to: &Rect) -> (f32, f32) {
    let (x1, y1) = from.center();
    let (x2, y2) = to.center();
    let (dx, dy) = (x2 - x1, y2 - y1);
    let norm = (dx * dx + dy * dy).sqrt() + 1e-6;
    (dx / norm, dy / norm)
}

fn to_measurement(rect: &Rect) -> [f64; 4] {
    let z = rect.to_xysr();
    [z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64]
}

/// Kalman box tracker with an observation history.
#[derive(Debug, Clone)]
pub struct KalmanBoxTracker {
    pub id: u64,
    pub class: String,
    pub score: f32,
    pub(crate) mean: BoxMean,
    covariance: BoxCovariance,
    /// Number of predictions made
    pub age: u32,
    /// Number of matched updates
    pub hits: u32,
    /// Consecutive frames with a matched update
    pub hit_streak: u32,
    pub time_since_update: u32,
    pub last_observation: Rect,
    observations: ObservationHistory,
    /// Direction of recent motion, estimated from observations `delta_t` apart
    pub velocity: Option<(f32, f32)>,
    delta_t: u32,
    pub counted: bool,
}

impl KalmanBoxTracker {
    pub fn new(
        id: u64,
        detection: &Detection,
        kalman_filter: &KalmanBoxFilter,
        delta_t: u32,
        max_observations: usize,
    ) -> Self {
        let (mean, covariance) = kalman_filter.initiate(to_measurement(&detection.bbox));
        let mut observations = ObservationHistory::new(max_observations);
        observations.push(0, detection.bbox);
        Self {
            id,
            class: detection.class.clone(),
            score: detection.score,
            mean,
            covariance,
            age: 0,
            hits: 0,
            hit_streak: 0,
            time_since_update: 0,
            last_observation: detection.bbox,
            observations,
            velocity: None,
            delta_t,
            counted: false,
        }
    }

    /// Observation `k` frames back, searching from `k` down to 1, falling back
    /// to the most recent one.
    pub fn k_previous_obs(&self, k: u32) -> Option<Rect> {
        (1..=k)
            .rev()
            .filter_map(|dt| self.age.checked_sub(dt))
            .find_map(|age| self.observations.get(age))
            .or_else(|| self.observations.latest())
    }

    pub fn observations(&self) -> &ObservationHistory {
        &self.observations
    }

    /// Per-frame change of `(x, y, s)` between the last two filtered
    /// observations.
    pub fn state_velocity(&self) -> (f32, f32, f32) {
        (self.mean[4] as f32, self.mean[5] as f32, self.mean[6] as f32)
    }

    /// Box from the filter state.
    pub fn state_box(&self) -> Rect {
        Rect::from_xysr(
            self.mean[0] as f32,
            self.mean[1] as f32,
            self.mean[2] as f32,
            self.mean[3] as f32,
        )
    }

    pub fn predict(&mut self, kalman_filter: &KalmanBoxFilter) -> Result<Rect, TrackError> {
        let (mean, covariance) = kalman_filter.predict(&self.mean, &self.covariance)?;
        self.mean = mean;
        self.covariance = covariance;

        self.age += 1;
        if self.time_since_update > 0 {
            self.hit_streak = 0;
        }
        self.time_since_update += 1;

        let predicted = self.state_box();
        if predicted.is_finite() {
            Ok(predicted)
        } else {
            Err(TrackError::NonFinite("predict"))
        }
    }

    pub fn update(
        &mut self,
        detection: &Detection,
        kalman_filter: &KalmanBoxFilter,
    ) -> Result<(), TrackError> {
        let previous = self
            .k_previous_obs(self.delta_t)
            .unwrap_or(self.last_observation);
        self.velocity = Some(speed_direction(&previous, &detection.bbox));

        let (mut mean, covariance) =
            kalman_filter.update(&self.mean, &self.covariance, to_measurement(&detection.bbox))?;
        // The transition is the identity, so the prior still holds the last
        // filtered position.
        let elapsed = f64::from(self.time_since_update.max(1));
        for i in 0..3 {
            mean[4 + i] = (mean[i] - self.mean[i]) / elapsed;
        }
        self.mean = mean;
        self.covariance = covariance;

        self.last_observation = detection.bbox;
        self.observations.push(self.age, detection.bbox);
        self.time_since_update = 0;
        self.hits += 1;
        self.hit_streak += 1;
        self.score = detection.score;
        self.class.clone_from(&detection.class);
        Ok(())
    }

    /// Reported state given the confirmation rule of the orchestrator. A
    /// tracker coasting on its prediction for one frame is still `Tracked`.
    pub fn state(&self, confirmed: bool) -> TrackState {
        if !confirmed {
            TrackState::New
        } else if self.time_since_update <= 1 {
            TrackState::Tracked
        } else {
            TrackState::Lost
        }
    }

    pub fn snapshot(&self, confirmed: bool) -> TrackSnapshot {
        let bbox = if self.time_since_update == 0 {
            self.last_observation
        } else {
            self.state_box()
        };
        TrackSnapshot {
            track_id: self.id,
            bbox,
            position: bbox.center(),
            state: self.state(confirmed),
            score: self.score,
            class: self.class.clone(),
            counted: self.counted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn detection_at(cx: f32, cy: f32) -> Detection {
        Detection::from_rect(Rect::from_center(cx, cy, 0.1, 0.1), 0.8)
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = ObservationHistory::new(3);
        for age in 0..5 {
            history.push(age, Rect::new(age as f32, 0.0, 1.0, 1.0));
        }
        assert_eq!(history.len(), 3);
        assert!(history.get(0).is_none());
        assert!(history.get(1).is_none());
        assert_eq!(history.get(2).unwrap().x, 2.0);
        assert_eq!(history.latest().unwrap().x, 4.0);
    }

    #[test]
    fn test_history_stays_bounded_over_long_track() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.1), &kf, 3, 30);
        for step in 1..200 {
            tracker.predict(&kf).unwrap();
            tracker
                .update(&detection_at(0.5, 0.1 + 0.002 * step as f32), &kf)
                .unwrap();
        }
        assert_eq!(tracker.observations().len(), 30);
    }

    #[test]
    fn test_hit_streak_resets_after_miss() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.5), &kf, 3, 30);
        tracker.predict(&kf).unwrap();
        tracker.update(&detection_at(0.5, 0.5), &kf).unwrap();
        tracker.predict(&kf).unwrap();
        tracker.update(&detection_at(0.5, 0.5), &kf).unwrap();
        assert_eq!(tracker.hit_streak, 2);

        tracker.predict(&kf).unwrap();
        assert_eq!(tracker.time_since_update, 1);
        tracker.predict(&kf).unwrap();
        assert_eq!(tracker.hit_streak, 0);
        assert_eq!(tracker.time_since_update, 2);
    }

    #[test]
    fn test_velocity_points_along_motion() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.2), &kf, 3, 30);
        for step in 1..=4 {
            tracker.predict(&kf).unwrap();
            tracker
                .update(&detection_at(0.5, 0.2 + 0.05 * step as f32), &kf)
                .unwrap();
        }
        let (vx, vy) = tracker.velocity.unwrap();
        assert_abs_diff_eq!(vx, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(vy, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn test_k_previous_obs_prefers_oldest_within_window() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.2), &kf, 3, 30);
        for step in 1..=5 {
            tracker.predict(&kf).unwrap();
            tracker
                .update(&detection_at(0.5, 0.2 + 0.05 * step as f32), &kf)
                .unwrap();
        }
        // age 5, so three frames back is the observation made at age 2
        let previous = tracker.k_previous_obs(3).unwrap();
        assert_abs_diff_eq!(previous.center().1, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn test_constant_motion_gives_state_velocity() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.1), &kf, 3, 30);
        assert_eq!(tracker.state_velocity(), (0.0, 0.0, 0.0));
        for step in 1..50 {
            tracker.predict(&kf).unwrap();
            tracker
                .update(&detection_at(0.5, 0.1 + 0.01 * step as f32), &kf)
                .unwrap();
        }
        let (vx, vy, vs) = tracker.state_velocity();
        assert_abs_diff_eq!(vx, 0.0, epsilon = 1e-4);
        assert_abs_diff_eq!(vy, 0.01, epsilon = 1e-4);
        assert_abs_diff_eq!(vs, 0.0, epsilon = 1e-4);
        // Prediction does not extrapolate with the velocity
        let before = tracker.state_box().center();
        let predicted = tracker.predict(&kf).unwrap().center();
        assert_abs_diff_eq!(predicted.1, before.1, epsilon = 1e-6);
    }

    #[test]
    fn test_state_velocity_spreads_over_missed_frames() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.5), &kf, 3, 30);
        for _ in 0..10 {
            tracker.predict(&kf).unwrap();
            tracker.update(&detection_at(0.5, 0.5), &kf).unwrap();
        }
        let before = tracker.state_box().center().1;
        tracker.predict(&kf).unwrap();
        tracker.predict(&kf).unwrap();
        tracker.update(&detection_at(0.5, 0.54), &kf).unwrap();
        let after = tracker.state_box().center().1;
        let (_, vy, _) = tracker.state_velocity();
        assert!(vy > 0.0);
        assert_abs_diff_eq!(vy, (after - before) / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_one_missed_frame_still_reports_tracked() {
        let kf = KalmanBoxFilter::default();
        let mut tracker = KalmanBoxTracker::new(1, &detection_at(0.5, 0.5), &kf, 3, 30);
        assert_eq!(tracker.state(false), TrackState::New);
        assert_eq!(tracker.state(true), TrackState::Tracked);
        tracker.predict(&kf).unwrap();
        assert_eq!(tracker.snapshot(true).state, TrackState::Tracked);
        tracker.predict(&kf).unwrap();
        assert_eq!(tracker.snapshot(true).state, TrackState::Lost);
    }

    #[test]
    fn test_speed_direction_of_static_box_is_zero() {
        let rect = Rect::new(0.1, 0.1, 0.1, 0.1);
        assert_eq!(speed_direction(&rect, &rect), (0.0, 0.0));
    }
}
