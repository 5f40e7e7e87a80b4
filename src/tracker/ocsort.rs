//! Observation-centric SORT.
//!
//! Association runs in three stages against high-confidence detections and
//! the predicted boxes, with a velocity direction consistency (VDC) term;
//! then low-confidence detections against what is left (BYTE stage); then
//! observation-centric recovery (OCR) against each leftover tracker's last
//! real observation instead of its prediction.

use std::f32::consts::{FRAC_PI_2, PI};

use ndarray::Array2;
use tracing::{debug, warn};

use crate::config::{OcSortParams, TrackingConfig};
use crate::tracker::box_tracker::{KalmanBoxTracker, speed_direction};
use crate::tracker::kalman_box::KalmanBoxFilter;
use crate::tracker::matching::{AssignmentResult, AssignmentSolver, Detection};
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::{TrackSnapshot, Tracker};

/// Overlap cost minus the velocity direction consistency bonus.
///
/// For a tracker with a velocity and a past observation, the bonus is
/// `(pi/2 - angle) / pi * weight * score`, where `angle` is between the
/// tracker's velocity and the direction from that observation to the
/// detection. Misaligned pairs get a negative bonus, i.e. a penalty.
pub fn vdc_cost(
    iou: &Array2<f32>,
    previous_obs: &[Option<Rect>],
    velocities: &[Option<(f32, f32)>],
    detections: &[Detection],
    weight: f32,
) -> Array2<f32> {
    let mut cost = iou.mapv(|v| 1.0 - v);
    for (i, (previous, velocity)) in previous_obs.iter().zip(velocities).enumerate() {
        let (Some(previous), Some((vx, vy))) = (previous, velocity) else {
            continue;
        };
        for (j, detection) in detections.iter().enumerate() {
            let (dx, dy) = speed_direction(previous, &detection.bbox);
            let cos = (vx * dx + vy * dy).clamp(-1.0, 1.0);
            let bonus = (FRAC_PI_2 - cos.acos()) / PI * weight * detection.score;
            cost[[i, j]] -= bonus;
        }
    }
    cost
}

/// Solve without a cost gate, then reject pairs whose overlap is below
/// `min_iou`.
pub fn associate(
    solver: &AssignmentSolver,
    cost: &Array2<f32>,
    iou: &Array2<f32>,
    min_iou: f32,
) -> AssignmentResult {
    let (num_rows, num_cols) = cost.dim();
    let raw = solver.solve(cost, f32::INFINITY);

    let mut row_free = vec![true; num_rows];
    let mut col_free = vec![true; num_cols];
    let mut matches = Vec::with_capacity(raw.matches.len());
    for (row, col) in raw.matches {
        if iou[[row, col]] >= min_iou {
            row_free[row] = false;
            col_free[col] = false;
            matches.push((row, col));
        }
    }

    AssignmentResult {
        matches,
        unmatched_tracks: (0..num_rows).filter(|&i| row_free[i]).collect(),
        unmatched_detections: (0..num_cols).filter(|&j| col_free[j]).collect(),
    }
}

fn overlap_cost(iou: &Array2<f32>) -> Array2<f32> {
    iou.mapv(|v| 1.0 - v)
}

pub struct OCSort {
    trackers: Vec<KalmanBoxTracker>,
    frame_count: u32,
    next_id: u64,
    params: OcSortParams,
    solver: AssignmentSolver,
    kalman_filter: KalmanBoxFilter,
}

impl OCSort {
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_params(config.ocsort.clone(), config.solver)
    }

    pub fn with_params(params: OcSortParams, solver: AssignmentSolver) -> Self {
        let kalman_filter = KalmanBoxFilter::new(params.measurement_noise, params.process_noise);
        Self {
            trackers: Vec::new(),
            frame_count: 0,
            next_id: params.initial_track_id,
            params,
            solver,
            kalman_filter,
        }
    }

    pub fn trackers(&self) -> &[KalmanBoxTracker] {
        &self.trackers
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    fn is_confirmed(&self, tracker: &KalmanBoxTracker) -> bool {
        tracker.hit_streak >= self.params.min_hits || self.frame_count <= self.params.min_hits
    }

    /// Returns the id of a tracker whose update failed.
    fn apply_update(&mut self, idx: usize, detection: &Detection) -> Option<u64> {
        let tracker = &mut self.trackers[idx];
        match tracker.update(detection, &self.kalman_filter) {
            Ok(()) => None,
            Err(err) => {
                warn!(track_id = tracker.id, %err, "dropping tracker after failed update");
                Some(tracker.id)
            }
        }
    }

    fn enforce_cap(&mut self) {
        if self.trackers.len() <= self.params.max_trackers {
            return;
        }
        debug!(
            pruned = self.trackers.len() - self.params.max_trackers,
            "tracker cap reached"
        );
        self.trackers.sort_by(|a, b| {
            a.time_since_update
                .cmp(&b.time_since_update)
                .then(b.hit_streak.cmp(&a.hit_streak))
                .then(a.id.cmp(&b.id))
        });
        self.trackers.truncate(self.params.max_trackers);
        self.trackers.sort_by_key(|t| t.id);
    }
}

impl Tracker for OCSort {
    fn update(&mut self, detections: Vec<Detection>) -> Vec<TrackSnapshot> {
        self.frame_count += 1;

        let mut high = Vec::new();
        let mut low = Vec::new();
        for detection in detections {
            if !detection.bbox.is_finite() || !detection.score.is_finite() {
                continue;
            }
            if detection.score > self.params.det_thresh {
                high.push(detection);
            } else if detection.score > self.params.low_score_floor {
                low.push(detection);
            }
        }

        // Predict, dropping trackers that degenerate
        let kalman_filter = &self.kalman_filter;
        let mut predicted = Vec::with_capacity(self.trackers.len());
        self.trackers.retain_mut(|tracker| match tracker.predict(kalman_filter) {
            Ok(bbox) => {
                predicted.push(bbox);
                true
            }
            Err(err) => {
                warn!(track_id = tracker.id, %err, "dropping tracker after failed prediction");
                false
            }
        });

        let mut failed = Vec::new();

        // Stage 1: VDC association with high-confidence detections
        let high_boxes: Vec<Rect> = high.iter().map(|d| d.bbox).collect();
        let iou = iou_batch(&predicted, &high_boxes);
        let previous_obs: Vec<Option<Rect>> = self
            .trackers
            .iter()
            .map(|t| t.k_previous_obs(self.params.delta_t))
            .collect();
        let velocities: Vec<Option<(f32, f32)>> = self.trackers.iter().map(|t| t.velocity).collect();
        let cost = vdc_cost(&iou, &previous_obs, &velocities, &high, self.params.vdc_weight);
        let first = associate(&self.solver, &cost, &iou, self.params.iou_threshold);
        debug!(
            frame_count = self.frame_count,
            trackers = self.trackers.len(),
            detections = high.len(),
            matched = first.matches.len(),
            "vdc association"
        );
        for &(row, col) in &first.matches {
            failed.extend(self.apply_update(row, &high[col]));
        }

        let mut unmatched_trackers = first.unmatched_tracks;
        let mut unmatched_dets = first.unmatched_detections;

        // Stage 2: low-confidence detections against leftover predictions
        if self.params.use_byte && !low.is_empty() && !unmatched_trackers.is_empty() {
            let boxes: Vec<Rect> = unmatched_trackers.iter().map(|&t| predicted[t]).collect();
            let low_boxes: Vec<Rect> = low.iter().map(|d| d.bbox).collect();
            let iou = iou_batch(&boxes, &low_boxes);
            let byte = associate(&self.solver, &overlap_cost(&iou), &iou, self.params.iou_threshold);
            debug!(matched = byte.matches.len(), "byte association");
            for &(row, col) in &byte.matches {
                failed.extend(self.apply_update(unmatched_trackers[row], &low[col]));
            }
            unmatched_trackers = byte
                .unmatched_tracks
                .iter()
                .map(|&r| unmatched_trackers[r])
                .collect();
        }

        // Stage 3: observation-centric recovery
        if !unmatched_dets.is_empty() && !unmatched_trackers.is_empty() {
            let last_boxes: Vec<Rect> = unmatched_trackers
                .iter()
                .map(|&t| self.trackers[t].last_observation)
                .collect();
            let det_boxes: Vec<Rect> = unmatched_dets.iter().map(|&d| high[d].bbox).collect();
            let iou = iou_batch(&last_boxes, &det_boxes);
            let ocr = associate(&self.solver, &overlap_cost(&iou), &iou, self.params.ocr_threshold);
            debug!(matched = ocr.matches.len(), "observation-centric recovery");
            for &(row, col) in &ocr.matches {
                failed.extend(self.apply_update(unmatched_trackers[row], &high[unmatched_dets[col]]));
            }
            unmatched_dets = ocr
                .unmatched_detections
                .iter()
                .map(|&c| unmatched_dets[c])
                .collect();
        }

        for &d in &unmatched_dets {
            let id = self.next_id;
            self.next_id += 1;
            self.trackers.push(KalmanBoxTracker::new(
                id,
                &high[d],
                &self.kalman_filter,
                self.params.delta_t,
                self.params.max_observations,
            ));
            debug!(track_id = id, frame_count = self.frame_count, "new tracker");
        }

        let max_age = self.params.max_age;
        self.trackers
            .retain(|t| !failed.contains(&t.id) && t.time_since_update <= max_age);
        self.enforce_cap();

        self.active_tracks()
    }

    fn reset(&mut self) {
        self.trackers.clear();
        self.frame_count = 0;
        self.next_id = self.params.initial_track_id;
    }

    fn active_tracks(&self) -> Vec<TrackSnapshot> {
        self.trackers
            .iter()
            .filter(|t| t.time_since_update <= 1 && self.is_confirmed(t))
            .map(|t| t.snapshot(true))
            .collect()
    }

    fn mark_counted(&mut self, track_id: u64) -> bool {
        match self.trackers.iter_mut().find(|t| t.id == track_id) {
            Some(tracker) => {
                tracker.counted = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::TrackState;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn detection_at(cx: f32, cy: f32, score: f32) -> Detection {
        Detection::from_rect(Rect::from_center(cx, cy, 0.1, 0.1), score)
    }

    fn tracker() -> OCSort {
        OCSort::new(&TrackingConfig::default())
    }

    #[test]
    fn test_vdc_rewards_aligned_detections() {
        let iou = array![[0.5_f32, 0.5]];
        let previous = [Some(Rect::from_center(0.5, 0.5, 0.1, 0.1))];
        let velocities = [Some((0.0, 1.0))];
        let detections = [detection_at(0.5, 0.6, 1.0), detection_at(0.5, 0.4, 1.0)];
        let cost = vdc_cost(&iou, &previous, &velocities, &detections, 0.2);

        assert_abs_diff_eq!(cost[[0, 0]], 0.5 - 0.1, epsilon = 1e-3);
        assert_abs_diff_eq!(cost[[0, 1]], 0.5 + 0.1, epsilon = 1e-3);
    }

    #[test]
    fn test_vdc_needs_velocity() {
        let iou = array![[0.5_f32]];
        let previous = [Some(Rect::from_center(0.5, 0.5, 0.1, 0.1))];
        let cost = vdc_cost(&iou, &previous, &[None], &[detection_at(0.5, 0.6, 1.0)], 0.2);
        assert_eq!(cost[[0, 0]], 0.5);
    }

    #[test]
    fn test_associate_applies_overlap_floor() {
        let iou = array![[0.9_f32, 0.0], [0.0, 0.25]];
        let result = associate(&AssignmentSolver::default(), &overlap_cost(&iou), &iou, 0.3);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
        assert_eq!(result.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_stable_identity_while_moving() {
        let mut ocsort = tracker();
        let mut ids = Vec::new();
        for step in 0..8 {
            let tracks = ocsort.update(vec![detection_at(0.5, 0.2 + 0.02 * step as f32, 0.9)]);
            assert_eq!(tracks.len(), 1);
            ids.push(tracks[0].track_id);
        }
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(ocsort.trackers().len(), 1);
    }

    #[test]
    fn test_observation_centric_recovery() {
        let mut ocsort = tracker();
        for _ in 0..4 {
            ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
        }
        // IoU 0.25 against the last observation: below the stage-one floor,
        // above the recovery floor
        let tracks = ocsort.update(vec![detection_at(0.56, 0.5, 0.9)]);
        assert_eq!(ocsort.trackers().len(), 1);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id, 1);
    }

    #[test]
    fn test_byte_stage_uses_low_confidence_detections() {
        let mut with_byte = tracker();
        let mut without_byte = OCSort::with_params(
            OcSortParams {
                use_byte: false,
                ..OcSortParams::default()
            },
            AssignmentSolver::default(),
        );
        for ocsort in [&mut with_byte, &mut without_byte] {
            for _ in 0..4 {
                ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
            }
            ocsort.update(vec![detection_at(0.5, 0.5, 0.15)]);
        }
        assert_eq!(with_byte.trackers()[0].time_since_update, 0);
        assert_eq!(without_byte.trackers()[0].time_since_update, 1);
        // Low-confidence detections never start trackers
        assert_eq!(without_byte.trackers().len(), 1);
    }

    #[test]
    fn test_new_tracker_needs_min_hits_after_warmup() {
        let mut ocsort = tracker();
        for _ in 0..4 {
            ocsort.update(vec![detection_at(0.2, 0.2, 0.9)]);
        }
        let both = || vec![detection_at(0.2, 0.2, 0.9), detection_at(0.8, 0.8, 0.9)];
        for _ in 0..3 {
            let tracks = ocsort.update(both());
            assert_eq!(tracks.len(), 1);
        }
        let tracks = ocsort.update(both());
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[1].track_id, 2);
        assert_eq!(tracks[1].state, TrackState::Tracked);
    }

    #[test]
    fn test_stale_trackers_are_dropped() {
        let mut ocsort = tracker();
        ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
        let tracks = ocsort.update(vec![]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].state, TrackState::Tracked);
        assert!(ocsort.update(vec![]).is_empty());

        for _ in 0..OcSortParams::default().max_age {
            ocsort.update(vec![]);
        }
        assert!(ocsort.trackers().is_empty());
    }

    #[test]
    fn test_degenerate_tracker_is_dropped() {
        let mut ocsort = tracker();
        for _ in 0..3 {
            ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
        }
        ocsort.trackers[0].mean[0] = f64::NAN;

        ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
        let ids: Vec<u64> = ocsort.trackers().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_tracker_count_is_capped() {
        let mut ocsort = OCSort::with_params(
            OcSortParams {
                max_trackers: 4,
                ..OcSortParams::default()
            },
            AssignmentSolver::default(),
        );
        for frame in 0..5 {
            let detections = (0..8)
                .map(|i| detection_at(0.05 + 0.12 * i as f32, 0.2 + 0.15 * frame as f32, 0.9))
                .collect();
            ocsort.update(detections);
            assert!(ocsort.trackers().len() <= 4);
        }
    }

    #[test]
    fn test_reset_restarts_ids() {
        let mut ocsort = tracker();
        ocsort.update(vec![detection_at(0.5, 0.5, 0.9)]);
        ocsort.update(vec![detection_at(0.5, 0.5, 0.9), detection_at(0.1, 0.1, 0.9)]);
        ocsort.reset();
        assert_eq!(ocsort.frame_count(), 0);
        let tracks = ocsort.update(vec![detection_at(0.3, 0.3, 0.9)]);
        assert_eq!(tracks[0].track_id, 1);
    }
}
