//! Main BYTETracker algorithm implementation.
//!
//! Per frame:
//!
//! 1. Predict tracked tracks and compensate camera motion.
//! 2. Stage one: overlap cost against all detections, biased by match history,
//!    expected direction and proximity, solved at the high threshold.
//! 3. Unmatched tracked tracks spend TTL and become lost when it runs out.
//! 4. Stage two: lost tracks against the remaining detections by center
//!    distance, solved at the low threshold, reactivating on a match.
//! 5. Leftover detections go through the provisional buffer; promoted
//!    candidates become new tracks.
//! 6. Expiry, duplicate suppression and collection caps.

use tracing::{debug, trace, warn};

use crate::config::{ByteTrackParams, Direction, TrackingConfig};
use crate::tracker::heuristics::{
    CameraMotionEstimator, MatchHistory, adaptive_ttl, apply_directional_bias,
    apply_match_history_bias, apply_proximity_bias, compensation_offset, moved_in_direction,
};
use crate::tracker::kalman_filter::KalmanFilter;
use crate::tracker::matching::{self, AssignmentSolver, Detection};
use crate::tracker::provisional::ProvisionalBuffer;
use crate::tracker::rect::{Rect, iou_batch};
use crate::tracker::strack::STrack;
use crate::tracker::track_state::TrackState;
use crate::tracker::{TrackSnapshot, Tracker};

pub struct BYTETracker {
    /// Live tracks in creation order; removed ones are compacted away each frame
    tracks: Vec<STrack>,
    provisional: ProvisionalBuffer,
    match_history: MatchHistory,
    camera: CameraMotionEstimator,
    frame_id: u32,
    next_id: u64,
    params: ByteTrackParams,
    direction: Direction,
    solver: AssignmentSolver,
    kalman_filter: KalmanFilter,
}

impl BYTETracker {
    pub fn new(config: &TrackingConfig) -> Self {
        Self::with_params(config.bytetrack.clone(), config.direction, config.solver)
    }

    pub fn with_params(
        params: ByteTrackParams,
        direction: Direction,
        solver: AssignmentSolver,
    ) -> Self {
        Self {
            tracks: Vec::new(),
            provisional: ProvisionalBuffer::new(params.provisional.clone()),
            match_history: MatchHistory::new(&params.heuristics),
            camera: CameraMotionEstimator::new(params.camera.clone(), direction.unit_vector()),
            frame_id: 0,
            next_id: params.initial_track_id,
            params,
            direction,
            solver,
            kalman_filter: KalmanFilter::default(),
        }
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    /// All live tracks, tracked and lost.
    pub fn tracks(&self) -> &[STrack] {
        &self.tracks
    }

    pub fn lost_tracks(&self) -> Vec<&STrack> {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Lost)
            .collect()
    }

    pub fn track(&self, track_id: u64) -> Option<&STrack> {
        self.tracks.iter().find(|t| t.track_id == track_id)
    }

    pub fn provisional_len(&self) -> usize {
        self.provisional.len()
    }

    fn indices_in(&self, state: TrackState) -> Vec<usize> {
        (0..self.tracks.len())
            .filter(|&i| self.tracks[i].state == state)
            .collect()
    }

    fn predict_and_compensate(&mut self, indices: &[usize], camera_motion: (f32, f32)) {
        let damping = self.params.camera.velocity_damping;
        for &i in indices {
            let track = &mut self.tracks[i];
            match track.predict(&self.kalman_filter) {
                Ok(()) => {
                    let (dx, dy) = compensation_offset(camera_motion, track.velocity(), damping);
                    track.shift(dx, dy);
                }
                Err(err) => {
                    warn!(track_id = track.track_id, %err, "dropping track after failed prediction");
                    track.mark_removed();
                }
            }
        }
    }

    fn apply_match(&mut self, idx: usize, detection: &Detection, reactivate: bool) {
        let frame_id = self.frame_id;
        let direction = self.direction.unit_vector();
        let (rate, bands) = if reactivate {
            (self.params.reactivation_rate, &self.params.reactivation_ttl)
        } else {
            (self.params.update_rate, &self.params.ttl)
        };

        let track = &mut self.tracks[idx];
        let previous = track.tlwh.center();
        let result = if reactivate {
            track.re_activate(detection, &self.kalman_filter, frame_id)
        } else {
            track.update(detection, &self.kalman_filter, frame_id)
        };
        if let Err(err) = result {
            warn!(track_id = track.track_id, %err, "dropping track after failed update");
            track.mark_removed();
            return;
        }

        let moved = moved_in_direction(
            previous,
            detection.center(),
            direction,
            self.params.min_expected_step,
        );
        track.record_movement(moved, rate);
        track.ttl = adaptive_ttl(track.consistency, track.expected_moves, bands);
        trace!(
            track_id = track.track_id,
            reactivate,
            consistency = track.consistency,
            ttl = track.ttl,
            "matched"
        );

        let track_id = track.track_id;
        self.match_history.record(track_id, detection.center());
    }

    fn spawn(&mut self, detection: &Detection) {
        let track_id = self.next_id;
        self.next_id += 1;

        let mut track = STrack::new(detection, self.params.initial_consistency);
        let ttl = adaptive_ttl(track.consistency, track.expected_moves, &self.params.ttl);
        track.activate(&self.kalman_filter, track_id, self.frame_id, ttl);
        self.match_history.record(track_id, detection.center());
        debug!(track_id, frame_id = self.frame_id, "new track");
        self.tracks.push(track);
    }

    fn remove_expired(&mut self) {
        let frame_id = self.frame_id;
        let max_time_lost = self.params.max_time_lost;
        for track in self.tracks.iter_mut().filter(|t| t.state.is_live()) {
            if frame_id.saturating_sub(track.end_frame()) >= max_time_lost {
                debug!(track_id = track.track_id, frame_id, "track removed");
                track.mark_removed();
            }
        }
    }

    /// Among tracked tracks overlapping above `duplicate_iou`, keep the
    /// higher-score one (the older one on a tie).
    fn remove_duplicates(&mut self) {
        let indices = self.indices_in(TrackState::Tracked);
        if indices.len() < 2 {
            return;
        }
        let boxes: Vec<Rect> = indices
            .iter()
            .map(|&i| {
                let track = &self.tracks[i];
                track.predicted_box().unwrap_or_else(|| track.rect())
            })
            .collect();
        let ious = iou_batch(&boxes, &boxes);

        let mut duplicate = vec![false; indices.len()];
        for a in 0..indices.len() {
            for b in (a + 1)..indices.len() {
                if duplicate[a] || duplicate[b] || ious[[a, b]] <= self.params.duplicate_iou {
                    continue;
                }
                let (ta, tb) = (&self.tracks[indices[a]], &self.tracks[indices[b]]);
                if tb.score > ta.score {
                    duplicate[a] = true;
                } else {
                    duplicate[b] = true;
                }
            }
        }

        for (k, &i) in indices.iter().enumerate() {
            if duplicate[k] {
                debug!(track_id = self.tracks[i].track_id, "duplicate track removed");
                self.tracks[i].mark_removed();
            }
        }
    }

    /// Keep at most `cap` tracks in `state`, preferring the most recently
    /// matched, then the highest score.
    fn enforce_cap(&mut self, state: TrackState, cap: usize) {
        let mut indices = self.indices_in(state);
        if indices.len() <= cap {
            return;
        }
        indices.sort_by(|&a, &b| {
            let (ta, tb) = (&self.tracks[a], &self.tracks[b]);
            tb.frame_id
                .cmp(&ta.frame_id)
                .then(tb.score.total_cmp(&ta.score))
        });
        debug!(?state, pruned = indices.len() - cap, "track cap reached");
        for &i in &indices[cap..] {
            self.tracks[i].mark_removed();
        }
    }
}

impl Tracker for BYTETracker {
    fn update(&mut self, mut detections: Vec<Detection>) -> Vec<TrackSnapshot> {
        self.frame_id += 1;
        detections.retain(|d| d.bbox.is_finite() && d.score.is_finite());

        let det_boxes: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();
        let det_centers: Vec<(f32, f32)> = detections.iter().map(Detection::center).collect();
        let camera_motion = self.camera.estimate(&det_centers);
        let direction = self.direction.unit_vector();

        let mut tracked_idx = self.indices_in(TrackState::Tracked);
        let mut lost_idx = self.indices_in(TrackState::Lost);

        // Step 1: predict tracked tracks
        self.predict_and_compensate(&tracked_idx, camera_motion);
        tracked_idx.retain(|&i| self.tracks[i].state == TrackState::Tracked);

        // Step 2: first association, overlap with heuristic biases
        let track_boxes: Vec<Option<Rect>> = tracked_idx
            .iter()
            .map(|&i| self.tracks[i].predicted_box())
            .collect();
        let track_ids: Vec<u64> = tracked_idx.iter().map(|&i| self.tracks[i].track_id).collect();
        let positions: Vec<(f32, f32)> = tracked_idx.iter().map(|&i| self.tracks[i].position).collect();
        let velocities: Vec<(f32, f32)> = tracked_idx.iter().map(|&i| self.tracks[i].velocity()).collect();

        let heuristics = &self.params.heuristics;
        let mut dists = matching::iou_distance(&track_boxes, &det_boxes);
        apply_match_history_bias(
            &mut dists,
            &track_ids,
            &det_centers,
            &self.match_history,
            heuristics.history_bonus,
        );
        apply_directional_bias(&mut dists, &positions, &velocities, &det_centers, direction, heuristics);
        apply_proximity_bias(&mut dists, &positions, &det_centers, heuristics);

        let first = self.solver.solve(&dists, self.params.match_thresh_high);
        debug!(
            frame_id = self.frame_id,
            tracks = tracked_idx.len(),
            detections = detections.len(),
            matched = first.matches.len(),
            "first association"
        );

        for &(row, col) in &first.matches {
            self.apply_match(tracked_idx[row], &detections[col], false);
        }

        // Step 3: unmatched tracked tracks spend their TTL
        for &row in &first.unmatched_tracks {
            let frame_id = self.frame_id;
            let track = &mut self.tracks[tracked_idx[row]];
            track.ttl = track.ttl.saturating_sub(1);
            if track.ttl == 0 {
                debug!(track_id = track.track_id, frame_id, "track lost");
                track.mark_lost(frame_id);
            }
        }

        // Step 4: second association, lost tracks by center distance
        self.predict_and_compensate(&lost_idx, camera_motion);
        lost_idx.retain(|&i| self.tracks[i].state == TrackState::Lost);

        let remaining = first.unmatched_detections;
        let remaining_boxes: Vec<Rect> = remaining.iter().map(|&j| det_boxes[j]).collect();
        let remaining_centers: Vec<(f32, f32)> = remaining.iter().map(|&j| det_centers[j]).collect();
        let lost_positions: Vec<(f32, f32)> = lost_idx.iter().map(|&i| self.tracks[i].position).collect();
        let lost_velocities: Vec<(f32, f32)> = lost_idx.iter().map(|&i| self.tracks[i].velocity()).collect();

        let mut dists = matching::position_distance(&lost_positions, &remaining_boxes);
        apply_directional_bias(
            &mut dists,
            &lost_positions,
            &lost_velocities,
            &remaining_centers,
            direction,
            &self.params.heuristics,
        );
        let second = self.solver.solve(&dists, self.params.match_thresh_low);
        debug!(
            frame_id = self.frame_id,
            lost = lost_idx.len(),
            detections = remaining.len(),
            reactivated = second.matches.len(),
            "second association"
        );

        for &(row, col) in &second.matches {
            self.apply_match(lost_idx[row], &detections[remaining[col]], true);
            debug!(track_id = self.tracks[lost_idx[row]].track_id, "track reactivated");
        }

        // Step 5: provisional buffer, then new tracks
        let leftover: Vec<Detection> = second
            .unmatched_detections
            .iter()
            .map(|&col| detections[remaining[col]].clone())
            .collect();
        for detection in self.provisional.observe(self.frame_id, leftover) {
            self.spawn(&detection);
        }

        // Step 6: expiry, duplicates and caps
        self.remove_expired();
        self.remove_duplicates();
        self.enforce_cap(TrackState::Tracked, self.params.max_active_tracks);
        self.enforce_cap(TrackState::Lost, self.params.max_lost_tracks);

        for track in self.tracks.iter().filter(|t| t.state == TrackState::Removed) {
            self.match_history.forget(track.track_id);
        }
        self.tracks.retain(|t| t.state != TrackState::Removed);

        self.active_tracks()
    }

    fn reset(&mut self) {
        self.tracks.clear();
        self.provisional.clear();
        self.match_history.clear();
        self.camera.reset();
        self.frame_id = 0;
        self.next_id = self.params.initial_track_id;
    }

    fn active_tracks(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .filter(|t| t.state == TrackState::Tracked)
            .map(STrack::snapshot)
            .collect()
    }

    fn mark_counted(&mut self, track_id: u64) -> bool {
        match self.tracks.iter_mut().find(|t| t.track_id == track_id) {
            Some(track) => {
                track.counted = true;
                true
            }
            None => false,
        }
    }
}
