//! Cost adjustments and lifecycle heuristics for the ByteTrack-style tracker.
//!
//! All biases are multiplicative reductions applied only to pairs that are
//! already scored (cost below [`MAX_COST`]), so they reorder plausible matches
//! without inventing new ones.

use std::collections::{HashMap, VecDeque};

use ndarray::Array2;

use crate::config::{CameraMotionParams, HeuristicParams, TtlBands};
use crate::tracker::matching::MAX_COST;

type Vec2 = (f32, f32);

#[inline]
fn dot(a: Vec2, b: Vec2) -> f32 {
    a.0 * b.0 + a.1 * b.1
}

#[inline]
fn norm(a: Vec2) -> f32 {
    dot(a, a).sqrt()
}

/// Cosine of the angle between `a` and `b`; zero if either is (near) zero.
pub fn cosine(a: Vec2, b: Vec2) -> f32 {
    let denom = norm(a) * norm(b);
    if denom > 1e-9 { dot(a, b) / denom } else { 0.0 }
}

/// Estimates global frame-to-frame motion from detection centers.
///
/// Current centers are paired with their nearest neighbor in the previous
/// frame; only pairs moving along (or not against) the expected direction
/// contribute. The averaged displacement is exponentially smoothed and
/// clamped, and reported as camera motion, i.e. the negated apparent flow.
#[derive(Debug, Clone)]
pub struct CameraMotionEstimator {
    params: CameraMotionParams,
    direction: Vec2,
    previous_centers: Vec<Vec2>,
    flow: Vec2,
}

impl CameraMotionEstimator {
    pub fn new(params: CameraMotionParams, direction: Vec2) -> Self {
        Self {
            params,
            direction,
            previous_centers: Vec::new(),
            flow: (0.0, 0.0),
        }
    }

    /// Feed this frame's centers, returning the camera motion estimate.
    pub fn estimate(&mut self, centers: &[Vec2]) -> Vec2 {
        if !self.params.enabled {
            return (0.0, 0.0);
        }

        let max_sq = self.params.max_pair_distance * self.params.max_pair_distance;
        let mut sum = (0.0, 0.0);
        let mut pairs = 0usize;
        for &(cx, cy) in centers {
            let nearest = self
                .previous_centers
                .iter()
                .map(|&(px, py)| ((cx - px, cy - py), (cx - px).powi(2) + (cy - py).powi(2)))
                .filter(|(_, d_sq)| *d_sq <= max_sq)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((d, _)) = nearest {
                if dot(d, self.direction) >= 0.0 {
                    sum.0 += d.0;
                    sum.1 += d.1;
                    pairs += 1;
                }
            }
        }

        let s = self.params.smoothing;
        self.flow = if pairs > 0 {
            let avg = (sum.0 / pairs as f32, sum.1 / pairs as f32);
            (s * self.flow.0 + (1.0 - s) * avg.0, s * self.flow.1 + (1.0 - s) * avg.1)
        } else {
            (self.flow.0 * s, self.flow.1 * s)
        };

        let magnitude = norm(self.flow);
        if magnitude > self.params.max_motion && magnitude > 0.0 {
            let scale = self.params.max_motion / magnitude;
            self.flow = (self.flow.0 * scale, self.flow.1 * scale);
        }

        self.previous_centers.clear();
        self.previous_centers.extend_from_slice(centers);
        self.camera_motion()
    }

    #[inline]
    pub fn camera_motion(&self) -> Vec2 {
        (-self.flow.0, -self.flow.1)
    }

    pub fn reset(&mut self) {
        self.previous_centers.clear();
        self.flow = (0.0, 0.0);
    }
}

/// Offset to add to a track's predicted center to undo camera motion.
///
/// On each axis where the track's own velocity already points along the
/// apparent flow, the correction shrinks by `damping * min(|v| / |flow|, 1)`.
pub fn compensation_offset(camera_motion: Vec2, velocity: Vec2, damping: f32) -> Vec2 {
    let axis = |camera: f32, v: f32| {
        let flow = -camera;
        if flow == 0.0 {
            return 0.0;
        }
        if v * flow > 0.0 {
            let explained = (v.abs() / flow.abs()).min(1.0);
            flow * (1.0 - damping * explained)
        } else {
            flow
        }
    };
    (
        axis(camera_motion.0, velocity.0),
        axis(camera_motion.1, velocity.1),
    )
}

/// Recently matched detection cells per track.
///
/// Each track keeps at most `capacity` cells and at most `max_tracks` tracks
/// are remembered; both evict oldest first.
#[derive(Debug, Clone)]
pub struct MatchHistory {
    capacity: usize,
    cell_size: f32,
    max_tracks: usize,
    cells: HashMap<u64, VecDeque<(i32, i32)>>,
    order: VecDeque<u64>,
}

impl MatchHistory {
    pub fn new(params: &HeuristicParams) -> Self {
        Self {
            capacity: params.history_capacity.max(1),
            cell_size: if params.history_cell_size > 0.0 {
                params.history_cell_size
            } else {
                0.05
            },
            max_tracks: params.max_history_tracks.max(1),
            cells: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn cell(&self, center: Vec2) -> (i32, i32) {
        (
            (center.0 / self.cell_size).floor() as i32,
            (center.1 / self.cell_size).floor() as i32,
        )
    }

    pub fn record(&mut self, track_id: u64, center: Vec2) {
        let cell = self.cell(center);
        if !self.cells.contains_key(&track_id) {
            self.order.push_back(track_id);
            while self.order.len() > self.max_tracks {
                if let Some(evicted) = self.order.pop_front() {
                    self.cells.remove(&evicted);
                }
            }
        }
        let cells = self.cells.entry(track_id).or_default();
        if cells.contains(&cell) {
            return;
        }
        cells.push_back(cell);
        while cells.len() > self.capacity {
            cells.pop_front();
        }
    }

    pub fn contains(&self, track_id: u64, center: Vec2) -> bool {
        let cell = self.cell(center);
        self.cells
            .get(&track_id)
            .is_some_and(|cells| cells.contains(&cell))
    }

    pub fn forget(&mut self, track_id: u64) {
        if self.cells.remove(&track_id).is_some() {
            self.order.retain(|&id| id != track_id);
        }
    }

    pub fn tracked_ids(&self) -> usize {
        self.cells.len()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.order.clear();
    }
}

/// Favor detections landing in cells a track was recently matched in.
pub fn apply_match_history_bias(
    cost: &mut Array2<f32>,
    track_ids: &[u64],
    det_centers: &[Vec2],
    history: &MatchHistory,
    bonus: f32,
) {
    for (i, &track_id) in track_ids.iter().enumerate() {
        for (j, &center) in det_centers.iter().enumerate() {
            let c = &mut cost[[i, j]];
            if *c < MAX_COST && history.contains(track_id, center) {
                *c *= 1.0 - bonus;
            }
        }
    }
}

/// Favor pairs whose displacement and/or track velocity follow the expected
/// direction, with an extra reduction when displacement and velocity agree.
pub fn apply_directional_bias(
    cost: &mut Array2<f32>,
    track_positions: &[Vec2],
    track_velocities: &[Vec2],
    det_centers: &[Vec2],
    direction: Vec2,
    params: &HeuristicParams,
) {
    for (i, (&pos, &velocity)) in track_positions.iter().zip(track_velocities).enumerate() {
        let vel_cos = cosine(velocity, direction);
        for (j, &center) in det_centers.iter().enumerate() {
            let c = &mut cost[[i, j]];
            if *c >= MAX_COST {
                continue;
            }
            let displacement = (center.0 - pos.0, center.1 - pos.1);
            let disp_cos = cosine(displacement, direction);

            let mut bias = 0.0;
            if disp_cos > params.min_alignment {
                bias += params.direction_bonus * disp_cos;
            }
            if vel_cos > params.min_alignment {
                bias += 0.5 * params.direction_bonus * vel_cos;
            }
            if cosine(displacement, velocity) > params.strong_alignment_cos {
                bias += params.strong_alignment_bonus;
            }
            *c *= 1.0 - bias.clamp(0.0, params.max_direction_bias);
        }
    }
}

/// For each detection, favor its single closest track when it is very close.
pub fn apply_proximity_bias(
    cost: &mut Array2<f32>,
    track_positions: &[Vec2],
    det_centers: &[Vec2],
    params: &HeuristicParams,
) {
    let thresh_sq = params.proximity_distance * params.proximity_distance;
    for (j, &(dx, dy)) in det_centers.iter().enumerate() {
        let closest = track_positions
            .iter()
            .enumerate()
            .map(|(i, &(tx, ty))| (i, (tx - dx).powi(2) + (ty - dy).powi(2)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((i, d_sq)) = closest {
            let c = &mut cost[[i, j]];
            if d_sq < thresh_sq && *c < MAX_COST {
                *c *= 1.0 - params.proximity_bonus;
            }
        }
    }
}

/// Whether moving from `from` to `to` advances along `direction` by more
/// than `min_step`.
pub fn moved_in_direction(from: Vec2, to: Vec2, direction: Vec2, min_step: f32) -> bool {
    dot((to.0 - from.0, to.1 - from.1), direction) > min_step
}

/// Time-to-live for a track given its movement statistics.
pub fn adaptive_ttl(consistency: f32, expected_moves: u32, bands: &TtlBands) -> u32 {
    if consistency >= bands.high_consistency && expected_moves >= bands.high_moves {
        bands.high_ttl
    } else if consistency >= bands.medium_consistency && expected_moves >= bands.medium_moves {
        bands.medium_ttl
    } else {
        bands.low_ttl
    }
}
