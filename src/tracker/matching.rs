//! Matching utilities for multi-object tracking.
//!
//! Cost matrices are laid out with tracks as rows and detections as columns.
//! Lower cost means a better match; every builder produces values in `[0, 1]`.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;

/// Cost given to pairs that cannot be scored, such as a track without an
/// observed box.
pub const MAX_COST: f32 = 1.0;

/// Relaxed threshold never exceeds this value.
const RELAXED_THRESH_CAP: f32 = 0.9;
const RELAX_FACTOR: f32 = 1.5;

/// Detection input for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Bounding box in normalized coordinates
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
    /// Class label reported by the detector
    pub class: String,
}

impl Detection {
    /// Create an unlabeled detection from TLBR coordinates.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self {
            bbox: Rect::from_tlbr(x1, y1, x2, y2),
            score,
            class: String::new(),
        }
    }

    pub fn from_rect(bbox: Rect, score: f32) -> Self {
        Self {
            bbox,
            score,
            class: String::new(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Zip parallel box, score and class lists into detections.
    ///
    /// The result is as long as the shortest input.
    pub fn batch<S: AsRef<str>>(boxes: &[Rect], scores: &[f32], classes: &[S]) -> Vec<Self> {
        boxes
            .iter()
            .zip(scores)
            .zip(classes)
            .map(|((bbox, &score), class)| Self::from_rect(*bbox, score).with_class(class.as_ref()))
            .collect()
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }
}

fn overlap_distance(
    track_boxes: &[Option<Rect>],
    det_boxes: &[Rect],
    similarity: impl Fn(&Rect, &Rect) -> f32,
) -> Array2<f32> {
    let mut dists = Array2::from_elem((track_boxes.len(), det_boxes.len()), MAX_COST);
    for (i, t) in track_boxes.iter().enumerate() {
        let Some(t) = t else { continue };
        for (j, d) in det_boxes.iter().enumerate() {
            dists[[i, j]] = (1.0 - similarity(t, d)).clamp(0.0, MAX_COST);
        }
    }
    dists
}

/// Compute IoU distance matrix between tracks and detections.
///
/// Tracks without a box get [`MAX_COST`] against every detection.
pub fn iou_distance(track_boxes: &[Option<Rect>], det_boxes: &[Rect]) -> Array2<f32> {
    overlap_distance(track_boxes, det_boxes, Rect::iou)
}

/// `1 - GIoU`, with GIoU rescaled from `[-1, 1]` to `[0, 1]`.
pub fn giou_distance(track_boxes: &[Option<Rect>], det_boxes: &[Rect]) -> Array2<f32> {
    overlap_distance(track_boxes, det_boxes, |a, b| (a.giou(b) + 1.0) / 2.0)
}

/// `1 - DIoU`, with DIoU rescaled from `[-1, 1]` to `[0, 1]`.
pub fn diou_distance(track_boxes: &[Option<Rect>], det_boxes: &[Rect]) -> Array2<f32> {
    overlap_distance(track_boxes, det_boxes, |a, b| (a.diou(b) + 1.0) / 2.0)
}

/// `1 - CIoU`, with CIoU rescaled to `[0, 1]`.
pub fn ciou_distance(track_boxes: &[Option<Rect>], det_boxes: &[Rect]) -> Array2<f32> {
    overlap_distance(track_boxes, det_boxes, |a, b| {
        ((a.ciou(b) + 1.0) / 2.0).clamp(0.0, 1.0)
    })
}

/// Euclidean distance between track positions and detection centers,
/// clamped to `[0, 1]`.
pub fn position_distance(track_centers: &[(f32, f32)], det_boxes: &[Rect]) -> Array2<f32> {
    let mut dists = Array2::from_elem((track_centers.len(), det_boxes.len()), MAX_COST);
    for (i, &(tx, ty)) in track_centers.iter().enumerate() {
        for (j, d) in det_boxes.iter().enumerate() {
            let (dx, dy) = d.center();
            let dist = ((tx - dx).powi(2) + (ty - dy).powi(2)).sqrt();
            if dist.is_finite() {
                dists[[i, j]] = dist.min(MAX_COST);
            }
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentResult {
    /// `(track_index, detection_index)` pairs
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

impl AssignmentResult {
    fn unmatched(num_rows: usize, num_cols: usize) -> Self {
        Self {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        }
    }
}

/// Strategy for turning a cost matrix into track/detection pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSolver {
    /// Threshold-gated greedy approximation, optionally with one relaxed
    /// retry when too few pairs are found.
    Greedy { relax_sparse: bool },
    /// Optimal assignment (Jonker-Volgenant), pairs above the threshold dropped.
    Exact,
}

impl Default for AssignmentSolver {
    fn default() -> Self {
        Self::Greedy { relax_sparse: true }
    }
}

impl AssignmentSolver {
    pub fn solve(&self, cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
        match *self {
            Self::Greedy { relax_sparse } => greedy_assignment(cost_matrix, thresh, relax_sparse),
            Self::Exact => linear_assignment(cost_matrix, thresh),
        }
    }
}

fn greedy_pass(
    cost_matrix: &Array2<f32>,
    thresh: f32,
    row_free: &mut [bool],
    col_free: &mut [bool],
    matches: &mut Vec<(usize, usize)>,
) {
    let mut candidates: Vec<(f32, usize, usize)> = cost_matrix
        .indexed_iter()
        .filter(|&((i, j), &c)| row_free[i] && col_free[j] && c.is_finite() && c <= thresh)
        .map(|((i, j), &c)| (c, i, j))
        .collect();

    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    for (_, i, j) in candidates {
        if row_free[i] && col_free[j] {
            row_free[i] = false;
            col_free[j] = false;
            matches.push((i, j));
        }
    }
}

/// Greedy approximation of the optimal assignment.
///
/// Pairs are accepted lowest cost first while both the row and the column
/// are free and the cost is at most `thresh`. With `relax_sparse`, if fewer
/// than a third of `min(rows, cols)` pairs were found, the leftover rows and
/// columns get one more pass at `1.5 * thresh` (capped at 0.9, never below
/// `thresh`).
pub fn greedy_assignment(cost_matrix: &Array2<f32>, thresh: f32, relax_sparse: bool) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult::unmatched(num_rows, num_cols);
    }

    let mut row_free = vec![true; num_rows];
    let mut col_free = vec![true; num_cols];
    let mut matches = Vec::new();

    greedy_pass(cost_matrix, thresh, &mut row_free, &mut col_free, &mut matches);

    if relax_sparse && matches.len() * 3 < num_rows.min(num_cols) {
        let relaxed = (thresh * RELAX_FACTOR).min(RELAXED_THRESH_CAP).max(thresh);
        if relaxed > thresh {
            greedy_pass(cost_matrix, relaxed, &mut row_free, &mut col_free, &mut matches);
        }
    }

    AssignmentResult {
        matches,
        unmatched_tracks: free_indices(&row_free),
        unmatched_detections: free_indices(&col_free),
    }
}

fn free_indices(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &free)| if free { Some(i) } else { None })
        .collect()
}

/// Optimal assignment via `lapjv` on a padded square matrix.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();
    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult::unmatched(num_rows, num_cols);
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);

    for ((i, j), &c) in cost_matrix.indexed_iter() {
        if c.is_finite() {
            padded[[i, j]] = c as f64;
        }
    }

    let mut matches = vec![];
    let mut unmatched_tracks = vec![];
    let mut col_free = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row_idx, &col_idx) in row_to_col.iter().enumerate().take(num_rows) {
                if col_idx < num_cols
                    && cost_matrix[[row_idx, col_idx]].is_finite()
                    && cost_matrix[[row_idx, col_idx]] <= thresh
                {
                    matches.push((row_idx, col_idx));
                    col_free[col_idx] = false;
                } else {
                    unmatched_tracks.push(row_idx);
                }
            }
        }
        Err(_) => {
            tracing::warn!(size, "lapjv failed, leaving every pair unmatched");
            unmatched_tracks = (0..num_rows).collect();
        }
    }

    AssignmentResult {
        matches,
        unmatched_tracks,
        unmatched_detections: free_indices(&col_free),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_one_to_one(result: &AssignmentResult) {
        let mut rows: Vec<usize> = result.matches.iter().map(|m| m.0).collect();
        let mut cols: Vec<usize> = result.matches.iter().map(|m| m.1).collect();
        rows.sort_unstable();
        cols.sort_unstable();
        rows.dedup();
        cols.dedup();
        assert_eq!(rows.len(), result.matches.len());
        assert_eq!(cols.len(), result.matches.len());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let cost = array![[0.5_f32]];
        let result = greedy_assignment(&cost, 0.5, false);
        assert_eq!(result.matches, vec![(0, 0)]);

        let result = greedy_assignment(&cost, 0.5 - 1e-4, false);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_greedy_picks_lowest_cost_first() {
        let cost = array![[0.1_f32, 0.2], [0.15, 0.9]];
        let result = greedy_assignment(&cost, 0.5, false);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
        assert_eq!(result.unmatched_detections, vec![1]);
    }

    #[test]
    fn test_greedy_never_matches_twice() {
        let cost = array![
            [0.1_f32, 0.1, 0.1],
            [0.1, 0.1, 0.1],
            [0.1, 0.1, 0.1],
            [0.1, 0.1, 0.1]
        ];
        let result = greedy_assignment(&cost, 0.5, true);
        assert_eq!(result.matches.len(), 3);
        assert_one_to_one(&result);
        assert_eq!(result.unmatched_tracks, vec![3]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_sparse_result_triggers_relaxed_pass() {
        // Nothing under 0.4, but 0.55 is under the relaxed 0.6
        let cost = array![[0.55_f32, 1.0], [1.0, 0.65]];
        let strict = greedy_assignment(&cost, 0.4, false);
        assert!(strict.matches.is_empty());

        let relaxed = greedy_assignment(&cost, 0.4, true);
        assert_eq!(relaxed.matches, vec![(0, 0)]);
        assert_eq!(relaxed.unmatched_tracks, vec![1]);
    }

    #[test]
    fn test_relaxed_threshold_is_capped() {
        let cost = array![[0.95_f32]];
        let result = greedy_assignment(&cost, 0.8, true);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_relaxation_skipped_when_enough_matches() {
        let cost = array![[0.1_f32, 1.0, 1.0], [1.0, 0.5, 1.0], [1.0, 1.0, 0.5]];
        let result = greedy_assignment(&cost, 0.4, true);
        assert_eq!(result.matches, vec![(0, 0)]);
    }

    #[test]
    fn test_empty_inputs_short_circuit() {
        let no_tracks = Array2::<f32>::zeros((0, 3));
        let result = greedy_assignment(&no_tracks, 0.5, true);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_detections, vec![0, 1, 2]);

        let no_dets = Array2::<f32>::zeros((2, 0));
        let result = AssignmentSolver::Exact.solve(&no_dets, 0.5);
        assert_eq!(result.unmatched_tracks, vec![0, 1]);
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_exact_solver_finds_optimum() {
        let cost = array![[0.1_f32, 0.2], [0.15, 0.9]];
        let result = AssignmentSolver::Exact.solve(&cost, 0.5);
        let mut matches = result.matches.clone();
        matches.sort_unstable();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_iou_distance_missing_box_gets_max_cost() {
        let dets = [Rect::new(0.1, 0.1, 0.2, 0.2)];
        let dists = iou_distance(&[None, Some(dets[0])], &dets);
        assert_eq!(dists[[0, 0]], MAX_COST);
        assert!(dists[[1, 0]].abs() < 1e-6);
    }

    #[test]
    fn test_variant_distances_are_bounded() {
        let tracks = [Some(Rect::new(0.0, 0.0, 0.1, 0.3))];
        let dets = [Rect::new(0.0, 0.0, 0.1, 0.3), Rect::new(0.8, 0.8, 0.2, 0.05)];
        for dists in [
            giou_distance(&tracks, &dets),
            diou_distance(&tracks, &dets),
            ciou_distance(&tracks, &dets),
        ] {
            assert!(dists[[0, 0]] < 1e-5);
            assert!(dists[[0, 1]] > 0.5 && dists[[0, 1]] <= 1.0);
        }
    }

    #[test]
    fn test_position_distance_is_clamped() {
        let dets = [Rect::from_center(0.5, 0.5, 0.1, 0.1), Rect::from_center(5.0, 5.0, 0.1, 0.1)];
        let dists = position_distance(&[(0.5, 0.6)], &dets);
        assert!((dists[[0, 0]] - 0.1).abs() < 1e-5);
        assert_eq!(dists[[0, 1]], 1.0);
    }

    #[test]
    fn test_detection_batch_truncates() {
        let boxes = [Rect::new(0.0, 0.0, 0.1, 0.1), Rect::new(0.2, 0.2, 0.1, 0.1)];
        let dets = Detection::batch(&boxes, &[0.9, 0.8], &["fish"]);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class, "fish");
    }
}
