//! Holding area for detections that have not yet earned a track identity.
//!
//! A detection becomes a track only after it has been seen on `min_frames`
//! consecutive frames near the same place. Single-frame false positives
//! never consume an id.

use crate::config::ProvisionalParams;
use crate::tracker::matching::Detection;

#[derive(Debug, Clone)]
pub struct ProvisionalCandidate {
    /// Most recent detection matched to this candidate
    pub detection: Detection,
    /// Consecutive frames seen
    pub hits: u32,
    pub first_frame: u32,
    pub last_frame: u32,
}

#[derive(Debug, Clone)]
pub struct ProvisionalBuffer {
    params: ProvisionalParams,
    candidates: Vec<ProvisionalCandidate>,
}

impl ProvisionalBuffer {
    pub fn new(params: ProvisionalParams) -> Self {
        Self {
            params,
            candidates: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[ProvisionalCandidate] {
        &self.candidates
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Feed the detections no track claimed this frame; returns those whose
    /// candidates are ready to become tracks.
    pub fn observe(&mut self, frame_id: u32, detections: Vec<Detection>) -> Vec<Detection> {
        let mut detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| d.score >= self.params.min_confidence && d.bbox.is_finite())
            .collect();
        detections.sort_by(|a, b| b.score.total_cmp(&a.score));

        let max_sq = self.params.match_distance * self.params.match_distance;
        let mut claimed = vec![false; self.candidates.len()];
        let mut fresh = Vec::new();

        for detection in detections {
            let (dx, dy) = detection.center();
            let nearest = self
                .candidates
                .iter()
                .enumerate()
                .filter(|(i, c)| !claimed[*i] && c.last_frame < frame_id)
                .map(|(i, c)| {
                    let (cx, cy) = c.detection.center();
                    (i, (cx - dx).powi(2) + (cy - dy).powi(2))
                })
                .filter(|(_, d_sq)| *d_sq <= max_sq)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((i, _)) => {
                    claimed[i] = true;
                    let candidate = &mut self.candidates[i];
                    candidate.hits = if candidate.last_frame + 1 == frame_id {
                        candidate.hits + 1
                    } else {
                        1
                    };
                    candidate.last_frame = frame_id;
                    candidate.detection = detection;
                }
                None => fresh.push(ProvisionalCandidate {
                    detection,
                    hits: 1,
                    first_frame: frame_id,
                    last_frame: frame_id,
                }),
            }
        }
        self.candidates.extend(fresh);

        let min_frames = self.params.min_frames.max(1);
        let mut promoted = Vec::new();
        let max_missed = self.params.max_missed_frames;
        self.candidates.retain(|c| {
            if c.last_frame == frame_id && c.hits >= min_frames {
                promoted.push(c.detection.clone());
                false
            } else {
                frame_id - c.last_frame <= max_missed
            }
        });

        if self.candidates.len() > self.params.max_candidates {
            self.candidates.sort_by(|a, b| {
                b.last_frame
                    .cmp(&a.last_frame)
                    .then(b.detection.score.total_cmp(&a.detection.score))
            });
            self.candidates.truncate(self.params.max_candidates);
        }

        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::rect::Rect;

    fn detection_at(cx: f32, cy: f32, score: f32) -> Detection {
        Detection::from_rect(Rect::from_center(cx, cy, 0.1, 0.1), score)
    }

    #[test]
    fn test_single_frame_detection_is_not_promoted() {
        let mut buffer = ProvisionalBuffer::new(ProvisionalParams::default());
        assert!(buffer.observe(1, vec![detection_at(0.5, 0.5, 0.9)]).is_empty());
        assert_eq!(buffer.len(), 1);
        for frame in 2..=4 {
            assert!(buffer.observe(frame, vec![]).is_empty());
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_consecutive_detections_are_promoted() {
        let mut buffer = ProvisionalBuffer::new(ProvisionalParams::default());
        buffer.observe(1, vec![detection_at(0.5, 0.5, 0.9)]);
        let promoted = buffer.observe(2, vec![detection_at(0.5, 0.55, 0.8)]);
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].score, 0.8);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_gap_restarts_the_streak() {
        let mut buffer = ProvisionalBuffer::new(ProvisionalParams::default());
        buffer.observe(1, vec![detection_at(0.5, 0.5, 0.9)]);
        assert!(buffer.observe(3, vec![detection_at(0.5, 0.5, 0.9)]).is_empty());
        assert_eq!(buffer.candidates()[0].hits, 1);
        assert_eq!(buffer.observe(4, vec![detection_at(0.5, 0.5, 0.9)]).len(), 1);
    }

    #[test]
    fn test_far_detection_starts_new_candidate() {
        let mut buffer = ProvisionalBuffer::new(ProvisionalParams::default());
        buffer.observe(1, vec![detection_at(0.2, 0.2, 0.9)]);
        assert!(buffer.observe(2, vec![detection_at(0.8, 0.8, 0.9)]).is_empty());
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_low_confidence_is_ignored() {
        let mut buffer = ProvisionalBuffer::new(ProvisionalParams::default());
        buffer.observe(1, vec![detection_at(0.5, 0.5, 0.1)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_candidates_are_capped() {
        let params = ProvisionalParams {
            max_candidates: 3,
            ..ProvisionalParams::default()
        };
        let mut buffer = ProvisionalBuffer::new(params);
        let detections = (0..10)
            .map(|i| detection_at(0.05 + 0.09 * i as f32, 0.5, 0.5 + 0.01 * i as f32))
            .collect();
        buffer.observe(1, detections);
        assert_eq!(buffer.len(), 3);
        assert!(buffer.candidates().iter().all(|c| c.detection.score > 0.56));
    }
}
