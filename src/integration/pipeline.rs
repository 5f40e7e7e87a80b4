//! TrackerPipeline for combining detection with tracking.

use tracing::debug;

use crate::config::TrackingConfig;
use crate::tracker::{TrackSnapshot, Tracker, build_tracker};

use super::DetectionSource;

/// Runs a `DetectionSource` and feeds its output into the tracker selected
/// by the configuration.
pub struct TrackerPipeline<D: DetectionSource> {
    detector: D,
    tracker: Box<dyn Tracker>,
}

impl<D: DetectionSource> TrackerPipeline<D> {
    pub fn new(detector: D, config: &TrackingConfig) -> Self {
        Self {
            detector,
            tracker: build_tracker(config),
        }
    }

    pub fn with_default_config(detector: D) -> Self {
        Self::new(detector, &TrackingConfig::default())
    }

    /// Detect on one frame and return the active tracks.
    pub fn process_frame(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<TrackSnapshot>, D::Error> {
        let detections = self.detector.detect(input, width, height)?;
        debug!(detections = detections.len(), "frame detected");
        Ok(self.tracker.update(detections))
    }

    /// Forwarded from the counting side once a track has been counted.
    pub fn mark_counted(&mut self, track_id: u64) -> bool {
        self.tracker.mark_counted(track_id)
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut D {
        &mut self.detector
    }

    pub fn tracker(&self) -> &dyn Tracker {
        self.tracker.as_ref()
    }

    pub fn tracker_mut(&mut self) -> &mut dyn Tracker {
        self.tracker.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerKind;
    use crate::tracker::{Detection, Rect};

    struct MockDetector {
        frame: u32,
    }

    impl DetectionSource for MockDetector {
        type Error = std::convert::Infallible;

        fn detect(
            &mut self,
            _input: &[u8],
            _width: u32,
            _height: u32,
        ) -> Result<Vec<Detection>, Self::Error> {
            self.frame += 1;
            let cy = 0.2 + 0.03 * self.frame as f32;
            Ok(vec![
                Detection::from_rect(Rect::from_center(0.5, cy, 0.1, 0.2), 0.9).with_class("fish"),
            ])
        }
    }

    #[test]
    fn test_tracker_pipeline() {
        let mut pipeline = TrackerPipeline::with_default_config(MockDetector { frame: 0 });

        // The first sighting is held back until it is confirmed
        assert!(pipeline.process_frame(&[], 640, 480).unwrap().is_empty());
        let tracks = pipeline.process_frame(&[], 640, 480).unwrap();
        assert_eq!(tracks.len(), 1);

        let id = tracks[0].track_id;
        assert!(pipeline.mark_counted(id));
        let tracks = pipeline.process_frame(&[], 640, 480).unwrap();
        assert!(tracks[0].counted);
        assert_eq!(pipeline.detector().frame, 3);
    }

    #[test]
    fn test_pipeline_with_ocsort() {
        let config = TrackingConfig::default().with_algorithm(TrackerKind::OcSort);
        let mut pipeline = TrackerPipeline::new(MockDetector { frame: 0 }, &config);
        let tracks = pipeline.process_frame(&[], 640, 480).unwrap();
        assert_eq!(tracks.len(), 1);

        pipeline.reset();
        assert!(pipeline.tracker().active_tracks().is_empty());
    }
}
