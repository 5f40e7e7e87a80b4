//! Trait for object detection backends.

use crate::tracker::Detection;

/// Source of per-frame detections.
///
/// Implement this trait to feed any detection model into a tracker.
///
/// # Example
///
/// ```ignore
/// use fishtrack_rs::{Detection, DetectionSource};
///
/// struct MyDetector {
///     // Your model here
/// }
///
/// impl DetectionSource for MyDetector {
///     type Error = std::io::Error;
///
///     fn detect(&mut self, input: &[u8], width: u32, height: u32) -> Result<Vec<Detection>, Self::Error> {
///         // Run inference, normalize boxes by width and height
///         Ok(vec![])
///     }
/// }
/// ```
pub trait DetectionSource {
    type Error;

    /// Run inference on raw image data.
    ///
    /// Returned boxes must be normalized to `[0, 1]` by `width` and `height`.
    fn detect(
        &mut self,
        input: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<Detection>, Self::Error>;
}

/// Conversion from model-specific outputs to `Detection`.
pub trait IntoDetections {
    fn into_detections(self) -> Vec<Detection>;
}

impl IntoDetections for Vec<Detection> {
    fn into_detections(self) -> Vec<Detection> {
        self
    }
}

/// Parallel box, score and class lists, as many detectors emit them.
impl<S: AsRef<str>> IntoDetections for (Vec<crate::tracker::Rect>, Vec<f32>, Vec<S>) {
    fn into_detections(self) -> Vec<Detection> {
        let (boxes, scores, classes) = self;
        Detection::batch(&boxes, &scores, &classes)
    }
}
