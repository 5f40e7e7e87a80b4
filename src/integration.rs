//! Glue between an external object detector and the trackers.
//!
//! The detector itself is out of scope: anything that produces normalized
//! boxes, scores and class labels per frame can implement [`DetectionSource`].

mod builder;
mod detector;
mod pipeline;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, IntoDetections};
pub use pipeline::TrackerPipeline;
