//! End-to-end gaze mapping and calibration scoring.
//!
//! Stages, in order:
//! - reference chain: keypoints of both reference images, fixed homography
//! - correlation: gaze samples bucketed by frame
//! - frame loop: sequential decode into batches, parallel registration on a
//!   rayon pool, ordered reassembly, start-cue search, gaze mapping
//! - scoring: trial windows against the task log
//!
//! Only setup failures are errors; they are wrapped with the stage name.

mod result;
mod run;

pub use result::{FrameReport, MappingRun, RunReport};
pub use run::{GazePipeline, ReferenceImages};
