//! Map scene-camera eye-gaze onto a calibration grid and score it.
//!
//! A head-mounted eye tracker reports gaze in the coordinates of its scene
//! camera, which moves with the head. The pipeline stages are:
//!
//! 1. **Correlate** – bucket gaze samples by scene-video frame.
//! 2. **Register** – match each frame's keypoints against a fixed reference
//!    image and fit a homography with RANSAC.
//! 3. **Chain** – compose the per-frame homography with the fixed
//!    reference→grid homography to carry gaze to grid pixels.
//! 4. **Score** – window the mapped gaze by calibration trial and report
//!    accuracy and precision in degrees of visual angle.
//!
//! # Public API
//! - [`GazePipeline`] and [`PipelineConfig`] as primary entry points
//! - the individual stages ([`correlate()`], [`FrameRegistrar`],
//!   [`build_fixed_chain`], [`TransformChain`], [`TrialScorer`]) for callers
//!   that drive them directly
//! - [`tsv`] readers and writers for the tabular inputs and outputs

mod config;
mod correlate;
mod error;
mod features;
mod frames;
mod gaze;
mod homography;
mod pipeline;
mod reference_chain;
mod registration;
mod scoring;
mod start_cue;
mod transform_chain;
pub mod tsv;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{
    CorrelationConfig, FeatureConfig, FrameBoundaryPolicy, GazeTimeUnit, GridLayout,
    MappingConfig, PipelineConfig, ReferenceChainConfig, RegistrationConfig, ScoringConfig,
    StartCueConfig, WorkerConfig,
};
pub use correlate::{correlate, Correlation};
pub use error::GazeMapError;
pub use features::{match_ratio, Descriptor, FeatureExtractor, Keypoint, KeypointSet, Match};
pub use frames::{load_gray, FrameSource, ImageSequence, InMemoryFrames};
pub use gaze::{FrameGazeGroup, FrameTimestamps, GazeSample};
pub use homography::{
    estimate_homography_dlt, fit_homography_ransac, FitQuality, Homography, HomographyError,
    RansacHomographyConfig, RansacHomographyResult,
};
pub use pipeline::{FrameReport, GazePipeline, MappingRun, ReferenceImages, RunReport};
pub use reference_chain::{build_fixed_chain, build_fixed_chain_from_images, ReferenceChain};
pub use registration::{FrameRegistrar, RegistrationFailure, RegistrationResult};
pub use scoring::{
    summarize_points, CalibrationPoint, PointSummary, ScoreReport, TrialGaze, TrialScorer,
    TrialSummary,
};
pub use start_cue::{task_start_at_frame, StartCueDetector, TaskStart, TaskStartPolicy};
pub use transform_chain::{MappedGazePoint, Space, TransformChain};
