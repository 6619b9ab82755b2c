use crate::correlate::Correlation;
use crate::reference_chain::ReferenceChain;
use crate::registration::{RegistrationFailure, RegistrationResult};
use crate::start_cue::TaskStart;
use crate::transform_chain::MappedGazePoint;

/// Registration outcome of one processed frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FrameReport {
    pub frame_index: usize,
    pub timestamp: Option<f64>,
    pub success: bool,
    pub match_count: usize,
    pub n_inliers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RegistrationFailure>,
    /// Gaze samples assigned to this frame.
    pub gaze_samples: usize,
    /// Start-cue matches, for frames searched before the cue was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_cue_matches: Option<usize>,
}

impl FrameReport {
    pub(super) fn new(
        frame_index: usize,
        timestamp: Option<f64>,
        registration: &RegistrationResult,
        gaze_samples: usize,
        start_cue_matches: Option<usize>,
    ) -> Self {
        Self {
            frame_index,
            timestamp,
            success: registration.success,
            match_count: registration.match_count,
            n_inliers: registration.n_inliers,
            failure: registration.failure.clone(),
            gaze_samples,
            start_cue_matches,
        }
    }
}

/// Everything the frame loop produced for one recording.
#[derive(Debug, Clone)]
pub struct MappingRun {
    pub reference_chain: ReferenceChain,
    pub correlation: Correlation,
    pub frames: Vec<FrameReport>,
    /// Mapped gaze in frame order, then sample order.
    pub mapped: Vec<MappedGazePoint>,
    pub task_start: Option<TaskStart>,
}

impl MappingRun {
    pub fn frames_registered(&self) -> usize {
        self.frames.iter().filter(|f| f.success).count()
    }

    /// Mapped points with a calibration-grid coordinate.
    pub fn valid_points(&self) -> usize {
        self.mapped.iter().filter(|p| p.grid.is_some()).count()
    }

    pub fn report(&self) -> RunReport<'_> {
        RunReport {
            reference_chain: &self.reference_chain,
            task_start: self.task_start,
            frames_processed: self.frames.len(),
            frames_registered: self.frames_registered(),
            gaze_samples_dropped: self.correlation.dropped,
            mapped_points: self.mapped.len(),
            valid_points: self.valid_points(),
            frames: &self.frames,
        }
    }
}

/// JSON-serializable summary of a [`MappingRun`].
#[derive(Debug, serde::Serialize)]
pub struct RunReport<'a> {
    pub reference_chain: &'a ReferenceChain,
    pub task_start: Option<TaskStart>,
    pub frames_processed: usize,
    pub frames_registered: usize,
    pub gaze_samples_dropped: usize,
    pub mapped_points: usize,
    pub valid_points: usize,
    pub frames: &'a [FrameReport],
}
