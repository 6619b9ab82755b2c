//! Locating the task start in the scene video.
//!
//! Task-log times are relative to the moment a start-cue image appears on
//! screen. The first frame that matches the cue well enough fixes that moment.

use crate::config::StartCueConfig;
use crate::features::{match_ratio, KeypointSet};
use crate::gaze::{FrameGazeGroup, FrameTimestamps};

/// How the task start is determined.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TaskStartPolicy {
    /// Search frames for the start-cue image.
    #[default]
    Detect,
    /// The task started at this frame.
    Frame(usize),
    /// The task started at this time, in the gaze time unit.
    Time(f64),
}

/// The resolved task start.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TaskStart {
    /// Frame the start was taken from, if any.
    pub frame_index: Option<usize>,
    /// Start time in the gaze time unit.
    pub time: f64,
}

/// Matches frames against the start-cue image.
#[derive(Debug, Clone)]
pub struct StartCueDetector {
    cue: KeypointSet,
    min_matches: usize,
    ratio: f32,
}

impl StartCueDetector {
    pub fn new(cue: KeypointSet, config: &StartCueConfig, match_distance_ratio: f32) -> Self {
        Self {
            cue,
            min_matches: config.min_matches,
            ratio: match_distance_ratio,
        }
    }

    /// Ratio-test matches between the cue and a frame.
    pub fn match_count(&self, frame: &KeypointSet) -> usize {
        match_ratio(&self.cue, frame, self.ratio).len()
    }

    pub fn is_visible(&self, match_count: usize) -> bool {
        match_count > self.min_matches
    }
}

/// Task start for a start frame: the first gaze sample assigned to it, or
/// the frame's own timestamp when it has no samples.
pub fn task_start_at_frame(
    frame_index: usize,
    groups: &FrameGazeGroup,
    frame_timestamps: &FrameTimestamps,
) -> Option<TaskStart> {
    let time = groups
        .samples(frame_index)
        .first()
        .map(|s| s.timestamp)
        .or_else(|| frame_timestamps.get(frame_index))?;
    Some(TaskStart {
        frame_index: Some(frame_index),
        time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureConfig, FrameBoundaryPolicy};
    use crate::correlate::correlate;
    use crate::features::FeatureExtractor;
    use crate::gaze::GazeSample;
    use crate::test_utils::textured_image;

    #[test]
    fn cue_is_visible_only_in_matching_frames() {
        let ex = FeatureExtractor::new(FeatureConfig {
            max_features: 500,
            ..Default::default()
        });
        let cue_img = textured_image(320, 240, 41);
        let detector = StartCueDetector::new(ex.extract(&cue_img), &StartCueConfig::default(), 0.5);

        let same = detector.match_count(&ex.extract(&cue_img));
        assert!(detector.is_visible(same), "{} matches", same);
        let other = detector.match_count(&ex.extract(&textured_image(320, 240, 42)));
        assert!(!detector.is_visible(other), "{} matches", other);
    }

    #[test]
    fn task_start_prefers_first_gaze_sample_of_the_frame() {
        let ts = FrameTimestamps::new(vec![0.0, 0.1, 0.2, 0.3]).unwrap();
        let samples: Vec<GazeSample> = [0.07, 0.09, 0.31]
            .map(|t| GazeSample {
                timestamp: t,
                norm_x: 0.5,
                norm_y: 0.5,
                confidence: 1.0,
            })
            .to_vec();
        let c = correlate(&samples, &ts, FrameBoundaryPolicy::FrameMidpoint);

        let start = task_start_at_frame(1, &c.groups, &ts).unwrap();
        assert_eq!(start.time, 0.07);
        // Frame 2 has no samples: fall back to its timestamp.
        let start = task_start_at_frame(2, &c.groups, &ts).unwrap();
        assert_eq!(start.time, 0.2);
        assert!(task_start_at_frame(9, &c.groups, &ts).is_none());
    }
}
