//! Mapping gaze from video-frame pixels to calibration-grid pixels.
//!
//! frame → reference uses the inverse of the frame's reference→frame
//! registration; reference → grid uses the fixed chain. Both stages run in
//! full precision and only the reported coordinates are rounded.

use crate::gaze::GazeSample;
use crate::homography::Homography;
use crate::registration::RegistrationResult;

/// Coordinate spaces a gaze point passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    Frame,
    Reference,
    Grid,
}

/// One gaze sample expressed in every space it could reach.
///
/// `None` marks a coordinate that has no value, e.g. because the frame was
/// not registered or the sample failed the confidence gate.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MappedGazePoint {
    pub frame_index: usize,
    pub timestamp: f64,
    pub confidence: f64,
    pub frame: Option<[f64; 2]>,
    pub reference: Option<[f64; 2]>,
    pub grid: Option<[f64; 2]>,
}

fn round_px(p: [f64; 2]) -> [f64; 2] {
    [p[0].round(), p[1].round()]
}

/// The fixed half of the chain, shared by every frame.
#[derive(Debug, Clone, Copy)]
pub struct TransformChain {
    grid_from_reference: Homography,
}

impl TransformChain {
    pub fn new(grid_from_reference: Homography) -> Self {
        Self {
            grid_from_reference,
        }
    }

    /// frame→reference for a registered frame, `None` otherwise.
    pub fn reference_from_frame(registration: &RegistrationResult) -> Option<Homography> {
        if !registration.success {
            return None;
        }
        registration.transform.as_ref()?.try_inverse()
    }

    /// Carry `point` from `source` to the reference and grid spaces.
    ///
    /// Returns `(reference, grid)`, each rounded to whole pixels; a stage
    /// whose transform is missing, and every stage after it, is `None`.
    pub fn map_point(
        &self,
        point: [f64; 2],
        source: Space,
        reference_from_frame: Option<&Homography>,
    ) -> (Option<[f64; 2]>, Option<[f64; 2]>) {
        let reference = match source {
            Space::Frame => reference_from_frame.and_then(|h| h.map_point(point)),
            Space::Reference => Some(point),
            Space::Grid => return (None, Some(round_px(point))),
        };
        let grid = reference.and_then(|r| self.grid_from_reference.map_point(r));
        (reference.map(round_px), grid.map(round_px))
    }

    /// Map every sample of one frame.
    ///
    /// Samples below `min_confidence` keep their timestamp and confidence but
    /// get no coordinates.
    pub fn map_frame_gaze(
        &self,
        frame_index: usize,
        samples: &[GazeSample],
        frame_size: (u32, u32),
        registration: &RegistrationResult,
        min_confidence: Option<f64>,
    ) -> Vec<MappedGazePoint> {
        let reference_from_frame = Self::reference_from_frame(registration);
        samples
            .iter()
            .map(|s| {
                let gated = min_confidence.is_some_and(|min| !(s.confidence >= min));
                let frame = (!gated).then(|| s.to_pixels(frame_size.0, frame_size.1));
                let (reference, grid) = match frame {
                    Some(p) => self.map_point(p, Space::Frame, reference_from_frame.as_ref()),
                    None => (None, None),
                };
                MappedGazePoint {
                    frame_index,
                    timestamp: s.timestamp,
                    confidence: s.confidence,
                    frame,
                    reference,
                    grid,
                }
            })
            .collect()
    }
}
