//! Gaze samples, frame timestamps and per-frame gaze groups.

use crate::error::GazeMapError;

/// One gaze sample from the eye tracker, in normalized scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GazeSample {
    /// Eye-tracker clock, in the configured gaze time unit.
    pub timestamp: f64,
    /// Horizontal position in `[0, 1]`, left to right.
    pub norm_x: f64,
    /// Vertical position in `[0, 1]`, top to bottom.
    pub norm_y: f64,
    pub confidence: f64,
}

impl GazeSample {
    /// Position in pixels of a `width × height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> [f64; 2] {
        [self.norm_x * width as f64, self.norm_y * height as f64]
    }
}

/// Capture times of the scene-video frames, indexed by frame number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimestamps {
    ts: Vec<f64>,
}

impl FrameTimestamps {
    /// Validate that timestamps are finite and non-decreasing.
    pub fn new(ts: Vec<f64>) -> Result<Self, GazeMapError> {
        if let Some(i) = ts.iter().position(|t| !t.is_finite()) {
            return Err(GazeMapError::Config(format!(
                "frame timestamp {} is not finite",
                i
            )));
        }
        if let Some(i) = ts.windows(2).position(|w| w[1] < w[0]) {
            return Err(GazeMapError::Config(format!(
                "frame timestamps decrease between frames {} and {} ({} > {})",
                i,
                i + 1,
                ts[i],
                ts[i + 1]
            )));
        }
        Ok(Self { ts })
    }

    pub fn len(&self) -> usize {
        self.ts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ts.is_empty()
    }

    pub fn get(&self, frame_index: usize) -> Option<f64> {
        self.ts.get(frame_index).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.ts
    }
}

/// Gaze samples bucketed by frame. Every frame index has an entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameGazeGroup {
    groups: Vec<Vec<GazeSample>>,
}

impl FrameGazeGroup {
    pub(crate) fn with_frames(n_frames: usize) -> Self {
        Self {
            groups: vec![Vec::new(); n_frames],
        }
    }

    pub(crate) fn push(&mut self, frame_index: usize, sample: GazeSample) {
        self.groups[frame_index].push(sample);
    }

    pub fn n_frames(&self) -> usize {
        self.groups.len()
    }

    /// Samples assigned to `frame_index`, empty when out of range.
    pub fn samples(&self, frame_index: usize) -> &[GazeSample] {
        self.groups
            .get(frame_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of assigned samples across all frames.
    pub fn n_assigned(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    /// `(frame_index, sample)` pairs in frame order, then sample order.
    pub fn iter_assigned(&self) -> impl Iterator<Item = (usize, &GazeSample)> {
        self.groups
            .iter()
            .enumerate()
            .flat_map(|(f, group)| group.iter().map(move |s| (f, s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timestamps_reject_decreasing_sequences() {
        assert!(FrameTimestamps::new(vec![0.0, 0.1, 0.1, 0.2]).is_ok());
        let err = FrameTimestamps::new(vec![0.0, 0.2, 0.1]).unwrap_err();
        assert!(err.to_string().contains("frames 1 and 2"));
        assert!(FrameTimestamps::new(vec![0.0, f64::NAN]).is_err());
    }

    #[test]
    fn normalized_gaze_scales_by_frame_size() {
        let s = GazeSample {
            timestamp: 0.0,
            norm_x: 0.25,
            norm_y: 0.5,
            confidence: 1.0,
        };
        assert_eq!(s.to_pixels(640, 480), [160.0, 240.0]);
    }

    #[test]
    fn out_of_range_frame_has_no_samples() {
        let groups = FrameGazeGroup::with_frames(2);
        assert!(groups.samples(5).is_empty());
        assert_eq!(groups.n_frames(), 2);
    }
}
