//! Temporal correlation of gaze samples to video frames.
//!
//! A single forward pass over time-sorted samples and frame timestamps
//! assigns each sample to the frame whose bucket closes after it. Samples
//! past the last usable boundary are dropped and counted.

use crate::config::FrameBoundaryPolicy;
use crate::gaze::{FrameGazeGroup, FrameTimestamps, GazeSample};

/// Outcome of bucketing a gaze stream by frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correlation {
    pub groups: FrameGazeGroup,
    /// Samples after the last frame boundary (or with a non-finite timestamp).
    pub dropped: usize,
}

fn boundary(ts: &[f64], f: usize, policy: FrameBoundaryPolicy) -> f64 {
    match policy {
        FrameBoundaryPolicy::FrameMidpoint => (ts[f] + ts[f + 1]) / 2.0,
        FrameBoundaryPolicy::NextFrameStart => ts[f + 1],
    }
}

/// Assign every sample to at most one frame.
///
/// Samples are sorted by timestamp first, so assigned frame indices are
/// non-decreasing in sample time. With fewer than two frame timestamps no
/// boundary exists and every sample is dropped.
pub fn correlate(
    samples: &[GazeSample],
    frame_timestamps: &FrameTimestamps,
    policy: FrameBoundaryPolicy,
) -> Correlation {
    let ts = frame_timestamps.as_slice();
    let mut groups = FrameGazeGroup::with_frames(ts.len());

    let mut sorted: Vec<GazeSample> = samples
        .iter()
        .filter(|s| s.timestamp.is_finite())
        .copied()
        .collect();
    let non_finite = samples.len() - sorted.len();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut assigned = 0usize;
    if ts.len() >= 2 {
        let mut f = 0usize;
        let mut i = 0usize;
        while i < sorted.len() && f + 1 < ts.len() {
            if sorted[i].timestamp <= boundary(ts, f, policy) {
                groups.push(f, sorted[i]);
                assigned += 1;
                i += 1;
            } else {
                f += 1;
            }
        }
    }

    let dropped = samples.len() - assigned;
    if dropped > 0 {
        tracing::info!(
            "Correlator: dropped {} of {} gaze samples past the last frame boundary ({} non-finite)",
            dropped,
            samples.len(),
            non_finite
        );
    }
    Correlation { groups, dropped }
}
