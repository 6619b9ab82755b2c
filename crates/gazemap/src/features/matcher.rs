//! Brute-force k=2 Hamming matching with a distance-ratio test.

use super::{Descriptor, KeypointSet};

/// An accepted correspondence between a query and a train keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Two nearest train descriptors of `d` as `(index, distance)`.
fn two_nearest(d: &Descriptor, train: &[Descriptor]) -> Option<((usize, u32), u32)> {
    let mut best = (usize::MAX, u32::MAX);
    let mut second = u32::MAX;
    for (j, t) in train.iter().enumerate() {
        let dist = d.hamming(t);
        if dist < best.1 {
            second = best.1;
            best = (j, dist);
        } else if dist < second {
            second = dist;
        }
    }
    (best.0 != usize::MAX && second != u32::MAX).then_some((best, second))
}

/// Match every query descriptor against its two nearest train descriptors and
/// keep it when `nearest < ratio * second_nearest`.
///
/// Returns no matches when `train` holds fewer than two descriptors.
pub fn match_ratio(query: &KeypointSet, train: &KeypointSet, ratio: f32) -> Vec<Match> {
    if train.descriptors.len() < 2 {
        return Vec::new();
    }
    query
        .descriptors
        .iter()
        .enumerate()
        .filter_map(|(i, d)| {
            let ((j, d1), d2) = two_nearest(d, &train.descriptors)?;
            ((d1 as f32) < ratio * (d2 as f32)).then_some(Match {
                query: i,
                train: j,
                distance: d1,
            })
        })
        .collect()
}
