//! Reprojection-error summaries for fitted homographies.

use std::cmp::Ordering;

use serde::Serialize;

use super::core::RansacHomographyResult;

/// Mean and 95th-percentile of an error list. Sorts `errors` in place.
pub(crate) fn mean_and_p95(errors: &mut [f64]) -> (f64, f64) {
    if errors.is_empty() {
        return (0.0, 0.0);
    }
    errors.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mean = errors.iter().sum::<f64>() / errors.len() as f64;
    let idx = ((errors.len() as f64 * 0.95) as usize).min(errors.len() - 1);
    (mean, errors[idx])
}

/// Errors of the correspondences flagged as inliers.
pub(crate) fn collect_masked_inlier_errors(errors: &[f64], inlier_mask: &[bool]) -> Vec<f64> {
    inlier_mask
        .iter()
        .zip(errors.iter())
        .filter_map(|(&is_inlier, &err)| (is_inlier && err.is_finite()).then_some(err))
        .collect()
}

/// Inlier support and reprojection quality of a RANSAC fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FitQuality {
    pub n_correspondences: usize,
    pub n_inliers: usize,
    pub mean_err_px: f64,
    pub p95_err_px: f64,
}

impl FitQuality {
    pub(crate) fn from_ransac(result: &RansacHomographyResult) -> Self {
        let mut inlier_errors = collect_masked_inlier_errors(&result.errors, &result.inlier_mask);
        let (mean_err_px, p95_err_px) = mean_and_p95(&mut inlier_errors);
        Self {
            n_correspondences: result.errors.len(),
            n_inliers: result.n_inliers,
            mean_err_px,
            p95_err_px,
        }
    }
}
