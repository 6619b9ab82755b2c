//! Fixed homography between the two static reference images.
//!
//! Computed once per recording. Without it no gaze point can reach the
//! calibration grid, so every failure here is fatal.

use image::GrayImage;

use crate::config::{ReferenceChainConfig, RegistrationConfig};
use crate::error::GazeMapError;
use crate::features::{match_ratio, FeatureExtractor, KeypointSet};
use crate::homography::{
    fit_homography_ransac, point_spread, FitQuality, Homography, HomographyError,
    RansacHomographyConfig,
};

const STAGE: &str = "reference-chain";

/// The validated A→B homography and how well it is supported.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReferenceChain {
    /// Maps reference-image pixels to grid-image pixels.
    pub b_from_a: Homography,
    /// Matches accepted by the ratio test.
    pub match_count: usize,
    pub quality: FitQuality,
    /// Inlier spread in image A and image B, in pixels.
    pub spread_px: [f64; 2],
}

/// Reject correspondences that collapse onto a line or a point in either image.
pub(crate) fn check_layout(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    min_spread_px: f64,
) -> Result<[f64; 2], GazeMapError> {
    let spread = [point_spread(src), point_spread(dst)];
    let worst = spread[0].min(spread[1]);
    if worst < min_spread_px {
        return Err(GazeMapError::DegenerateReferenceLayout {
            spread_px: worst,
            min_spread_px,
        });
    }
    Ok(spread)
}

/// Build the A→B homography from precomputed keypoints.
///
/// B's descriptors are the query set, matched against A's.
pub fn build_fixed_chain(
    a: &KeypointSet,
    b: &KeypointSet,
    registration: &RegistrationConfig,
    config: &ReferenceChainConfig,
) -> Result<ReferenceChain, GazeMapError> {
    let needed = config.min_correspondences.max(4);
    let matches = match_ratio(b, a, registration.match_distance_ratio);
    let insufficient = |inliers| GazeMapError::InsufficientReferenceMatches {
        stage: STAGE,
        matches: matches.len(),
        inliers,
        needed,
    };
    if matches.len() < needed {
        return Err(insufficient(0));
    }

    let src: Vec<[f64; 2]> = matches.iter().map(|m| a.keypoints[m.train].position()).collect();
    let dst: Vec<[f64; 2]> = matches.iter().map(|m| b.keypoints[m.query].position()).collect();

    let ransac = RansacHomographyConfig {
        min_inliers: needed.max(registration.ransac.min_inliers),
        ..registration.ransac.clone()
    };
    let fit = match fit_homography_ransac(&src, &dst, &ransac, None) {
        Ok(fit) => fit,
        Err(HomographyError::InsufficientInliers { found, .. }) => return Err(insufficient(found)),
        Err(HomographyError::TooFewPoints { got, .. }) => return Err(insufficient(got)),
        Err(e) => return Err(e.into()),
    };
    if fit.n_inliers < needed {
        return Err(insufficient(fit.n_inliers));
    }

    let (inlier_src, inlier_dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = src
        .iter()
        .zip(&dst)
        .zip(&fit.inlier_mask)
        .filter(|(_, keep)| **keep)
        .map(|((s, d), _)| (*s, *d))
        .unzip();
    let spread_px = check_layout(&inlier_src, &inlier_dst, config.min_spread_px)?;

    let quality = FitQuality::from_ransac(&fit);
    tracing::info!(
        "Reference chain RANSAC: {}/{} inliers, mean_err={:.2}px, p95={:.2}px",
        quality.n_inliers,
        quality.n_correspondences,
        quality.mean_err_px,
        quality.p95_err_px,
    );

    Ok(ReferenceChain {
        b_from_a: fit.h,
        match_count: matches.len(),
        quality,
        spread_px,
    })
}

/// Extract keypoints from both images and build the A→B homography.
pub fn build_fixed_chain_from_images(
    image_a: &GrayImage,
    image_b: &GrayImage,
    extractor: &FeatureExtractor,
    registration: &RegistrationConfig,
    config: &ReferenceChainConfig,
) -> Result<ReferenceChain, GazeMapError> {
    let a = extractor.extract(image_a);
    let b = extractor.extract(image_b);
    tracing::info!("Reference keypoints: A={}, B={}", a.len(), b.len());
    build_fixed_chain(&a, &b, registration, config)
}
