//! Homography estimation, projection, and fit statistics.

mod core;
mod stats;

pub use self::core::{
    estimate_homography_dlt, fit_homography_ransac, point_spread, Homography, HomographyError,
    RansacHomographyConfig, RansacHomographyResult,
};
pub use stats::FitQuality;
