//! Per-frame registration against a fixed reference image.
//!
//! A frame is registered by matching the reference descriptors against the
//! frame's descriptors and fitting a reference→frame homography with RANSAC.
//! Every failure is a value in [`RegistrationResult`], never an error, so one
//! bad frame cannot stop the run.

use std::time::{Duration, Instant};

use image::GrayImage;

use crate::config::RegistrationConfig;
use crate::features::{match_ratio, FeatureExtractor, KeypointSet};
use crate::homography::{fit_homography_ransac, Homography, HomographyError};

/// Why a frame could not be registered.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationFailure {
    /// Fewer than two descriptors on the frame; k=2 matching is undefined.
    TooFewDescriptors { found: usize },
    /// Not enough matches survived the ratio test.
    InsufficientMatches { found: usize, needed: usize },
    /// The robust estimator found no usable model.
    HomographyFailed { reason: String },
    /// The per-frame time budget ran out.
    BudgetExceeded { budget_ms: u64 },
}

impl std::fmt::Display for RegistrationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewDescriptors { found } => write!(f, "too few descriptors ({})", found),
            Self::InsufficientMatches { found, needed } => {
                write!(f, "insufficient matches ({} < {})", found, needed)
            }
            Self::HomographyFailed { reason } => write!(f, "homography failed: {}", reason),
            Self::BudgetExceeded { budget_ms } => write!(f, "budget of {}ms exceeded", budget_ms),
        }
    }
}

/// Outcome of registering one frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct RegistrationResult {
    pub success: bool,
    /// Reference→frame homography, present only on success.
    pub transform: Option<Homography>,
    /// Matches accepted by the ratio test.
    pub match_count: usize,
    /// RANSAC inliers among the accepted matches.
    pub n_inliers: usize,
    pub failure: Option<RegistrationFailure>,
}

impl RegistrationResult {
    fn failed(failure: RegistrationFailure, match_count: usize) -> Self {
        Self {
            success: false,
            transform: None,
            match_count,
            n_inliers: 0,
            failure: Some(failure),
        }
    }
}

/// Registers frames against one reference image.
///
/// Immutable after construction; shared by reference across worker threads.
#[derive(Debug, Clone)]
pub struct FrameRegistrar {
    extractor: FeatureExtractor,
    reference: KeypointSet,
    config: RegistrationConfig,
}

impl FrameRegistrar {
    pub fn new(extractor: FeatureExtractor, reference: KeypointSet, config: RegistrationConfig) -> Self {
        Self {
            extractor,
            reference,
            config,
        }
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn reference(&self) -> &KeypointSet {
        &self.reference
    }

    /// Detect keypoints on `frame` and register it.
    pub fn register(&self, frame: &GrayImage) -> RegistrationResult {
        let started = Instant::now();
        let keypoints = self.extractor.extract(frame);
        self.register_keypoints(&keypoints, started)
    }

    /// Register a frame whose keypoints were already extracted.
    ///
    /// `started` is when work on this frame began; the budget counts from it.
    pub fn register_keypoints(&self, frame: &KeypointSet, started: Instant) -> RegistrationResult {
        let cfg = &self.config;
        let deadline = cfg
            .frame_budget_ms
            .map(|ms| started + Duration::from_millis(ms));
        let over_budget = || deadline.is_some_and(|d| Instant::now() >= d);
        let budget_failure = |match_count| {
            RegistrationResult::failed(
                RegistrationFailure::BudgetExceeded {
                    budget_ms: cfg.frame_budget_ms.unwrap_or_default(),
                },
                match_count,
            )
        };

        if over_budget() {
            return budget_failure(0);
        }
        if frame.descriptors.len() < 2 {
            return RegistrationResult::failed(
                RegistrationFailure::TooFewDescriptors {
                    found: frame.descriptors.len(),
                },
                0,
            );
        }

        let matches = match_ratio(&self.reference, frame, cfg.match_distance_ratio);
        let match_count = matches.len();
        if over_budget() {
            return budget_failure(match_count);
        }

        let needed = cfg.min_match_count.max(cfg.min_good_matches) + 1;
        if match_count < needed {
            return RegistrationResult::failed(
                RegistrationFailure::InsufficientMatches {
                    found: match_count,
                    needed,
                },
                match_count,
            );
        }

        let src: Vec<[f64; 2]> = matches
            .iter()
            .map(|m| self.reference.keypoints[m.query].position())
            .collect();
        let dst: Vec<[f64; 2]> = matches
            .iter()
            .map(|m| frame.keypoints[m.train].position())
            .collect();

        match fit_homography_ransac(&src, &dst, &cfg.ransac, deadline) {
            Ok(fit) if fit.h.try_inverse().is_some() => RegistrationResult {
                success: true,
                transform: Some(fit.h),
                match_count,
                n_inliers: fit.n_inliers,
                failure: None,
            },
            Ok(_) => RegistrationResult::failed(
                RegistrationFailure::HomographyFailed {
                    reason: "singular homography".into(),
                },
                match_count,
            ),
            Err(HomographyError::DeadlineExceeded { .. }) => budget_failure(match_count),
            Err(e) => RegistrationResult::failed(
                RegistrationFailure::HomographyFailed {
                    reason: e.to_string(),
                },
                match_count,
            ),
        }
    }
}
