//! Error types for setup-time failures.
//!
//! Only failures that make the whole run meaningless are errors. Per-frame
//! registration failures, dropped trailing gaze samples, malformed task-log
//! rows and empty trial windows are reported as values inside the results.

use std::path::PathBuf;

use crate::homography::HomographyError;

/// Fatal pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum GazeMapError {
    /// Too few correspondences between the two static reference images.
    #[error(
        "insufficient reference matches ({stage}): {matches} ratio-test matches, \
         {inliers} homography inliers, need at least {needed}"
    )]
    InsufficientReferenceMatches {
        stage: &'static str,
        matches: usize,
        inliers: usize,
        needed: usize,
    },
    /// Reference correspondences exist but collapse onto a line or a point.
    #[error("reference correspondences are degenerate: spread {spread_px:.2}px < {min_spread_px:.2}px")]
    DegenerateReferenceLayout { spread_px: f64, min_spread_px: f64 },
    #[error("homography estimation failed: {0}")]
    Homography(#[from] HomographyError),
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A fatal error annotated with the pipeline stage it occurred in.
    #[error("stage '{stage}' failed: {source}")]
    Setup {
        stage: &'static str,
        #[source]
        source: Box<GazeMapError>,
    },
}

impl GazeMapError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the stage that produced it.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            already @ Self::Setup { .. } => already,
            other => Self::Setup {
                stage,
                source: Box::new(other),
            },
        }
    }
}
