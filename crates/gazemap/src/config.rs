//! Pipeline configuration.
//!
//! Every tunable constant of the mapping and scoring pipeline lives here and
//! is passed into each component at construction. All structs deserialize
//! with `#[serde(default)]`, so a JSON file only needs the fields it changes.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::GazeMapError;
use crate::homography::RansacHomographyConfig;

/// Which instant between two frame timestamps closes a frame's gaze bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameBoundaryPolicy {
    /// Halfway between frame `f` and frame `f + 1` (timestamps mark exposure centers).
    #[default]
    FrameMidpoint,
    /// The timestamp of frame `f + 1` (timestamps mark exposure starts).
    NextFrameStart,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub boundary: FrameBoundaryPolicy,
}

/// Keypoint detection and description parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Maximum number of keypoints kept per image, strongest first.
    pub max_features: usize,
    /// FAST-9 intensity threshold.
    pub fast_threshold: u8,
    /// Number of pyramid levels (1 = full resolution only).
    pub pyramid_levels: usize,
    /// Downscale factor between consecutive pyramid levels.
    pub pyramid_scale: f32,
    /// Non-maximum suppression cell size, in level pixels.
    pub nms_radius_px: u32,
    /// Gaussian sigma applied before descriptor sampling.
    pub blur_sigma: f32,
    /// Keypoints closer than this to the level border are discarded.
    pub edge_margin_px: u32,
    /// Seed for the binary descriptor sampling pattern.
    pub pattern_seed: u64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            max_features: 1000,
            fast_threshold: 20,
            pyramid_levels: 4,
            pyramid_scale: 1.2,
            nms_radius_px: 3,
            blur_sigma: 2.0,
            edge_margin_px: 20,
            pattern_seed: 0x0b5e_55ed,
        }
    }
}

/// Per-frame registration against a reference image.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Ratio test: accept a match when `d1 < ratio * d2`.
    pub match_distance_ratio: f32,
    /// Accepted matches must exceed this count before a homography is attempted.
    pub min_match_count: usize,
    /// Accepted matches must exceed this count for a usable registration.
    pub min_good_matches: usize,
    /// Robust homography estimator settings.
    pub ransac: RansacHomographyConfig,
    /// Wall-clock budget per frame; `None` disables the budget.
    pub frame_budget_ms: Option<u64>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            match_distance_ratio: 0.5,
            min_match_count: 4,
            min_good_matches: 10,
            ransac: RansacHomographyConfig::default(),
            frame_budget_ms: None,
        }
    }
}

/// Validation of the fixed homography between the two reference images.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReferenceChainConfig {
    /// Minimum RANSAC inliers between the two reference images.
    pub min_correspondences: usize,
    /// Minimum inlier spread (sqrt of the smaller covariance eigenvalue), in pixels.
    pub min_spread_px: f64,
}

impl Default for ReferenceChainConfig {
    fn default() -> Self {
        Self {
            min_correspondences: 4,
            min_spread_px: 10.0,
        }
    }
}

/// Unit of gaze and frame timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GazeTimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl GazeTimeUnit {
    pub fn to_ms(self, t: f64) -> f64 {
        match self {
            Self::Seconds => t * 1000.0,
            Self::Milliseconds => t,
        }
    }

    pub fn from_ms(self, ms: f64) -> f64 {
        match self {
            Self::Seconds => ms / 1000.0,
            Self::Milliseconds => ms,
        }
    }
}

/// Linear layout of calibration points on the grid image.
///
/// Point `(column, row)` sits at `(size_px / divisions * column,
/// size_px / divisions * row)`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GridLayout {
    /// Width (and height) of the calibration grid image, in pixels.
    pub size_px: f64,
    /// Number of equal steps the grid width is divided into.
    pub divisions: u32,
    /// Points per grid row, used for the point index.
    pub columns: u32,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            size_px: 1000.0,
            divisions: 6,
            columns: 5,
        }
    }
}

impl GridLayout {
    pub fn ideal_location(&self, column: u32, row: u32) -> [f64; 2] {
        let step = self.size_px / self.divisions as f64;
        [step * column as f64, step * row as f64]
    }

    /// 1-based index counting left to right, top to bottom.
    pub fn point_index(&self, column: u32, row: u32) -> u32 {
        row.saturating_sub(1) * self.columns + column
    }
}

/// Trial windowing and accuracy/precision scoring.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Length of each trial after its presentation time, in ms.
    pub trial_duration_ms: f64,
    /// Inner window `(start, end]` relative to trial onset, in ms.
    pub analysis_window_ms: [f64; 2],
    /// Points farther than this from the ideal location are outliers.
    pub max_outlier_deg: f64,
    /// Nominal gaze sampling rate, used for `percent_valid`.
    pub sampling_rate_hz: f64,
    /// Grid pixels per degree of visual angle, keyed by viewing distance.
    pub pixels_per_degree_by_distance: BTreeMap<String, f64>,
    /// Key into `pixels_per_degree_by_distance` for this recording.
    pub viewing_distance: String,
    /// Unit of gaze timestamps; the task log is always in ms.
    pub gaze_time_unit: GazeTimeUnit,
    pub grid: GridLayout,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            trial_duration_ms: 3000.0,
            analysis_window_ms: [500.0, 2500.0],
            max_outlier_deg: 5.0,
            sampling_rate_hz: 60.0,
            pixels_per_degree_by_distance: BTreeMap::from([
                ("1M".to_string(), 85.8),
                ("2M".to_string(), 171.2),
                ("3M".to_string(), 256.7),
            ]),
            viewing_distance: "1M".to_string(),
            gaze_time_unit: GazeTimeUnit::Seconds,
            grid: GridLayout::default(),
        }
    }
}

impl ScoringConfig {
    /// Pixels per degree for the configured viewing distance.
    pub fn pixels_per_degree(&self) -> Result<f64, GazeMapError> {
        self.pixels_per_degree_by_distance
            .get(&self.viewing_distance)
            .copied()
            .ok_or_else(|| {
                GazeMapError::Config(format!(
                    "unknown viewing distance '{}' (known: {})",
                    self.viewing_distance,
                    self.pixels_per_degree_by_distance
                        .keys()
                        .cloned()
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }

    /// Samples a gap-free stream delivers inside the analysis window.
    pub fn ideal_max_points(&self) -> usize {
        let [start, end] = self.analysis_window_ms;
        ((end - start) / 1000.0 * self.sampling_rate_hz).max(0.0) as usize
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Samples below this confidence get no coordinates in any space.
    pub min_confidence: Option<f64>,
}

/// Task-start cue search.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StartCueConfig {
    /// The cue is visible once accepted matches exceed this count.
    pub min_matches: usize,
}

impl Default for StartCueConfig {
    fn default() -> Self {
        Self { min_matches: 25 }
    }
}

/// Frame decoding and parallel registration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Registration threads; `None` uses the rayon default.
    pub threads: Option<usize>,
    /// Frames decoded before a batch is handed to the workers.
    pub batch_size: usize,
    /// Stop after this many frames.
    pub max_frames: Option<usize>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            threads: None,
            batch_size: 16,
            max_frames: None,
        }
    }
}

/// Top-level configuration for a mapping and scoring run.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub correlation: CorrelationConfig,
    pub features: FeatureConfig,
    pub registration: RegistrationConfig,
    pub reference: ReferenceChainConfig,
    pub scoring: ScoringConfig,
    pub mapping: MappingConfig,
    pub start_cue: StartCueConfig,
    pub workers: WorkerConfig,
}

impl PipelineConfig {
    /// Load a (possibly partial) JSON config over the defaults and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, GazeMapError> {
        let data = std::fs::read_to_string(path).map_err(|e| GazeMapError::io(path, e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| GazeMapError::parse(path, e.line(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GazeMapError> {
        let bad = |msg: String| Err(GazeMapError::Config(msg));

        let ratio = self.registration.match_distance_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return bad(format!("match_distance_ratio must be in (0, 1], got {}", ratio));
        }
        let ransac = &self.registration.ransac;
        if !(ransac.inlier_threshold.is_finite() && ransac.inlier_threshold > 0.0) {
            return bad(format!(
                "ransac.inlier_threshold must be positive, got {}",
                ransac.inlier_threshold
            ));
        }
        if ransac.max_iters == 0 {
            return bad("ransac.max_iters must be >= 1".into());
        }

        let f = &self.features;
        if f.pyramid_levels == 0 || !(f.pyramid_scale > 1.0) || f.max_features == 0 {
            return bad(format!(
                "features need pyramid_levels >= 1, pyramid_scale > 1 and max_features >= 1 \
                 (got {}, {}, {})",
                f.pyramid_levels, f.pyramid_scale, f.max_features
            ));
        }

        let s = &self.scoring;
        let [start, end] = s.analysis_window_ms;
        if !(start.is_finite() && end.is_finite() && start >= 0.0 && start < end) {
            return bad(format!(
                "analysis_window_ms must satisfy 0 <= start < end, got [{}, {}]",
                start, end
            ));
        }
        if !(s.trial_duration_ms.is_finite() && s.trial_duration_ms > 0.0) {
            return bad(format!(
                "trial_duration_ms must be positive, got {}",
                s.trial_duration_ms
            ));
        }
        if !(s.max_outlier_deg.is_finite() && s.max_outlier_deg > 0.0) {
            return bad(format!(
                "max_outlier_deg must be positive, got {}",
                s.max_outlier_deg
            ));
        }
        if !(s.sampling_rate_hz.is_finite() && s.sampling_rate_hz > 0.0) {
            return bad(format!(
                "sampling_rate_hz must be positive, got {}",
                s.sampling_rate_hz
            ));
        }
        if let Some((name, ppd)) = s
            .pixels_per_degree_by_distance
            .iter()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return bad(format!("pixels per degree for '{}' must be positive, got {}", name, ppd));
        }
        s.pixels_per_degree()?;
        if s.grid.divisions == 0 || s.grid.columns == 0 || !(s.grid.size_px > 0.0) {
            return bad("grid needs positive size_px, divisions and columns".into());
        }

        if self.workers.batch_size == 0 {
            return bad("workers.batch_size must be >= 1".into());
        }
        if self.workers.threads == Some(0) {
            return bad("workers.threads must be >= 1 when set".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn default_grid_places_points_on_sixths() {
        let grid = GridLayout::default();
        let [x, y] = grid.ideal_location(3, 5);
        assert!((x - 500.0).abs() < 1e-9);
        assert!((y - 5000.0 / 6.0).abs() < 1e-9);
        assert_eq!(grid.point_index(1, 1), 1);
        assert_eq!(grid.point_index(5, 3), 15);
    }

    #[test]
    fn ideal_max_points_follows_window_and_rate() {
        let mut s = ScoringConfig::default();
        assert_eq!(s.ideal_max_points(), 120);
        s.sampling_rate_hz = 25.0;
        assert_eq!(s.ideal_max_points(), 50);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"scoring": {{"viewing_distance": "2M"}}, "correlation": {{"boundary": "next_frame_start"}}}}"#
        )
        .unwrap();
        let cfg = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.scoring.viewing_distance, "2M");
        assert!((cfg.scoring.pixels_per_degree().unwrap() - 171.2).abs() < 1e-9);
        assert_eq!(cfg.correlation.boundary, FrameBoundaryPolicy::NextFrameStart);
        assert_eq!(cfg.registration.min_good_matches, 10);
        assert_eq!(cfg.scoring.trial_duration_ms, 3000.0);
    }

    #[test]
    fn validation_rejects_inverted_window_and_unknown_distance() {
        let mut cfg = PipelineConfig::default();
        cfg.scoring.analysis_window_ms = [2500.0, 500.0];
        assert!(matches!(cfg.validate(), Err(GazeMapError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.scoring.viewing_distance = "4M".into();
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("4M"), "{msg}");

        let mut cfg = PipelineConfig::default();
        cfg.registration.match_distance_ratio = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = PipelineConfig::default();
        cfg.workers.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn time_units_convert_to_milliseconds() {
        assert_eq!(GazeTimeUnit::Seconds.to_ms(1.5), 1500.0);
        assert_eq!(GazeTimeUnit::Milliseconds.to_ms(1.5), 1.5);
        assert_eq!(GazeTimeUnit::Seconds.from_ms(250.0), 0.25);
    }
}
