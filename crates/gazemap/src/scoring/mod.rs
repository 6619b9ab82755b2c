//! Calibration trial scoring: accuracy and precision of mapped gaze.
//!
//! Each task-log row opens a trial. Gaze points whose task-relative time falls
//! in the trial, and then in its inner analysis window, are compared with the
//! ideal grid location of the presented point. Points beyond the outlier gate
//! are dropped before the trial is summarized.

mod geometry;

use std::collections::BTreeMap;

use crate::config::ScoringConfig;
use crate::error::GazeMapError;
use crate::transform_chain::MappedGazePoint;

use geometry::{angle_deg, centroid, distance_deg, rms_deg};

/// One row of the calibration task log.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationPoint {
    /// 1-based grid column.
    pub column: u32,
    /// 1-based grid row.
    pub row: u32,
    /// Presentation time relative to task start, in ms.
    pub presentation_time_ms: f64,
}

/// A gaze point inside a trial's analysis window, before outlier gating.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrialGaze {
    /// 1-based trial number (task-log row order).
    pub trial: usize,
    pub point_index: u32,
    pub column: u32,
    pub row: u32,
    /// Time since trial onset, in ms.
    pub trial_ms: f64,
    /// Time since task start, in ms.
    pub task_ms: f64,
    pub point: MappedGazePoint,
    /// Distance from the ideal location; `None` without a grid coordinate.
    pub distance_deg: Option<f64>,
    pub angle_deg: Option<f64>,
}

/// Accuracy and precision of one trial. Undefined values are NaN.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TrialSummary {
    pub trial: usize,
    pub point_index: u32,
    pub column: u32,
    pub row: u32,
    /// Points left after the outlier gate.
    pub retained: usize,
    /// `retained / ideal_max_points`, clamped to `[0, 1]`.
    pub percent_valid: f64,
    pub centroid: [f64; 2],
    pub centroid_distance_deg: f64,
    pub centroid_angle_deg: f64,
    pub rms_precision_deg: f64,
}

/// Trials of the same grid point, averaged.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PointSummary {
    pub point_index: u32,
    pub column: u32,
    pub row: u32,
    pub trials: usize,
    pub mean_percent_valid: f64,
    /// Mean over trials with a defined value; NaN if none.
    pub mean_centroid_distance_deg: f64,
    pub mean_rms_precision_deg: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ScoreReport {
    pub trials: Vec<TrialSummary>,
    pub details: Vec<TrialGaze>,
    pub points: Vec<PointSummary>,
}

/// Scores mapped gaze against a calibration task log.
#[derive(Debug, Clone)]
pub struct TrialScorer {
    config: ScoringConfig,
    pixels_per_degree: f64,
}

impl TrialScorer {
    pub fn new(config: ScoringConfig) -> Result<Self, GazeMapError> {
        let pixels_per_degree = config.pixels_per_degree()?;
        Ok(Self {
            config,
            pixels_per_degree,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score every task-log row.
    ///
    /// `task_start` is in the gaze time unit; each row yields exactly one
    /// summary, even when its window holds no usable gaze.
    pub fn score(
        &self,
        mapped: &[MappedGazePoint],
        log: &[CalibrationPoint],
        task_start: f64,
    ) -> ScoreReport {
        let unit = self.config.gaze_time_unit;
        let start_ms = unit.to_ms(task_start);
        let task_times: Vec<f64> = mapped.iter().map(|p| unit.to_ms(p.timestamp) - start_ms).collect();

        let mut report = ScoreReport::default();
        for (i, cp) in log.iter().enumerate() {
            let details = self.trial_gaze(i + 1, cp, mapped, &task_times);
            report.trials.push(self.summarize_trial(i + 1, cp, &details));
            report.details.extend(details);
        }
        report.points = summarize_points(&report.trials);

        let empty = report.trials.iter().filter(|t| t.retained == 0).count();
        tracing::info!(
            "Scored {} trials ({} without retained gaze), {} gaze points in analysis windows",
            report.trials.len(),
            empty,
            report.details.len()
        );
        report
    }

    fn trial_gaze(
        &self,
        trial: usize,
        cp: &CalibrationPoint,
        mapped: &[MappedGazePoint],
        task_times: &[f64],
    ) -> Vec<TrialGaze> {
        let cfg = &self.config;
        let [win_start, win_end] = cfg.analysis_window_ms;
        let onset = cp.presentation_time_ms;
        let ideal = cfg.grid.ideal_location(cp.column, cp.row);
        let point_index = cfg.grid.point_index(cp.column, cp.row);

        mapped
            .iter()
            .zip(task_times)
            .filter(|(_, &t)| t > onset && t <= onset + cfg.trial_duration_ms)
            .map(|(p, &t)| (p, t, t - onset))
            .filter(|&(_, _, trial_ms)| trial_ms > win_start && trial_ms <= win_end)
            .map(|(p, task_ms, trial_ms)| TrialGaze {
                trial,
                point_index,
                column: cp.column,
                row: cp.row,
                trial_ms,
                task_ms,
                point: *p,
                distance_deg: p.grid.map(|g| distance_deg(ideal, g, self.pixels_per_degree)),
                angle_deg: p.grid.map(|g| angle_deg(ideal, g)),
            })
            .collect()
    }

    fn summarize_trial(&self, trial: usize, cp: &CalibrationPoint, details: &[TrialGaze]) -> TrialSummary {
        let cfg = &self.config;
        let ideal = cfg.grid.ideal_location(cp.column, cp.row);
        let retained: Vec<[f64; 2]> = details
            .iter()
            .filter(|d| d.distance_deg.is_some_and(|dist| dist < cfg.max_outlier_deg))
            .filter_map(|d| d.point.grid)
            .collect();

        let mut summary = TrialSummary {
            trial,
            point_index: cfg.grid.point_index(cp.column, cp.row),
            column: cp.column,
            row: cp.row,
            retained: retained.len(),
            percent_valid: 0.0,
            centroid: [f64::NAN; 2],
            centroid_distance_deg: f64::NAN,
            centroid_angle_deg: f64::NAN,
            rms_precision_deg: f64::NAN,
        };
        let Some(c) = centroid(&retained) else {
            return summary;
        };
        let ideal_max = cfg.ideal_max_points().max(1);
        summary.percent_valid = (retained.len() as f64 / ideal_max as f64).min(1.0);
        summary.centroid = c;
        summary.centroid_distance_deg = distance_deg(ideal, c, self.pixels_per_degree);
        summary.centroid_angle_deg = angle_deg(ideal, c);
        summary.rms_precision_deg = rms_deg(&retained, c, self.pixels_per_degree);
        summary
    }
}

fn mean_finite(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Average repeated presentations of each grid point, ordered by point index.
pub fn summarize_points(trials: &[TrialSummary]) -> Vec<PointSummary> {
    let mut by_point: BTreeMap<u32, Vec<&TrialSummary>> = BTreeMap::new();
    for t in trials {
        by_point.entry(t.point_index).or_default().push(t);
    }
    by_point
        .into_iter()
        .map(|(point_index, ts)| PointSummary {
            point_index,
            column: ts[0].column,
            row: ts[0].row,
            trials: ts.len(),
            mean_percent_valid: mean_finite(ts.iter().map(|t| t.percent_valid)),
            mean_centroid_distance_deg: mean_finite(ts.iter().map(|t| t.centroid_distance_deg)),
            mean_rms_precision_deg: mean_finite(ts.iter().map(|t| t.rms_precision_deg)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GazeTimeUnit;
    use approx::assert_relative_eq;

    fn ms_config() -> ScoringConfig {
        ScoringConfig {
            gaze_time_unit: GazeTimeUnit::Milliseconds,
            ..Default::default()
        }
    }

    fn point(t_ms: f64, grid: Option<[f64; 2]>) -> MappedGazePoint {
        MappedGazePoint {
            frame_index: 0,
            timestamp: t_ms,
            confidence: 1.0,
            frame: grid,
            reference: grid,
            grid,
        }
    }

    /// 25 Hz stream that looks at each point's ideal location for its whole trial.
    fn perfect_stream(log: &[CalibrationPoint], cfg: &ScoringConfig, offset: [f64; 2]) -> Vec<MappedGazePoint> {
        let end = log.last().map(|p| p.presentation_time_ms).unwrap_or(0.0) + cfg.trial_duration_ms;
        (0..)
            .map(|k| k as f64 * 40.0)
            .take_while(|&t| t <= end)
            .map(|t| {
                let target = log
                    .iter()
                    .rev()
                    .find(|p| t > p.presentation_time_ms)
                    .map(|p| cfg.grid.ideal_location(p.column, p.row));
                point(t, target.map(|g| [g[0] + offset[0], g[1] + offset[1]]))
            })
            .collect()
    }

    fn four_point_log() -> Vec<CalibrationPoint> {
        [(1, 1, 1000.0), (3, 1, 4500.0), (5, 3, 8000.0), (3, 5, 11500.0)]
            .map(|(column, row, presentation_time_ms)| CalibrationPoint {
                column,
                row,
                presentation_time_ms,
            })
            .to_vec()
    }

    #[test]
    fn perfect_25hz_stream_is_fully_valid_and_exact() {
        let cfg = ScoringConfig {
            sampling_rate_hz: 25.0,
            ..ms_config()
        };
        let log = four_point_log();
        let mapped = perfect_stream(&log, &cfg, [0.0, 0.0]);
        let report = TrialScorer::new(cfg).unwrap().score(&mapped, &log, 0.0);

        assert_eq!(report.trials.len(), 4);
        for t in &report.trials {
            assert_eq!(t.retained, 50);
            assert_relative_eq!(t.percent_valid, 1.0);
            assert_relative_eq!(t.centroid_distance_deg, 0.0, epsilon = 1e-9);
            assert_relative_eq!(t.rms_precision_deg, 0.0, epsilon = 1e-9);
        }
        assert_eq!(report.trials[2].point_index, 15);
    }

    #[test]
    fn constant_offset_shows_as_accuracy_not_precision() {
        let cfg = ms_config();
        let log = four_point_log();
        // One degree to the right at the default 85.8 px/deg.
        let mapped = perfect_stream(&log, &cfg, [85.8, 0.0]);
        let report = TrialScorer::new(cfg).unwrap().score(&mapped, &log, 0.0);
        for t in &report.trials {
            assert_relative_eq!(t.centroid_distance_deg, 1.0, epsilon = 1e-9);
            assert_relative_eq!(t.centroid_angle_deg, 0.0, epsilon = 1e-9);
            assert_relative_eq!(t.rms_precision_deg, 0.0, epsilon = 1e-9);
            assert!(t.percent_valid > 0.0 && t.percent_valid <= 1.0);
        }
    }

    #[test]
    fn task_start_shifts_the_trial_windows() {
        let cfg = ScoringConfig::default();
        let log = vec![CalibrationPoint {
            column: 3,
            row: 3,
            presentation_time_ms: 0.0,
        }];
        let ideal = cfg.grid.ideal_location(3, 3);
        // Seconds: task starts at 100 s; one sample 1 s into the trial.
        let mapped = vec![point(101.0, Some(ideal)), point(99.0, Some(ideal))];
        let report = TrialScorer::new(cfg).unwrap().score(&mapped, &log, 100.0);
        assert_eq!(report.details.len(), 1);
        assert_relative_eq!(report.details[0].trial_ms, 1000.0, epsilon = 1e-6);
        assert_eq!(report.trials[0].retained, 1);
    }

    #[test]
    fn outliers_are_dropped_and_gate_is_idempotent() {
        let cfg = ms_config();
        let scorer = TrialScorer::new(cfg.clone()).unwrap();
        let log = vec![CalibrationPoint {
            column: 1,
            row: 1,
            presentation_time_ms: 0.0,
        }];
        let ideal = cfg.grid.ideal_location(1, 1);
        let mut mapped: Vec<_> = (1..40)
            .map(|k| point(500.0 + k as f64 * 40.0, Some([ideal[0] + (k % 5) as f64, ideal[1] - (k % 3) as f64])))
            .collect();
        // 6 degrees away: outside the gate.
        mapped.push(point(1700.0, Some([ideal[0] + 6.0 * 85.8, ideal[1]])));
        // No grid coordinate: windowed but never retained.
        mapped.push(point(1720.0, None));

        let first = scorer.score(&mapped, &log, 0.0);
        assert_eq!(first.details.len(), 41);
        assert_eq!(first.trials[0].retained, 39);

        let gated: Vec<MappedGazePoint> = first
            .details
            .iter()
            .filter(|d| d.distance_deg.is_some_and(|x| x < cfg.max_outlier_deg))
            .map(|d| d.point)
            .collect();
        let second = scorer.score(&gated, &log, 0.0);
        assert_eq!(second.trials, first.trials);
    }

    #[test]
    fn trial_without_usable_gaze_reports_nan_and_zero_valid() {
        let cfg = ms_config();
        let log = four_point_log();
        let mapped: Vec<_> = (0..400).map(|k| point(k as f64 * 40.0, None)).collect();
        let report = TrialScorer::new(cfg).unwrap().score(&mapped, &log, 0.0);
        assert_eq!(report.trials.len(), 4);
        for t in &report.trials {
            assert_eq!(t.retained, 0);
            assert_eq!(t.percent_valid, 0.0);
            assert!(t.centroid[0].is_nan() && t.centroid_distance_deg.is_nan());
            assert!(t.rms_precision_deg.is_nan());
        }
        assert!(report.points.iter().all(|p| p.mean_rms_precision_deg.is_nan()));
    }

    #[test]
    fn percent_valid_is_clamped_for_oversampled_streams() {
        let cfg = ScoringConfig {
            sampling_rate_hz: 10.0,
            ..ms_config()
        };
        let log = four_point_log();
        let mapped = perfect_stream(&log, &cfg, [0.0, 0.0]);
        let report = TrialScorer::new(cfg).unwrap().score(&mapped, &log, 0.0);
        assert!(report.trials.iter().all(|t| t.percent_valid == 1.0));
    }

    #[test]
    fn repeated_points_are_averaged() {
        let mk = |trial, percent_valid, dist| TrialSummary {
            trial,
            point_index: 3,
            column: 3,
            row: 1,
            retained: 1,
            percent_valid,
            centroid: [0.0, 0.0],
            centroid_distance_deg: dist,
            centroid_angle_deg: 0.0,
            rms_precision_deg: 0.5,
        };
        let points = summarize_points(&[mk(1, 0.5, 1.0), mk(2, 1.0, f64::NAN), mk(3, 0.0, 3.0)]);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].trials, 3);
        assert_relative_eq!(points[0].mean_percent_valid, 0.5);
        assert_relative_eq!(points[0].mean_centroid_distance_deg, 2.0);
    }

    #[test]
    fn unknown_viewing_distance_is_rejected() {
        let cfg = ScoringConfig {
            viewing_distance: "10M".into(),
            ..Default::default()
        };
        assert!(TrialScorer::new(cfg).is_err());
    }
}
