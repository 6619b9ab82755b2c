//! Planar homography estimation via DLT with Hartley normalization.
//!
//! Provides:
//! - [`Homography`], a 3×3 projective transform with mapping, inversion and
//!   composition.
//! - Direct Linear Transform (DLT) from ≥4 point correspondences.
//! - RANSAC wrapper for outlier-robust fitting with an optional deadline.

use std::time::Instant;

use nalgebra::{DMatrix, Matrix2, Matrix3, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;

// ── Error type ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum HomographyError {
    TooFewPoints { needed: usize, got: usize },
    NumericalFailure(String),
    InsufficientInliers { needed: usize, found: usize },
    DeadlineExceeded { iterations: usize },
}

impl std::fmt::Display for HomographyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few points: need {}, got {}", needed, got)
            }
            Self::NumericalFailure(msg) => write!(f, "numerical failure: {}", msg),
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
            Self::DeadlineExceeded { iterations } => {
                write!(f, "time budget exhausted after {} iterations", iterations)
            }
        }
    }
}

impl std::error::Error for HomographyError {}

// ── Homography type ──────────────────────────────────────────────────────

/// A 3×3 projective transform from a source plane to a destination plane.
///
/// Composition follows destination←source order: `b_from_a.then(c_from_b)`
/// maps points from `a` to `c` and equals the matrix product `C·B`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    m: Matrix3<f64>,
}

impl Homography {
    pub fn identity() -> Self {
        Self {
            m: Matrix3::identity(),
        }
    }

    /// Wrap a matrix, rescaling so that `h[2][2] = 1` when that entry is usable.
    pub fn from_matrix(m: Matrix3<f64>) -> Self {
        let scale = m[(2, 2)];
        if scale.abs() > 1e-15 && scale.is_finite() {
            Self { m: m / scale }
        } else {
            Self { m }
        }
    }

    /// Build from a row-major 3×3 array.
    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self::from_matrix(Matrix3::new(
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ))
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.m
    }

    /// Row-major copy of the matrix.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.m;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }

    /// Map a point. Returns `None` for points sent to infinity or non-finite input.
    pub fn map_point(&self, p: [f64; 2]) -> Option<[f64; 2]> {
        let q = project(&self.m, p[0], p[1]);
        (q[0].is_finite() && q[1].is_finite()).then_some(q)
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn try_inverse(&self) -> Option<Self> {
        let det = self.m.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        self.m.try_inverse().map(Self::from_matrix)
    }

    /// Apply `self` first, then `next`.
    pub fn then(&self, next: &Homography) -> Self {
        Self::from_matrix(next.m * self.m)
    }

    pub fn is_finite(&self) -> bool {
        self.m.iter().all(|v| v.is_finite())
    }
}

impl From<Matrix3<f64>> for Homography {
    fn from(m: Matrix3<f64>) -> Self {
        Self::from_matrix(m)
    }
}

impl serde::Serialize for Homography {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_rows().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Homography {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = <[[f64; 3]; 3]>::deserialize(deserializer)?;
        Ok(Self::from_rows(rows))
    }
}

// ── Projection ───────────────────────────────────────────────────────────

/// Project a 2D point through a 3×3 homography: H * [x, y, 1]^T → [u, v].
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

/// Reprojection error: ||project(H, src) - dst||.
pub fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    let p = project(h, src[0], src[1]);
    let dx = p[0] - dst[0];
    let dy = p[1] - dst[1];
    (dx * dx + dy * dy).sqrt()
}

// ── Hartley normalization ────────────────────────────────────────────────

/// Translate the centroid to the origin and scale so the mean distance from
/// the origin is sqrt(2).
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx: f64 = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy: f64 = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist: f64 = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| [s * (p[0] - cx), s * (p[1] - cy)])
        .collect();

    (t, normalized)
}

// ── DLT ──────────────────────────────────────────────────────────────────

/// Estimate a homography from ≥4 point correspondences using DLT.
///
/// Returns H such that `dst ≈ project(H, src)`.
pub fn estimate_homography_dlt(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
) -> Result<Homography, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() < 4 {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }
    if src.len() != dst.len() {
        return Err(HomographyError::NumericalFailure(
            "src and dst must have the same length".into(),
        ));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        // Row 2i:   [  0  0  0 | -sx -sy -1 | dy*sx  dy*sy  dy ]
        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        // Row 2i+1: [ sx  sy  1 |  0  0  0 | -dx*sx -dx*sy -dx ]
        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A = eigenvector of the smallest eigenvalue of A^T A.
    let ata = a.transpose() * &a;
    let eig = nalgebra::SymmetricEigen::new(ata);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| HomographyError::NumericalFailure("T_dst not invertible".into()))?;
    let h = Homography::from_matrix(t_dst_inv * h_norm * t_src);
    if !h.is_finite() {
        return Err(HomographyError::NumericalFailure(
            "non-finite homography".into(),
        ));
    }
    Ok(h)
}

// ── RANSAC ───────────────────────────────────────────────────────────────

/// RANSAC configuration for homography fitting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RansacHomographyConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iters: usize,
    /// Inlier threshold (reprojection error in pixels).
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// Random seed.
    pub seed: u64,
}

impl Default for RansacHomographyConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 5.0,
            min_inliers: 4,
            seed: 0,
        }
    }
}

/// Result of RANSAC homography fitting.
#[derive(Debug, Clone)]
pub struct RansacHomographyResult {
    /// The fitted homography.
    pub h: Homography,
    /// Boolean mask: true for inliers.
    pub inlier_mask: Vec<bool>,
    /// Number of inliers.
    pub n_inliers: usize,
    /// Per-correspondence reprojection errors under the refit model.
    pub errors: Vec<f64>,
}

/// Twice the signed area of triangle (a, b, c).
fn cross(a: &[f64; 2], b: &[f64; 2], c: &[f64; 2]) -> f64 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// A minimal sample is usable only if no three of its points are collinear.
fn sample_is_degenerate(pts: &[[f64; 2]; 4]) -> bool {
    const MIN_AREA2: f64 = 1e-6;
    for (i, j, k) in [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)] {
        if cross(&pts[i], &pts[j], &pts[k]).abs() < MIN_AREA2 {
            return true;
        }
    }
    false
}

fn count_inliers(h: &Homography, src: &[[f64; 2]], dst: &[[f64; 2]], thresh: f64) -> Vec<bool> {
    src.iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error(h.matrix(), s, d) < thresh)
        .collect()
}

/// Number of iterations needed to draw one all-inlier sample with 99% confidence.
fn adaptive_iterations(inlier_ratio: f64, max_iters: usize) -> usize {
    let p_good = inlier_ratio.powi(4);
    if p_good <= 1e-12 {
        return max_iters;
    }
    if p_good >= 1.0 - 1e-12 {
        return 1;
    }
    let n = (1.0f64 - 0.99).ln() / (1.0 - p_good).ln();
    (n.ceil() as usize).clamp(1, max_iters)
}

/// Fit a homography with RANSAC.
///
/// `deadline` bounds the wall-clock time spent in the sampling loop; when it
/// passes before any model reaches `min_inliers`, the fit fails with
/// [`HomographyError::DeadlineExceeded`].
pub fn fit_homography_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacHomographyConfig,
    deadline: Option<Instant>,
) -> Result<RansacHomographyResult, HomographyError> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(HomographyError::TooFewPoints {
            needed: 4,
            got: n.min(dst.len()),
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best_inliers = 0usize;
    let mut best_mask: Vec<bool> = vec![false; n];
    let mut best_h = None;
    let mut needed_iters = config.max_iters;
    let mut iter = 0usize;

    while iter < needed_iters {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            if best_inliers < config.min_inliers {
                return Err(HomographyError::DeadlineExceeded { iterations: iter });
            }
            break;
        }
        iter += 1;

        let idx = rand::seq::index::sample(&mut rng, n, 4);
        let s4 = [src[idx.index(0)], src[idx.index(1)], src[idx.index(2)], src[idx.index(3)]];
        let d4 = [dst[idx.index(0)], dst[idx.index(1)], dst[idx.index(2)], dst[idx.index(3)]];
        if sample_is_degenerate(&s4) || sample_is_degenerate(&d4) {
            continue;
        }

        let Ok(h) = estimate_homography_dlt(&s4, &d4) else {
            continue;
        };

        let mask = count_inliers(&h, src, dst, config.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if count > best_inliers {
            best_inliers = count;
            best_mask = mask;
            best_h = Some(h);
            needed_iters = adaptive_iterations(count as f64 / n as f64, config.max_iters);
        }
    }

    let best_h = match best_h {
        Some(h) if best_inliers >= config.min_inliers => h,
        _ => {
            return Err(HomographyError::InsufficientInliers {
                needed: config.min_inliers,
                found: best_inliers,
            })
        }
    };

    // Refit on all inliers, then re-score with the refined model.
    let (inlier_src, inlier_dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = (0..n)
        .filter(|&i| best_mask[i])
        .map(|i| (src[i], dst[i]))
        .unzip();
    let h_refit = estimate_homography_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

    let errors: Vec<f64> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| reprojection_error(h_refit.matrix(), s, d))
        .collect();
    let refit_mask: Vec<bool> = errors.iter().map(|&e| e < config.inlier_threshold).collect();
    let refit_inliers = refit_mask.iter().filter(|&&m| m).count();

    // Keep the refit only if it does not lose support.
    let (h, inlier_mask, n_inliers, errors) = if refit_inliers >= best_inliers {
        (h_refit, refit_mask, refit_inliers, errors)
    } else {
        let errors = src
            .iter()
            .zip(dst)
            .map(|(s, d)| reprojection_error(best_h.matrix(), s, d))
            .collect();
        (best_h, best_mask, best_inliers, errors)
    };

    Ok(RansacHomographyResult {
        h,
        inlier_mask,
        n_inliers,
        errors,
    })
}

/// Square root of the smaller eigenvalue of the points' 2×2 covariance.
///
/// Near zero when the points collapse onto a line or a single location.
pub fn point_spread(pts: &[[f64; 2]]) -> f64 {
    if pts.len() < 2 {
        return 0.0;
    }
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let dx = p[0] - cx;
        let dy = p[1] - cy;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let cov = Matrix2::new(sxx / n, sxy / n, sxy / n, syy / n);
    let eig = nalgebra::SymmetricEigen::new(cov);
    eig.eigenvalues.min().max(0.0).sqrt()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::Rng;

    fn make_test_homography() -> Homography {
        // Scale + translate + mild perspective
        Homography::from_rows([
            [1.2, 0.1, 40.0],
            [-0.05, 1.1, 25.0],
            [0.0002, -0.0001, 1.0],
        ])
    }

    #[test]
    fn dlt_recovers_exact_four_point_model() {
        let h_true = make_test_homography();
        let src = [[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]];
        let dst: Vec<[f64; 2]> = src.iter().map(|s| h_true.map_point(*s).unwrap()).collect();

        let h_est = estimate_homography_dlt(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let err = reprojection_error(h_est.matrix(), s, d);
            assert!(err < 1e-6, "reprojection error too large: {}", err);
        }
    }

    #[test]
    fn ransac_ignores_gross_outliers() {
        let h_true = make_test_homography();
        let mut rng = StdRng::seed_from_u64(42);

        let mut src = Vec::new();
        let mut dst = Vec::new();
        for i in 0..30 {
            let s = [(i % 6) as f64 * 40.0, (i / 6) as f64 * 40.0];
            let d = h_true.map_point(s).unwrap();
            src.push(s);
            dst.push([d[0] + rng.gen_range(-0.5..0.5), d[1] + rng.gen_range(-0.5..0.5)]);
        }
        for _ in 0..10 {
            src.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..160.0)]);
            dst.push([rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)]);
        }

        let config = RansacHomographyConfig {
            inlier_threshold: 3.0,
            seed: 7,
            ..Default::default()
        };
        let result = fit_homography_ransac(&src, &dst, &config, None).unwrap();
        assert!(result.n_inliers >= 28, "only {} inliers", result.n_inliers);
        for i in 0..30 {
            assert!(result.inlier_mask[i], "true inlier {} rejected", i);
        }
    }

    #[test]
    fn map_then_inverse_returns_the_point() {
        let h = make_test_homography();
        let h_inv = h.try_inverse().unwrap();
        for p in [[50.0, 75.0], [0.0, 0.0], [-30.0, 410.5]] {
            let q = h.map_point(p).unwrap();
            let back = h_inv.map_point(q).unwrap();
            assert_relative_eq!(p[0], back[0], epsilon = 1e-8);
            assert_relative_eq!(p[1], back[1], epsilon = 1e-8);
        }
    }

    #[test]
    fn composition_matches_sequential_mapping() {
        let a = make_test_homography();
        let b = Homography::from_rows([[0.9, 0.0, -12.0], [0.02, 1.05, 3.0], [0.0, 0.0, 1.0]]);
        let p = [33.0, 44.0];
        let sequential = b.map_point(a.map_point(p).unwrap()).unwrap();
        let composed = a.then(&b).map_point(p).unwrap();
        assert_relative_eq!(sequential[0], composed[0], epsilon = 1e-9);
        assert_relative_eq!(sequential[1], composed[1], epsilon = 1e-9);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let h = Homography::from_rows([[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]]);
        assert!(h.try_inverse().is_none());
    }

    #[test]
    fn point_at_infinity_maps_to_none() {
        let h = Homography::from_rows([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 1.0]]);
        assert!(h.map_point([-1.0, 5.0]).is_none());
    }

    #[test]
    fn too_few_points_is_an_error() {
        let src = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]];
        assert!(estimate_homography_dlt(&src, &src).is_err());
        let cfg = RansacHomographyConfig::default();
        assert!(matches!(
            fit_homography_ransac(&src, &src, &cfg, None),
            Err(HomographyError::TooFewPoints { .. })
        ));
    }

    #[test]
    fn expired_deadline_fails_without_a_model() {
        let src: Vec<[f64; 2]> = (0..20).map(|i| [i as f64 * 7.0, (i * i % 13) as f64 * 5.0]).collect();
        let cfg = RansacHomographyConfig::default();
        let past = Instant::now();
        let err = fit_homography_ransac(&src, &src, &cfg, Some(past)).unwrap_err();
        assert!(matches!(err, HomographyError::DeadlineExceeded { .. }));
    }

    #[test]
    fn collinear_points_have_no_spread() {
        let line: Vec<[f64; 2]> = (0..10).map(|i| [i as f64, 2.0 * i as f64]).collect();
        assert!(point_spread(&line) < 1e-9);
        let square = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert_relative_eq!(point_spread(&square), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn homography_serializes_as_row_major_rows() {
        let h = make_test_homography();
        let json = serde_json::to_string(&h).unwrap();
        let back: Homography = serde_json::from_str(&json).unwrap();
        assert_relative_eq!(*h.matrix(), *back.matrix(), epsilon = 1e-12);
    }
}
