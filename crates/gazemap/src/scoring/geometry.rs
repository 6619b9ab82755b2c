//! Angular distance, polar angle, centroid and dispersion on the grid.

/// Euclidean distance between `from` and `to`, in degrees of visual angle.
pub(crate) fn distance_deg(from: [f64; 2], to: [f64; 2], pixels_per_degree: f64) -> f64 {
    let dx = to[0] - from[0];
    let dy = to[1] - from[1];
    (dx * dx + dy * dy).sqrt() / pixels_per_degree
}

/// Polar angle of `to − from` as `360 − atan2(dy, dx)`, wrapped to `[0, 360)`.
///
/// Image y grows downward, so 0° points right and 90° points up on screen.
pub(crate) fn angle_deg(from: [f64; 2], to: [f64; 2]) -> f64 {
    let dx = to[0] - from[0];
    let dy = to[1] - from[1];
    (360.0 - dy.atan2(dx).to_degrees()).rem_euclid(360.0)
}

pub(crate) fn centroid(points: &[[f64; 2]]) -> Option<[f64; 2]> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let sx: f64 = points.iter().map(|p| p[0]).sum();
    let sy: f64 = points.iter().map(|p| p[1]).sum();
    Some([sx / n, sy / n])
}

/// Root mean square of each point's angular distance from `center`.
pub(crate) fn rms_deg(points: &[[f64; 2]], center: [f64; 2], pixels_per_degree: f64) -> f64 {
    if points.is_empty() {
        return f64::NAN;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|&p| distance_deg(center, p, pixels_per_degree).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
