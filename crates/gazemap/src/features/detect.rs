//! Pyramid construction, FAST detection with bucketed NMS, and orientation.

use image::imageops::FilterType;
use image::GrayImage;

use super::Keypoint;
use crate::config::FeatureConfig;

/// Radius of the disc used for the intensity-centroid orientation.
const ORIENTATION_RADIUS: i32 = 15;
/// Keypoints must be at least this far from the level border so that the
/// orientation disc and any rotated descriptor test stay inside the image.
pub(super) const PATCH_BORDER: u32 = 19;

pub(super) struct PyramidLevel {
    pub index: u8,
    pub image: GrayImage,
    /// Level-0 pixels per level pixel, per axis.
    pub scale_x: f32,
    pub scale_y: f32,
    /// Share of the keypoint budget assigned to this level.
    pub quota: usize,
}

pub(super) fn build_pyramid(gray: &GrayImage, cfg: &FeatureConfig) -> Vec<PyramidLevel> {
    let (w0, h0) = gray.dimensions();
    let min_side = 2 * cfg.edge_margin_px.max(PATCH_BORDER) + 1;

    let mut dims = Vec::new();
    for l in 0..cfg.pyramid_levels {
        let s = cfg.pyramid_scale.powi(l as i32);
        let w = (w0 as f32 / s).round() as u32;
        let h = (h0 as f32 / s).round() as u32;
        if w < min_side || h < min_side {
            break;
        }
        dims.push((w, h));
    }

    // Budget proportional to level area.
    let total_area: f64 = dims.iter().map(|&(w, h)| w as f64 * h as f64).sum();
    dims.iter()
        .enumerate()
        .map(|(l, &(w, h))| {
            let image = if l == 0 {
                gray.clone()
            } else {
                image::imageops::resize(gray, w, h, FilterType::Triangle)
            };
            let share = (w as f64 * h as f64) / total_area;
            PyramidLevel {
                index: l as u8,
                image,
                scale_x: w0 as f32 / w as f32,
                scale_y: h0 as f32 / h as f32,
                quota: ((cfg.max_features as f64 * share).round() as usize).max(1),
            }
        })
        .collect()
}

/// Detect oriented keypoints on one level, strongest first, at most `quota`.
pub(super) fn detect_level(level: &PyramidLevel, cfg: &FeatureConfig) -> Vec<Keypoint> {
    let img = &level.image;
    let (w, h) = img.dimensions();
    let margin = cfg.edge_margin_px.max(PATCH_BORDER);

    let mut corners: Vec<_> = imageproc::corners::corners_fast9(img, cfg.fast_threshold)
        .into_iter()
        .filter(|c| c.x >= margin && c.y >= margin && c.x < w - margin && c.y < h - margin)
        .collect();
    corners.sort_by(|a, b| b.score.total_cmp(&a.score));

    // Bucketed NMS: one corner per cell, strongest wins.
    let cell = cfg.nms_radius_px.max(1);
    let cols = (w / cell + 1) as usize;
    let rows = (h / cell + 1) as usize;
    let mut taken = vec![false; cols * rows];

    let mut out = Vec::with_capacity(level.quota.min(corners.len()));
    for c in corners {
        if out.len() >= level.quota {
            break;
        }
        let idx = (c.y / cell) as usize * cols + (c.x / cell) as usize;
        if taken[idx] {
            continue;
        }
        taken[idx] = true;
        out.push(Keypoint {
            x: c.x as f32 * level.scale_x,
            y: c.y as f32 * level.scale_y,
            angle: intensity_centroid_angle(img, c.x as i32, c.y as i32),
            level: level.index,
            response: c.score,
        });
    }
    out
}

/// Orientation of the vector from `(cx, cy)` to the intensity centroid of a
/// disc around it.
fn intensity_centroid_angle(img: &GrayImage, cx: i32, cy: i32) -> f32 {
    let r = ORIENTATION_RADIUS;
    let mut m10 = 0i64;
    let mut m01 = 0i64;
    for dy in -r..=r {
        let half = ((r * r - dy * dy) as f32).sqrt() as i32;
        for dx in -half..=half {
            let v = img.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0] as i64;
            m10 += dx as i64 * v;
            m01 += dy as i64 * v;
        }
    }
    (m01 as f32).atan2(m10 as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn pyramid_levels_shrink_and_split_the_budget() {
        let img = GrayImage::new(400, 300);
        let cfg = FeatureConfig::default();
        let levels = build_pyramid(&img, &cfg);
        assert_eq!(levels.len(), cfg.pyramid_levels);
        for pair in levels.windows(2) {
            assert!(pair[1].image.width() < pair[0].image.width());
            assert!(pair[1].quota <= pair[0].quota);
        }
        let total: usize = levels.iter().map(|l| l.quota).sum();
        assert!(total.abs_diff(cfg.max_features) <= cfg.pyramid_levels);
    }

    #[test]
    fn orientation_points_toward_the_bright_side() {
        let mut img = GrayImage::from_pixel(64, 64, Luma([0]));
        for y in 0..64 {
            for x in 33..64 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let a = intensity_centroid_angle(&img, 32, 32);
        assert!(a.abs() < 0.05, "angle {}", a);

        let mut img = GrayImage::from_pixel(64, 64, Luma([0]));
        for y in 33..64 {
            for x in 0..64 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
        let a = intensity_centroid_angle(&img, 32, 32);
        assert!((a - std::f32::consts::FRAC_PI_2).abs() < 0.05, "angle {}", a);
    }
}
