//! Keypoints and binary descriptors for image-to-image registration.
//!
//! Keypoints are FAST-9 corners detected on an image pyramid, each with an
//! intensity-centroid orientation. Descriptors are 256-bit rotated binary
//! intensity tests sampled on a smoothed copy of the pyramid level, compared
//! with Hamming distance.

mod descriptor;
mod detect;
mod matcher;

use image::GrayImage;

use crate::config::FeatureConfig;

pub use descriptor::Descriptor;
pub use matcher::{match_ratio, Match};

/// A detected keypoint, in full-resolution pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    /// Dominant orientation in radians.
    pub angle: f32,
    /// Pyramid level the keypoint was found on.
    pub level: u8,
    /// FAST corner score.
    pub response: f32,
}

impl Keypoint {
    pub fn position(&self) -> [f64; 2] {
        [self.x as f64, self.y as f64]
    }
}

/// Keypoints with their descriptors, index-aligned.
#[derive(Debug, Clone, Default)]
pub struct KeypointSet {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl KeypointSet {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Keypoint extractor with a fixed descriptor sampling pattern.
///
/// Two images are only comparable when described by extractors built from
/// the same config. The extractor is immutable and shared across workers.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    config: FeatureConfig,
    pattern: descriptor::SamplingPattern,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        let pattern = descriptor::SamplingPattern::new(config.pattern_seed);
        Self { config, pattern }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Detect and describe keypoints on `gray`.
    pub fn extract(&self, gray: &GrayImage) -> KeypointSet {
        let mut set = KeypointSet::default();
        for level in detect::build_pyramid(gray, &self.config) {
            let smoothed = if self.config.blur_sigma > 0.0 {
                imageproc::filter::gaussian_blur_f32(&level.image, self.config.blur_sigma)
            } else {
                level.image.clone()
            };
            for kp in detect::detect_level(&level, &self.config) {
                let lx = (kp.x / level.scale_x).round() as i32;
                let ly = (kp.y / level.scale_y).round() as i32;
                let desc = self.pattern.describe(&smoothed, lx, ly, kp.angle);
                set.keypoints.push(kp);
                set.descriptors.push(desc);
            }
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::textured_image;

    #[test]
    fn textured_image_yields_bounded_keypoints_inside_the_frame() {
        let img = textured_image(320, 240, 3);
        let cfg = FeatureConfig {
            max_features: 300,
            ..Default::default()
        };
        let set = FeatureExtractor::new(cfg).extract(&img);
        assert!(set.len() > 50, "only {} keypoints", set.len());
        assert!(set.len() <= 300);
        assert_eq!(set.keypoints.len(), set.descriptors.len());
        for kp in &set.keypoints {
            assert!(kp.x >= 0.0 && kp.x < 320.0 && kp.y >= 0.0 && kp.y < 240.0);
            assert!(kp.angle.is_finite());
        }
    }

    #[test]
    fn blank_image_has_no_keypoints() {
        let img = GrayImage::from_pixel(200, 150, image::Luma([90]));
        let set = FeatureExtractor::new(FeatureConfig::default()).extract(&img);
        assert!(set.is_empty());
    }

    #[test]
    fn tiny_image_is_handled_without_keypoints() {
        let img = textured_image(24, 24, 1);
        let set = FeatureExtractor::new(FeatureConfig::default()).extract(&img);
        assert!(set.is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let img = textured_image(240, 180, 9);
        let ex = FeatureExtractor::new(FeatureConfig::default());
        let a = ex.extract(&img);
        let b = ex.extract(&img);
        assert_eq!(a.keypoints, b.keypoints);
        assert_eq!(a.descriptors, b.descriptors);
    }
}
