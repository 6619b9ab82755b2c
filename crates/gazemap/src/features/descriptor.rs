//! Rotated binary intensity-test descriptors.

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const N_TESTS: usize = 256;
/// Test offsets are drawn from `[-PATTERN_HALF, PATTERN_HALF]`.
const PATTERN_HALF: i32 = 13;

/// 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Pairs of sample offsets compared by each descriptor bit.
#[derive(Debug, Clone)]
pub(super) struct SamplingPattern {
    pairs: Vec<([f32; 2], [f32; 2])>,
}

impl SamplingPattern {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pairs = Vec::with_capacity(N_TESTS);
        while pairs.len() < N_TESTS {
            let mut draw = || {
                [
                    rng.gen_range(-PATTERN_HALF..=PATTERN_HALF) as f32,
                    rng.gen_range(-PATTERN_HALF..=PATTERN_HALF) as f32,
                ]
            };
            let p = draw();
            let q = draw();
            if p != q {
                pairs.push((p, q));
            }
        }
        Self { pairs }
    }

    /// Describe the patch centred at level pixel `(cx, cy)`, rotated by `angle`.
    ///
    /// The caller keeps `(cx, cy)` far enough from the border that every
    /// rotated offset stays inside the image; samples are clamped regardless.
    pub fn describe(&self, img: &GrayImage, cx: i32, cy: i32, angle: f32) -> Descriptor {
        let (w, h) = img.dimensions();
        let (sin, cos) = angle.sin_cos();
        let sample = |o: [f32; 2]| -> u8 {
            let x = cx + (cos * o[0] - sin * o[1]).round() as i32;
            let y = cy + (sin * o[0] + cos * o[1]).round() as i32;
            let x = x.clamp(0, w as i32 - 1) as u32;
            let y = y.clamp(0, h as i32 - 1) as u32;
            img.get_pixel(x, y)[0]
        };

        let mut bits = [0u64; 4];
        for (i, &(p, q)) in self.pairs.iter().enumerate() {
            if sample(p) < sample(q) {
                bits[i / 64] |= 1 << (i % 64);
            }
        }
        Descriptor(bits)
    }
}
