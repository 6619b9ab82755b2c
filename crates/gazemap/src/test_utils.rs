//! Shared test utilities for image-based unit tests.

use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::homography::Homography;

/// Render a synthetic scene of overlapping random rectangles and discs.
///
/// Plenty of corners with varied surroundings, so keypoints match uniquely.
pub(crate) fn textured_image(w: u32, h: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut img = GrayImage::from_pixel(w, h, Luma([rng.gen_range(60..200)]));
    let n_shapes = (w as usize * h as usize) / 500;
    for i in 0..n_shapes {
        let v = Luma([rng.gen_range(0..=255u8)]);
        if i % 4 == 3 {
            let cx = rng.gen_range(0..w) as i32;
            let cy = rng.gen_range(0..h) as i32;
            let r = rng.gen_range(4..18);
            for y in (cy - r).max(0)..(cy + r).min(h as i32) {
                for x in (cx - r).max(0)..(cx + r).min(w as i32) {
                    if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                        img.put_pixel(x as u32, y as u32, v);
                    }
                }
            }
        } else {
            let x0 = rng.gen_range(0..w);
            let y0 = rng.gen_range(0..h);
            let x1 = (x0 + rng.gen_range(6..48)).min(w);
            let y1 = (y0 + rng.gen_range(6..48)).min(h);
            for y in y0..y1 {
                for x in x0..x1 {
                    img.put_pixel(x, y, v);
                }
            }
        }
    }
    img
}

fn bilinear(img: &GrayImage, x: f64, y: f64) -> Option<u8> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (w - 1) as f64 || y > (h - 1) as f64 {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p = |x, y| img.get_pixel(x, y)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    Some((top * (1.0 - fy) + bottom * fy).round() as u8)
}

/// Render `src` as seen through `dst_from_src` onto a `w × h` canvas.
///
/// Pixels that fall outside the source are filled with `fill`.
pub(crate) fn warp_image(
    src: &GrayImage,
    dst_from_src: &Homography,
    w: u32,
    h: u32,
    fill: u8,
) -> GrayImage {
    let src_from_dst = dst_from_src
        .try_inverse()
        .unwrap_or_else(Homography::identity);
    let mut out = GrayImage::from_pixel(w, h, Luma([fill]));
    for y in 0..h {
        for x in 0..w {
            let Some(s) = src_from_dst.map_point([x as f64, y as f64]) else {
                continue;
            };
            if let Some(v) = bilinear(src, s[0], s[1]) {
                out.put_pixel(x, y, Luma([v]));
            }
        }
    }
    out
}

/// Uniform scaling by `scale` and rotation by `deg`, both about `(cx, cy)`.
pub(crate) fn similarity_homography(deg: f64, scale: f64, cx: f64, cy: f64) -> Homography {
    let (s, c) = deg.to_radians().sin_cos();
    let (a, b) = (scale * c, scale * s);
    Homography::from_rows([
        [a, -b, cx - a * cx + b * cy],
        [b, a, cy - b * cx - a * cy],
        [0.0, 0.0, 1.0],
    ])
}

/// Translation by `(tx, ty)` followed by a rotation of `deg` about `(cx, cy)`.
pub(crate) fn rigid_homography(deg: f64, cx: f64, cy: f64, tx: f64, ty: f64) -> Homography {
    let (s, c) = deg.to_radians().sin_cos();
    Homography::from_rows([
        [c, -s, cx - c * cx + s * cy + tx],
        [s, c, cy - s * cx - c * cy + ty],
        [0.0, 0.0, 1.0],
    ])
}
