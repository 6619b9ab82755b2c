use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gazemap::{
    fit_homography_ransac, match_ratio, FeatureConfig, FeatureExtractor, Homography,
    RansacHomographyConfig,
};
use image::{GrayImage, Luma};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Scene-camera sized frame of random rectangles over a smooth background.
fn make_scene_fixture(width: u32, height: u32, seed: u64) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    let buf = img.as_mut();
    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) as usize;
            let v = 128.0 + 35.0 * ((x as f32 * 0.007).sin() + (y as f32 * 0.011).cos());
            buf[idx] = v.clamp(0.0, 255.0) as u8;
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let n_rects = (width as usize * height as usize) / 600;
    for _ in 0..n_rects {
        let x0 = rng.gen_range(0..width);
        let y0 = rng.gen_range(0..height);
        let x1 = (x0 + rng.gen_range(8..64)).min(width);
        let y1 = (y0 + rng.gen_range(8..64)).min(height);
        let v = Luma([rng.gen_range(0..=255u8)]);
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, v);
            }
        }
    }
    img
}

/// Integer shift, so every keypoint reappears with an identical patch.
fn shift(img: &GrayImage, dx: u32, dy: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    let mut out = GrayImage::from_pixel(w, h, Luma([128]));
    for y in dy..h {
        for x in dx..w {
            out.put_pixel(x, y, *img.get_pixel(x - dx, y - dy));
        }
    }
    out
}

fn bench_extract(c: &mut Criterion) {
    let extractor = FeatureExtractor::new(FeatureConfig::default());
    let img_640 = make_scene_fixture(640, 480, 7);
    let img_1280 = make_scene_fixture(1280, 720, 9);

    c.bench_function("extract_640x480", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&img_640)).len()))
    });

    c.bench_function("extract_1280x720", |b| {
        b.iter(|| black_box(extractor.extract(black_box(&img_1280)).len()))
    });
}

fn bench_match(c: &mut Criterion) {
    let extractor = FeatureExtractor::new(FeatureConfig::default());
    let reference = make_scene_fixture(640, 480, 11);
    let frame = shift(&reference, 12, 7);
    let ref_kps = extractor.extract(&reference);
    let frame_kps = extractor.extract(&frame);

    c.bench_function("match_ratio_1000x1000", |b| {
        b.iter(|| black_box(match_ratio(black_box(&ref_kps), black_box(&frame_kps), 0.5).len()))
    });
}

fn make_correspondences(n: usize, outlier_frac: f64, seed: u64) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    let h = Homography::from_rows([
        [1.02, 0.03, 14.0],
        [-0.02, 0.99, -9.0],
        [0.00002, -0.00001, 1.0],
    ]);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut src = Vec::with_capacity(n);
    let mut dst = Vec::with_capacity(n);
    for _ in 0..n {
        let s = [rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)];
        let d = if rng.gen_bool(outlier_frac) {
            [rng.gen_range(0.0..640.0), rng.gen_range(0.0..480.0)]
        } else {
            let p = h.map_point(s).unwrap_or(s);
            [p[0] + rng.gen_range(-0.5..0.5), p[1] + rng.gen_range(-0.5..0.5)]
        };
        src.push(s);
        dst.push(d);
    }
    (src, dst)
}

fn bench_ransac(c: &mut Criterion) {
    let cfg = RansacHomographyConfig::default();
    let (src, dst) = make_correspondences(200, 0.4, 3);

    c.bench_function("ransac_homography_200pts_40pct_outliers", |b| {
        b.iter(|| {
            let fit = fit_homography_ransac(black_box(&src), black_box(&dst), &cfg, None)
                .expect("deterministic fixture should always fit");
            black_box(fit.n_inliers)
        })
    });
}

criterion_group!(hotpaths, bench_extract, bench_match, bench_ransac);
criterion_main!(hotpaths);
