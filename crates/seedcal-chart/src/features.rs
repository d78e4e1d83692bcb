//! Keypoints and binary descriptors used to find the chart in a photo.
//!
//! The built-in [`BriefExtractor`] detects Harris corners on a small image
//! pyramid and describes each with 256 intensity comparisons steered by the
//! patch orientation. Any other detector can be plugged into the locator
//! through [`FeatureExtractor`].

use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seedcal_core::{sample_bilinear, GrayImage, GrayImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Interest point in level-0 pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Keypoint {
    pub position: Point2<f64>,
    pub response: f32,
    /// Dominant patch orientation in radians.
    pub angle: f32,
    /// Pyramid level the point was detected on.
    pub level: usize,
}

/// 256-bit binary descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    #[inline]
    pub fn hamming(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Keypoints with one descriptor each (`keypoints.len() == descriptors.len()`).
#[derive(Clone, Debug, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Detect and describe keypoints on a grayscale raster.
pub trait FeatureExtractor {
    fn extract(&self, image: &GrayImageView<'_>) -> Features;
}

/// Tuning of the built-in corner + BRIEF extractor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefParams {
    /// Keep at most this many keypoints (strongest first).
    pub max_keypoints: usize,
    pub pyramid_levels: usize,
    /// Downscale factor between consecutive pyramid levels.
    pub scale_factor: f64,
    /// Harris sensitivity `k` in `det − k·trace²`.
    pub harris_k: f32,
    /// Minimum response relative to the strongest response on the level.
    pub response_fraction: f32,
    /// Non-maximum suppression radius (pixels).
    pub nms_radius: usize,
    /// Half size of the box filter applied before the binary tests.
    pub smoothing_radius: usize,
    /// Seed of the binary test pattern; both images must use the same one.
    pub pattern_seed: u64,
}

impl Default for BriefParams {
    fn default() -> Self {
        Self {
            max_keypoints: 1500,
            pyramid_levels: 4,
            scale_factor: 1.5,
            harris_k: 0.04,
            response_fraction: 0.01,
            nms_radius: 3,
            smoothing_radius: 2,
            pattern_seed: 0x0b21_ef00,
        }
    }
}

const PATTERN_LEN: usize = 256;
/// Binary test offsets lie in `[-PATTERN_EXTENT, PATTERN_EXTENT]`.
const PATTERN_EXTENT: i32 = 12;
const ORIENTATION_RADIUS: i32 = 15;
/// Keypoints closer than this to a level border are dropped.
const BORDER: usize = 20;

/// Harris corners + orientation-steered BRIEF descriptors.
#[derive(Clone, Debug)]
pub struct BriefExtractor {
    params: BriefParams,
    pattern: Vec<[(i32, i32); 2]>,
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::new(BriefParams::default())
    }
}

impl BriefExtractor {
    pub fn new(params: BriefParams) -> Self {
        let mut rng = StdRng::seed_from_u64(params.pattern_seed);
        let mut coord = || rng.gen_range(-PATTERN_EXTENT..=PATTERN_EXTENT);
        let mut pattern = Vec::with_capacity(PATTERN_LEN);
        while pattern.len() < PATTERN_LEN {
            let p = (coord(), coord());
            let q = (coord(), coord());
            if p != q {
                pattern.push([p, q]);
            }
        }
        Self { params, pattern }
    }

    pub fn params(&self) -> &BriefParams {
        &self.params
    }
}

impl FeatureExtractor for BriefExtractor {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, image), fields(w = image.width, h = image.height))
    )]
    fn extract(&self, image: &GrayImageView<'_>) -> Features {
        let mut found: Vec<(Keypoint, Descriptor)> = Vec::new();
        let min_side = 2 * BORDER + 1;

        for level in 0..self.params.pyramid_levels.max(1) {
            let scale = self.params.scale_factor.powi(level as i32);
            let w = (image.width as f64 / scale).round() as usize;
            let h = (image.height as f64 / scale).round() as usize;
            if w < min_side || h < min_side {
                break;
            }

            let level_img = if level == 0 {
                GrayImage {
                    width: image.width,
                    height: image.height,
                    data: image.data.to_vec(),
                }
            } else {
                resize_gray(image, w, h)
            };

            let smooth = box_filter(
                &to_f32(&level_img),
                w,
                h,
                self.params.smoothing_radius,
                true,
            );
            let response = harris_response(&smooth, w, h, self.params.harris_k);

            for (x, y, r) in local_maxima(&response, w, h, self.params.nms_radius, self.params.response_fraction)
            {
                let angle = patch_orientation(&smooth, w, x, y);
                let descriptor = self.describe(&smooth, w, x, y, angle);
                let position = Point2::new(
                    (x as f64 + 0.5) * (image.width as f64 / w as f64) - 0.5,
                    (y as f64 + 0.5) * (image.height as f64 / h as f64) - 0.5,
                );
                found.push((
                    Keypoint {
                        position,
                        response: r,
                        angle,
                        level,
                    },
                    descriptor,
                ));
            }
        }

        found.sort_by(|a, b| b.0.response.total_cmp(&a.0.response));
        found.truncate(self.params.max_keypoints);

        log::debug!(
            "extracted {} keypoints from {}x{} image",
            found.len(),
            image.width,
            image.height
        );

        let (keypoints, descriptors) = found.into_iter().unzip();
        Features {
            keypoints,
            descriptors,
        }
    }
}

impl BriefExtractor {
    fn describe(&self, smooth: &[f32], w: usize, x: usize, y: usize, angle: f32) -> Descriptor {
        let (s, c) = angle.sin_cos();
        let at = |(dx, dy): (i32, i32)| -> f32 {
            let rx = (c * dx as f32 - s * dy as f32).round() as i64;
            let ry = (s * dx as f32 + c * dy as f32).round() as i64;
            let px = (x as i64 + rx) as usize;
            let py = (y as i64 + ry) as usize;
            smooth[py * w + px]
        };

        let mut bits = [0u64; 4];
        for (i, [p, q]) in self.pattern.iter().enumerate() {
            if at(*p) < at(*q) {
                bits[i / 64] |= 1u64 << (i % 64);
            }
        }
        Descriptor(bits)
    }
}

fn to_f32(img: &GrayImage) -> Vec<f32> {
    img.data.iter().map(|&v| v as f32).collect()
}

fn resize_gray(src: &GrayImageView<'_>, w: usize, h: usize) -> GrayImage {
    let sx = src.width as f32 / w as f32;
    let sy = src.height as f32 / h as f32;
    let mut out = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let fx = (x as f32 + 0.5) * sx - 0.5;
            let fy = (y as f32 + 0.5) * sy - 0.5;
            let v = sample_bilinear(src, fx, fy);
            out.set(x, y, v.round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}

/// Separable box filter with clamped borders; `normalize` turns the sum into a mean.
fn box_filter(data: &[f32], w: usize, h: usize, r: usize, normalize: bool) -> Vec<f32> {
    if r == 0 {
        return data.to_vec();
    }
    let ri = r as i64;
    let mut tmp = vec![0.0f32; w * h];
    for y in 0..h {
        let row = &data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for d in -ri..=ri {
                let xx = (x as i64 + d).clamp(0, w as i64 - 1) as usize;
                acc += row[xx];
            }
            tmp[y * w + x] = acc;
        }
    }
    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for d in -ri..=ri {
                let yy = (y as i64 + d).clamp(0, h as i64 - 1) as usize;
                acc += tmp[yy * w + x];
            }
            out[y * w + x] = acc;
        }
    }
    if normalize {
        let n = ((2 * r + 1) * (2 * r + 1)) as f32;
        out.iter_mut().for_each(|v| *v /= n);
    }
    out
}

fn harris_response(img: &[f32], w: usize, h: usize, k: f32) -> Vec<f32> {
    let mut ixx = vec![0.0f32; w * h];
    let mut iyy = vec![0.0f32; w * h];
    let mut ixy = vec![0.0f32; w * h];
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let p = |dx: i64, dy: i64| img[(y as i64 + dy) as usize * w + (x as i64 + dx) as usize];
            // Sobel
            let gx = (p(1, -1) + 2.0 * p(1, 0) + p(1, 1)) - (p(-1, -1) + 2.0 * p(-1, 0) + p(-1, 1));
            let gy = (p(-1, 1) + 2.0 * p(0, 1) + p(1, 1)) - (p(-1, -1) + 2.0 * p(0, -1) + p(1, -1));
            let i = y * w + x;
            ixx[i] = gx * gx;
            iyy[i] = gy * gy;
            ixy[i] = gx * gy;
        }
    }
    let sxx = box_filter(&ixx, w, h, 2, false);
    let syy = box_filter(&iyy, w, h, 2, false);
    let sxy = box_filter(&ixy, w, h, 2, false);

    sxx.iter()
        .zip(&syy)
        .zip(&sxy)
        .map(|((a, b), c)| {
            let det = a * b - c * c;
            let tr = a + b;
            det - k * tr * tr
        })
        .collect()
}

fn local_maxima(
    response: &[f32],
    w: usize,
    h: usize,
    radius: usize,
    fraction: f32,
) -> Vec<(usize, usize, f32)> {
    let max = response.iter().copied().fold(0.0f32, f32::max);
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = max * fraction;
    let r = radius as i64;
    let mut out = Vec::new();

    for y in BORDER..h.saturating_sub(BORDER) {
        'px: for x in BORDER..w.saturating_sub(BORDER) {
            let v = response[y * w + x];
            if v <= threshold {
                continue;
            }
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (xx, yy) = (x as i64 + dx, y as i64 + dy);
                    let n = response[yy as usize * w + xx as usize];
                    // ties resolve to the first pixel in scan order
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if n > v || (earlier && n == v) {
                        continue 'px;
                    }
                }
            }
            out.push((x, y, v));
        }
    }
    out
}

/// Intensity-centroid orientation over a disc around `(x, y)`.
fn patch_orientation(img: &[f32], w: usize, x: usize, y: usize) -> f32 {
    let r = ORIENTATION_RADIUS;
    let (mut m01, mut m10) = (0.0f32, 0.0f32);
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = img[(y as i64 + dy as i64) as usize * w + (x as i64 + dx as i64) as usize];
            m10 += dx as f32 * v;
            m01 += dy as f32 * v;
        }
    }
    m01.atan2(m10)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker_image(w: usize, h: usize, cell: usize) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let (cx, cy) = (x / cell, y / cell);
                img.set(x, y, ((cx * 37 + cy * 71) % 200 + 30) as u8);
            }
        }
        img
    }

    #[test]
    fn hamming_counts_differing_bits() {
        let a = Descriptor([0, 0, 0, 0]);
        let b = Descriptor([0b1011, 0, 1 << 63, 0]);
        assert_eq!(a.hamming(&b), 4);
        assert_eq!(b.hamming(&b), 0);
    }

    #[test]
    fn pattern_is_deterministic_and_bounded() {
        let a = BriefExtractor::default();
        let b = BriefExtractor::default();
        assert_eq!(a.pattern, b.pattern);
        assert_eq!(a.pattern.len(), PATTERN_LEN);
        for [p, q] in &a.pattern {
            for (x, y) in [p, q] {
                assert!(x.abs() <= PATTERN_EXTENT && y.abs() <= PATTERN_EXTENT);
            }
        }
    }

    #[test]
    fn flat_image_has_no_keypoints() {
        let img = GrayImage::from_raw(80, 80, vec![128; 6400]).expect("image");
        let f = BriefExtractor::default().extract(&img.view());
        assert!(f.is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let a = checker_image(160, 160, 20);
        let b = checker_image(160, 160, 20);
        let extractor = BriefExtractor::default();
        let fa = extractor.extract(&a.view());
        let fb = extractor.extract(&b.view());
        assert!(fa.len() > 10);
        assert_eq!(fa.len(), fb.len());
        assert_eq!(fa.descriptors, fb.descriptors);
        assert_eq!(fa.keypoints.len(), fa.descriptors.len());
    }
}
