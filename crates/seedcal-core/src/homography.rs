use crate::{sample_bilinear_rgb, RgbImage, RgbImageView};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = v[2];
        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    // Hartley normalization: translate to centroid, scale so mean distance = sqrt(2)
    let n = pts.len() as f64;
    let (cx, cy) = pts
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let (cx, cy) = (cx / n, cy / n);

    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let t = hartley_normalization(cx, cy, mean_dist);

    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 || !s.is_finite() {
        return None;
    }
    Some(h / s)
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    Some(t_dst_inv * hn * t_src)
}

/// Estimate H such that `dst ~ H * src` from `N >= 4` correspondences (normalized DLT).
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    if src.len() == 4 {
        let s: &[Point2<f64>; 4] = src.try_into().ok()?;
        let d: &[Point2<f64>; 4] = dst.try_into().ok()?;
        return homography_from_4pt(s, d);
    }

    let (r, tr) = normalize_points(src);
    let (i, ti) = normalize_points(dst);

    // Build A (2N x 9)
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);

    for k in 0..n {
        let x = r[k].x;
        let y = r[k].y;
        let u = i[k].x;
        let v = i[k].y;

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Solve Ah = 0 -> h is right singular vector with smallest singular value
    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let h = vt.row(last);

    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    let h_den = denormalize_homography(hn, tr, ti)?;
    let h_den = normalize_homography(h_den)?;

    Some(Homography::new(h_den))
}

/// Compute H such that `dst ~ H * src` from exactly 4 correspondences.
///
/// Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32], with h33 = 1
    let (src_n, t_src) = normalize_points(src);
    let (dst_n, t_dst) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let x = src_n[k].x;
        let y = src_n[k].y;
        let u = dst_n[k].x;
        let v = dst_n[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;

    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h_den = denormalize_homography(hn, t_src, t_dst)?;
    let h_den = normalize_homography(h_den)?;

    Some(Homography::new(h_den))
}

/// Settings for the outlier-tolerant homography solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacParams {
    /// Maximum reprojection distance (pixels) for a correspondence to count as inlier.
    pub reproj_threshold: f64,
    /// Hard cap on sampling rounds.
    pub max_iterations: usize,
    /// Desired probability of drawing at least one all-inlier sample.
    pub confidence: f64,
    /// Seed of the sample generator; equal seeds give equal results.
    pub seed: u64,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            reproj_threshold: 3.0,
            max_iterations: 2000,
            confidence: 0.995,
            seed: 0x5eed_c0de,
        }
    }
}

/// A robustly estimated homography and the indices of its inlier correspondences.
#[derive(Clone, Debug)]
pub struct RansacHomography {
    pub homography: Homography,
    pub inliers: Vec<usize>,
}

fn triangle_area2(a: Point2<f64>, b: Point2<f64>, c: Point2<f64>) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs()
}

fn has_collinear_triple(p: &[Point2<f64>; 4]) -> bool {
    const EPS: f64 = 1e-6;
    triangle_area2(p[0], p[1], p[2]) < EPS
        || triangle_area2(p[0], p[1], p[3]) < EPS
        || triangle_area2(p[0], p[2], p[3]) < EPS
        || triangle_area2(p[1], p[2], p[3]) < EPS
}

fn collect_inliers(
    h: &Homography,
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    threshold2: f64,
) -> (Vec<usize>, f64) {
    let mut inliers = Vec::new();
    let mut err_sum = 0.0;
    for (k, (s, d)) in src.iter().zip(dst).enumerate() {
        let p = h.apply(*s);
        let e2 = (p.x - d.x).powi(2) + (p.y - d.y).powi(2);
        if e2.is_finite() && e2 <= threshold2 {
            inliers.push(k);
            err_sum += e2;
        }
    }
    (inliers, err_sum)
}

/// Estimate H such that `dst ~ H * src` while tolerating outlier correspondences.
///
/// Minimal 4-point samples are scored by inlier count (ties broken by the summed
/// squared reprojection error), and the winner is refit on all of its inliers.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, dst, params), fields(n = src.len()))
)]
pub fn estimate_homography_ransac(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
    params: &RansacParams,
) -> Option<RansacHomography> {
    let n = src.len();
    if n != dst.len() || n < 4 {
        return None;
    }

    let threshold2 = params.reproj_threshold * params.reproj_threshold;
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best: Option<(Homography, Vec<usize>, f64)> = None;
    let mut needed = params.max_iterations;
    let mut iteration = 0;

    while iteration < needed.min(params.max_iterations) {
        iteration += 1;

        let mut idx = [0usize; 4];
        let mut k = 0;
        while k < 4 {
            let cand = rng.gen_range(0..n);
            if !idx[..k].contains(&cand) {
                idx[k] = cand;
                k += 1;
            }
        }
        let s = idx.map(|i| src[i]);
        let d = idx.map(|i| dst[i]);
        if has_collinear_triple(&s) || has_collinear_triple(&d) {
            continue;
        }
        let Some(h) = homography_from_4pt(&s, &d) else {
            continue;
        };

        let (inliers, err) = collect_inliers(&h, src, dst, threshold2);
        let better = match &best {
            None => inliers.len() >= 4,
            Some((_, b, be)) => {
                inliers.len() > b.len() || (inliers.len() == b.len() && err < *be)
            }
        };
        if better {
            let w = inliers.len() as f64 / n as f64;
            let denom = (1.0 - w.powi(4)).ln();
            if denom < 0.0 {
                let est = ((1.0 - params.confidence).ln() / denom).ceil();
                if est.is_finite() && est >= 0.0 {
                    needed = (est as usize).max(1);
                }
            }
            best = Some((h, inliers, err));
        }
    }

    let (h, inliers, _) = best?;

    let src_in: Vec<Point2<f64>> = inliers.iter().map(|&i| src[i]).collect();
    let dst_in: Vec<Point2<f64>> = inliers.iter().map(|&i| dst[i]).collect();
    if let Some(refit) = estimate_homography(&src_in, &dst_in) {
        let (refit_inliers, _) = collect_inliers(&refit, src, dst, threshold2);
        if refit_inliers.len() >= inliers.len() {
            return Some(RansacHomography {
                homography: refit,
                inliers: refit_inliers,
            });
        }
    }

    Some(RansacHomography {
        homography: h,
        inliers,
    })
}

/// Warp into rectified image: for each dst pixel, map to src via H_img_from_rect and sample.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(src, h_img_from_rect), fields(out_w, out_h))
)]
pub fn warp_perspective_rgb(
    src: &RgbImageView<'_>,
    h_img_from_rect: Homography,
    out_w: usize,
    out_h: usize,
) -> RgbImage {
    let mut out = RgbImage::new(out_w, out_h);

    for y in 0..out_h {
        for x in 0..out_w {
            let pr = Point2::new(x as f64 + 0.5, y as f64 + 0.5);
            let pi = h_img_from_rect.apply(pr);
            // pixel centres sit at +0.5 in the source as well
            let v = sample_bilinear_rgb(src, (pi.x - 0.5) as f32, (pi.y - 0.5) as f32);
            out.put_pixel(
                x,
                y,
                [
                    v[0].round().clamp(0.0, 255.0) as u8,
                    v[1].round().clamp(0.0, 255.0) as u8,
                    v[2].round().clamp(0.0, 255.0) as u8,
                ],
            );
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // 64 × 108 mm chart rendered at 5 px/mm, 4 × 6 patches
    const CHART_W: f64 = 320.0;
    const CHART_H: f64 = 540.0;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a - b).norm() < tol,
            "expected ({:.4},{:.4}) ~ ({:.4},{:.4}) within {tol}",
            a.x,
            a.y,
            b.x,
            b.y
        );
    }

    /// Chart pixels to photo pixels for a chart lying tilted on the tray.
    fn chart_to_photo() -> Homography {
        Homography::new(Matrix3::new(
            0.9, 0.08, 410.0, //
            -0.06, 0.95, 260.0, //
            0.0002, -0.0001, 1.0,
        ))
    }

    fn chart_corners() -> [Point2<f64>; 4] {
        [
            Point2::new(0.0, 0.0),
            Point2::new(CHART_W, 0.0),
            Point2::new(CHART_W, CHART_H),
            Point2::new(0.0, CHART_H),
        ]
    }

    fn patch_centres() -> Vec<Point2<f64>> {
        (0..6)
            .flat_map(|r| {
                (0..4).map(move |c| Point2::new((c as f64 + 0.5) * 80.0, (r as f64 + 0.5) * 90.0))
            })
            .collect()
    }

    #[test]
    fn photo_outline_maps_back_to_chart_corners() {
        let h = chart_to_photo();
        let inv = h.inverse().expect("invertible");
        for p in chart_corners().into_iter().chain(patch_centres()) {
            assert_close(inv.apply(h.apply(p)), p, 1e-6);
        }
    }

    #[test]
    fn chart_corners_recover_the_mapping() {
        let gt = chart_to_photo();
        let corners = chart_corners();
        let outline = corners.map(|p| gt.apply(p));

        let recovered = homography_from_4pt(&corners, &outline).expect("recoverable");
        for p in patch_centres() {
            assert_close(recovered.apply(p), gt.apply(p), 1e-6);
        }
    }

    #[test]
    fn patch_centres_overdetermine_the_mapping() {
        let gt = chart_to_photo();
        let src = patch_centres();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| gt.apply(p)).collect();

        let estimated = estimate_homography(&src, &dst).expect("estimate");
        for p in chart_corners() {
            assert_close(estimated.apply(p), gt.apply(p), 1e-6);
        }
    }

    #[test]
    fn unequal_correspondence_counts_fail() {
        let gt = chart_to_photo();
        let src = patch_centres();
        let dst: Vec<Point2<f64>> = src.iter().skip(1).map(|&p| gt.apply(p)).collect();
        assert!(estimate_homography(&src, &dst).is_none());
        assert!(estimate_homography_ransac(&src, &dst, &RansacParams::default()).is_none());
    }

    #[test]
    fn ransac_ignores_gross_outliers() {
        let gt = chart_to_photo();
        let mut src = patch_centres();
        src.extend(chart_corners());
        let mut dst: Vec<Point2<f64>> = src.iter().map(|&p| gt.apply(p)).collect();
        // corrupt every fifth match
        for k in (0..dst.len()).step_by(5) {
            dst[k].x += 80.0 + k as f64;
            dst[k].y -= 45.0;
        }

        let res = estimate_homography_ransac(&src, &dst, &RansacParams::default()).expect("ransac");
        assert_eq!(res.inliers.len(), 22);
        for p in [Point2::new(10.0, 10.0), Point2::new(300.0, 500.0)] {
            assert_close(res.homography.apply(p), gt.apply(p), 1e-3);
        }
    }

    #[test]
    fn warp_with_identity_reproduces_source() {
        let img = RgbImage::from_fn(8, 6, |x, y| [(x * 20) as u8, (y * 30) as u8, 99]);
        let out = warp_perspective_rgb(&img.view(), Homography::identity(), 8, 6);
        assert_eq!(out, img);
    }
}
