//! Patch-centre placement and refinement on a rectified chart.
//!
//! Centres start at the chart's nominal patch positions. Two optional local
//! searches then nudge each centre: one towards the neighbourhood whose color
//! is closest to the patch's reference color, one away from the side where
//! the color changes most (a patch edge).

use crate::{ReferenceChart, CHART_COLS, CHART_ROWS};
use nalgebra::Point2;
use seedcal_core::{Color, ColorMetric, RgbImageView};
use serde::{Deserialize, Serialize};

/// Offsets of the 9-point sampling stencil: row-major from `(-x, -y)` to `(+x, +y)`.
pub const STENCIL_LEN: usize = 9;
const TOP: [usize; 3] = [0, 1, 2];
const BOTTOM: [usize; 3] = [6, 7, 8];
const LEFT: [usize; 3] = [0, 3, 6];
const RIGHT: [usize; 3] = [2, 5, 8];

/// Reference-guided search settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceRefineParams {
    pub iterations: usize,
    /// Step sizes are divided by this after every committed direction.
    pub step_change: f64,
    /// The opposite stencil point must be this many times farther (Lab) than
    /// the nearest one before the centre moves.
    pub ratio_threshold: f64,
    /// Ratio used instead for `low_contrast_patches`.
    pub low_contrast_ratio_threshold: f64,
    /// `(row, col)` of patches whose color is close to the chart frame.
    pub low_contrast_patches: Vec<(usize, usize)>,
    /// Stencil points whose 3×3 neighbourhood brightness variance exceeds this are ignored.
    pub variance_threshold: f64,
    /// Stencil spread used while searching, relative to the sampling stencil.
    pub distance_coefficient: f64,
}

impl Default for ReferenceRefineParams {
    fn default() -> Self {
        Self {
            iterations: 3,
            step_change: 1.2,
            ratio_threshold: 1.1,
            low_contrast_ratio_threshold: 2.0,
            low_contrast_patches: vec![(0, 3), (1, 3)],
            variance_threshold: 100.0,
            distance_coefficient: 1.5,
        }
    }
}

/// Edge-avoidance search settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviationRefineParams {
    pub iterations: usize,
    /// One side's summed deviation must exceed the other's by this factor.
    pub ratio_threshold: f64,
    pub step_change: f64,
}

impl Default for DeviationRefineParams {
    fn default() -> Self {
        Self {
            iterations: 10,
            ratio_threshold: 1.5,
            step_change: 1.5,
        }
    }
}

/// Sampling stencil geometry and refinement switches.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerParams {
    /// Horizontal stencil spacing as a fraction of the rectified chart width.
    pub x_scale_fraction: f64,
    /// Vertical stencil spacing as a fraction of the rectified chart height.
    pub y_scale_fraction: f64,
    /// Neighbourhood spacing used for means/variances is `scale / divisor`.
    pub color_patch_divisor: i64,
    pub correct_by_reference: bool,
    pub correct_by_deviation: bool,
    pub reference: ReferenceRefineParams,
    pub deviation: DeviationRefineParams,
    /// Pixel stride of the dense block sample between opposite stencil corners.
    pub block_stride: usize,
}

impl Default for SamplerParams {
    fn default() -> Self {
        Self {
            x_scale_fraction: 0.04,
            y_scale_fraction: 0.02,
            color_patch_divisor: 8,
            correct_by_reference: true,
            correct_by_deviation: true,
            reference: ReferenceRefineParams::default(),
            deviation: DeviationRefineParams::default(),
            block_stride: 10,
        }
    }
}

impl SamplerParams {
    /// Nominal centres only; used to score candidate chart outlines quickly.
    pub fn without_corrections() -> Self {
        Self {
            correct_by_reference: false,
            correct_by_deviation: false,
            ..Self::default()
        }
    }
}

/// Patch centres, `[row][col]`.
pub type PatchGrid = [[Point2<f64>; CHART_COLS]; CHART_ROWS];

/// Computes patch centres on a rectified chart image.
pub struct PatchSampler<'a> {
    image: RgbImageView<'a>,
    chart: &'a ReferenceChart,
    params: &'a SamplerParams,
    x_scale: i64,
    y_scale: i64,
    x_patch: i64,
    y_patch: i64,
}

impl<'a> PatchSampler<'a> {
    pub fn new(
        image: RgbImageView<'a>,
        chart: &'a ReferenceChart,
        params: &'a SamplerParams,
    ) -> Self {
        let x_scale = (params.x_scale_fraction * image.width as f64) as i64;
        let y_scale = (params.y_scale_fraction * image.height as f64) as i64;
        let divisor = params.color_patch_divisor.max(1);
        Self {
            image,
            chart,
            params,
            x_scale,
            y_scale,
            x_patch: x_scale / divisor,
            y_patch: y_scale / divisor,
        }
    }

    /// Stencil spacing `(x, y)` in pixels.
    pub fn scale(&self) -> (i64, i64) {
        (self.x_scale, self.y_scale)
    }

    pub fn initial_center(&self, row: usize, col: usize) -> Point2<f64> {
        Point2::new(
            self.chart.x_centers[col] * self.image.width as f64,
            self.chart.y_centers[row] * self.image.height as f64,
        )
    }

    /// All patch centres with the configured refinements applied.
    pub fn centers(&self) -> PatchGrid {
        std::array::from_fn(|row| {
            std::array::from_fn(|col| {
                let mut c = self.initial_center(row, col);
                if self.params.correct_by_reference {
                    c = self.refine_by_reference(c, row, col);
                }
                if self.params.correct_by_deviation {
                    c = self.refine_by_deviation(c);
                }
                c
            })
        })
    }

    /// The 9-point stencil around `center`.
    pub fn stencil(&self, center: Point2<f64>) -> [Point2<f64>; STENCIL_LEN] {
        stencil(center, self.x_scale as f64, self.y_scale as f64)
    }

    #[inline]
    fn color_at(&self, x: i64, y: i64) -> [f64; 3] {
        self.image.pixel_clamped(x, y).map(f64::from)
    }

    fn neighbourhood(&self, x: i64, y: i64) -> impl Iterator<Item = [f64; 3]> + '_ {
        (-1..=1).flat_map(move |i| {
            (-1..=1).map(move |j| self.color_at(x + i * self.x_patch, y + j * self.y_patch))
        })
    }

    fn mean_color(&self, x: i64, y: i64) -> Color {
        let mut acc = [0.0; 3];
        for c in self.neighbourhood(x, y) {
            for k in 0..3 {
                acc[k] += c[k];
            }
        }
        Color::from_rgb(acc.map(|v| v / 9.0))
    }

    /// Variance of the brightest channel over the 3×3 neighbourhood.
    fn value_variance(&self, x: i64, y: i64) -> f64 {
        let (mut m1, mut m2) = (0.0, 0.0);
        for c in self.neighbourhood(x, y) {
            let v = c[0].max(c[1]).max(c[2]);
            m1 += v;
            m2 += v * v;
        }
        m1 /= 9.0;
        m2 /= 9.0;
        m2 - m1 * m1
    }

    /// Whether the whole stencil stays inside the image after shifting by `(dx, dy)`.
    fn fits(&self, points: &[Point2<f64>; STENCIL_LEN], dx: f64, dy: f64) -> bool {
        points.iter().all(|p| self.image.contains(p.x + dx, p.y + dy))
    }

    /// Local search towards the neighbourhood that best matches the reference color.
    pub fn refine_by_reference(&self, center: Point2<f64>, row: usize, col: usize) -> Point2<f64> {
        let rp = &self.params.reference;
        let threshold = if rp.low_contrast_patches.contains(&(row, col)) {
            rp.low_contrast_ratio_threshold
        } else {
            rp.ratio_threshold
        };
        let reference = self.chart.color(row, col);
        let metric = ColorMetric::EuclideanLab;

        let mut center = center;
        let mut x_step = self.x_scale as f64;
        let mut y_step = self.y_scale as f64;

        for _ in 0..rp.iterations {
            let points = self.stencil(center);
            let mut nearest: Option<(usize, f64)> = None;

            for (i, p) in points.iter().enumerate() {
                let x = (center.x + (p.x - center.x) * rp.distance_coefficient) as i64;
                let y = (center.y + (p.y - center.y) * rp.distance_coefficient) as i64;
                if self.value_variance(x, y) < rp.variance_threshold {
                    let d = metric.distance(&self.mean_color(x, y), &reference);
                    if nearest.map_or(true, |(_, best)| d < best) {
                        nearest = Some((i, d));
                    }
                }
            }

            let Some((nearest, nearest_distance)) = nearest else {
                return center;
            };
            let opposite = points[STENCIL_LEN - 1 - nearest];
            let opposite_distance = metric.distance(
                &self.mean_color(opposite.x as i64, opposite.y as i64),
                &reference,
            );
            if opposite_distance <= nearest_distance * threshold {
                return center;
            }

            if RIGHT.contains(&nearest) {
                if self.fits(&points, x_step, 0.0) {
                    center.x += x_step;
                }
                x_step /= rp.step_change;
            } else if LEFT.contains(&nearest) {
                if self.fits(&points, -x_step, 0.0) {
                    center.x -= x_step;
                }
                x_step /= rp.step_change;
            }

            if BOTTOM.contains(&nearest) {
                if self.fits(&points, 0.0, y_step) {
                    center.y += y_step;
                }
                y_step /= rp.step_change;
            } else if TOP.contains(&nearest) {
                if self.fits(&points, 0.0, -y_step) {
                    center.y -= y_step;
                }
                y_step /= rp.step_change;
            }
        }

        center
    }

    /// Summed RGB distance between the (shifted) centre pixel and the stencil points in `side`.
    fn deviation_sum(
        &self,
        points: &[Point2<f64>; STENCIL_LEN],
        center: Point2<f64>,
        side: &[usize; 3],
        dx: f64,
        dy: f64,
    ) -> f64 {
        let at = |p: Point2<f64>| {
            Color::from_rgb(self.color_at((p.x + dx) as i64, (p.y + dy) as i64))
        };
        let c = at(center);
        side.iter()
            .map(|&i| ColorMetric::EuclideanRgb.distance(&c, &at(points[i])))
            .sum()
    }

    /// Move the centre away from the side with markedly larger color deviation.
    pub fn refine_by_deviation(&self, center: Point2<f64>) -> Point2<f64> {
        let dp = &self.params.deviation;
        let mut center = center;
        let mut x_step = self.x_scale as f64;
        let mut y_step = self.y_scale as f64;

        for _ in 0..dp.iterations {
            let points = self.stencil(center);
            let top = self.deviation_sum(&points, center, &TOP, 0.0, 0.0);
            let bottom = self.deviation_sum(&points, center, &BOTTOM, 0.0, 0.0);
            let left = self.deviation_sum(&points, center, &LEFT, 0.0, 0.0);
            let right = self.deviation_sum(&points, center, &RIGHT, 0.0, 0.0);
            let mut next = center;

            let horizontal = if left >= right * dp.ratio_threshold {
                Some(x_step)
            } else if right >= left * dp.ratio_threshold {
                Some(-x_step)
            } else {
                None
            };
            if let Some(dx) = horizontal {
                if self.fits(&points, dx, 0.0) {
                    let l = self.deviation_sum(&points, center, &LEFT, dx, 0.0);
                    let r = self.deviation_sum(&points, center, &RIGHT, dx, 0.0);
                    if l + r < left + right {
                        next.x += dx;
                    }
                }
                x_step /= dp.step_change;
            }

            let vertical = if top >= bottom * dp.ratio_threshold {
                Some(y_step)
            } else if bottom >= top * dp.ratio_threshold {
                Some(-y_step)
            } else {
                None
            };
            if let Some(dy) = vertical {
                if self.fits(&points, 0.0, dy) {
                    let t = self.deviation_sum(&points, center, &TOP, 0.0, dy);
                    let b = self.deviation_sum(&points, center, &BOTTOM, 0.0, dy);
                    if t + b < top + bottom {
                        next.y += dy;
                    }
                }
                y_step /= dp.step_change;
            }

            center = next;
        }

        center
    }
}

pub(crate) fn stencil(center: Point2<f64>, xs: f64, ys: f64) -> [Point2<f64>; STENCIL_LEN] {
    std::array::from_fn(|i| {
        let dx = (i % 3) as f64 - 1.0;
        let dy = (i / 3) as f64 - 1.0;
        Point2::new(center.x + dx * xs, center.y + dy * ys)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedcal_core::RgbImage;

    #[test]
    fn stencil_order_is_row_major() {
        let s = stencil(Point2::new(10.0, 20.0), 2.0, 3.0);
        assert_eq!(s[0], Point2::new(8.0, 17.0));
        assert_eq!(s[1], Point2::new(10.0, 17.0));
        assert_eq!(s[4], Point2::new(10.0, 20.0));
        assert_eq!(s[5], Point2::new(12.0, 20.0));
        assert_eq!(s[8], Point2::new(12.0, 23.0));
    }

    #[test]
    fn ideal_chart_centres_do_not_move() {
        let chart = ReferenceChart::classic();
        let img = chart.render(10.0);
        let params = SamplerParams::default();
        let sampler = PatchSampler::new(img.view(), &chart, &params);
        let centers = sampler.centers();
        for row in 0..CHART_ROWS {
            for col in 0..CHART_COLS {
                assert_eq!(centers[row][col], sampler.initial_center(row, col));
            }
        }
    }

    #[test]
    fn deviation_refinement_steps_away_from_an_edge() {
        // patch occupies x >= 40; the centre starts close to its left edge
        let img = RgbImage::from_fn(200, 400, |x, _| if x < 40 { [20, 20, 20] } else { [200, 40, 40] });
        let chart = ReferenceChart::classic();
        let params = SamplerParams::default();
        let sampler = PatchSampler::new(img.view(), &chart, &params);
        let (xs, _) = sampler.scale();
        assert_eq!(xs, 8);

        let start = Point2::new(45.0, 200.0);
        let moved = sampler.refine_by_deviation(start);
        assert!(moved.x > start.x, "moved to {moved:?}");
        assert_eq!(moved.y, start.y);
        // stencil now clear of the edge
        assert!(moved.x - xs as f64 >= 40.0);
    }

    #[test]
    fn reference_refinement_moves_towards_matching_color() {
        let chart = ReferenceChart::classic();
        let target = chart.rgb(2, 1);
        // matching patch on the right half, an unrelated color on the left
        let img = RgbImage::from_fn(400, 800, |x, _| if x >= 200 { target } else { [240, 240, 0] });
        let params = SamplerParams::default();
        let sampler = PatchSampler::new(img.view(), &chart, &params);
        let start = Point2::new(195.0, 400.0);
        let moved = sampler.refine_by_reference(start, 2, 1);
        assert!(moved.x > start.x, "moved to {moved:?}");
    }

    #[test]
    fn shifts_that_leave_the_image_are_skipped() {
        // an edge on the right would push the centre left, past the border
        let img = RgbImage::from_fn(100, 200, |x, _| if x >= 7 { [0, 0, 0] } else { [255, 255, 255] });
        let chart = ReferenceChart::classic();
        let params = SamplerParams::default();
        let sampler = PatchSampler::new(img.view(), &chart, &params);
        let start = Point2::new(4.0, 100.0);
        assert_eq!(sampler.refine_by_deviation(start), start);
    }
}
