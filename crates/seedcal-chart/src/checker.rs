use crate::sampler::{stencil, PatchGrid, PatchSampler, SamplerParams, STENCIL_LEN};
use crate::ReferenceChart;
use seedcal_core::{Color, ColorMetric, ColorPairs, ColorSpace, RgbImage, RgbImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// A rectified chart image together with its refined patch centres.
#[derive(Clone, Debug)]
pub struct ColorChecker {
    image: RgbImage,
    chart: ReferenceChart,
    centers: PatchGrid,
    x_scale: f64,
    y_scale: f64,
    block_stride: usize,
}

impl ColorChecker {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(image, chart, params), fields(w = image.width, h = image.height))
    )]
    pub fn new(image: RgbImage, chart: ReferenceChart, params: &SamplerParams) -> Self {
        let sampler = PatchSampler::new(image.view(), &chart, params);
        let centers = sampler.centers();
        let (xs, ys) = sampler.scale();
        Self {
            image,
            chart,
            centers,
            x_scale: xs as f64,
            y_scale: ys as f64,
            block_stride: params.block_stride.max(1),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn chart(&self) -> &ReferenceChart {
        &self.chart
    }

    pub fn centers(&self) -> &PatchGrid {
        &self.centers
    }

    /// Pixel coordinates sampled for one patch.
    ///
    /// Either the 9-point stencil, or (`dense`) every `block_stride`-th pixel of
    /// the block spanned by the stencil's first and last points.
    pub fn sample_points(&self, row: usize, col: usize, dense: bool) -> Vec<(i64, i64)> {
        let pts = stencil(self.centers[row][col], self.x_scale, self.y_scale);
        if !dense {
            return pts.iter().map(|p| (p.x as i64, p.y as i64)).collect();
        }

        let (min_x, min_y) = (pts[0].x as i64, pts[0].y as i64);
        let (max_x, max_y) = (pts[STENCIL_LEN - 1].x as i64, pts[STENCIL_LEN - 1].y as i64);
        let mut out = Vec::new();
        let mut y = min_y;
        while y <= max_y {
            let mut x = min_x;
            while x <= max_x {
                out.push((x, y));
                x += self.block_stride as i64;
            }
            y += self.block_stride as i64;
        }
        out
    }

    /// Colors of `image` at this checker's sample points, paired with the patch references.
    ///
    /// `image` is usually the checker's own raster or a calibrated copy of it.
    pub fn patch_colors(&self, image: &RgbImageView<'_>, dense: bool) -> ColorPairs {
        let mut pairs = ColorPairs::new();
        for row in 0..self.chart.rows() {
            for col in 0..self.chart.cols() {
                let reference = self.chart.color(row, col);
                for (x, y) in self.sample_points(row, col, dense) {
                    pairs.push(Color::from_u8(image.pixel_clamped(x, y)), reference.clone());
                }
            }
        }
        pairs
    }

    pub fn cell_colors(&self, dense: bool) -> ColorPairs {
        self.patch_colors(&self.image.view(), dense)
    }

    /// Mean Lab distance of the stencil samples from their reference colors.
    pub fn lab_deviation_from_reference(&self) -> f64 {
        self.cell_colors(false)
            .mean_distance(ColorMetric::EuclideanLab)
    }

    /// Regression inputs: every stencil sample in `feature_space`, and its
    /// patch's reference color in `target_space`.
    pub fn training_pairs(
        &self,
        feature_space: ColorSpace,
        target_space: ColorSpace,
    ) -> (Vec<[f64; 3]>, Vec<[f64; 3]>) {
        let view = self.image.view();
        let mut train = Vec::new();
        let mut answers = Vec::new();
        for row in 0..self.chart.rows() {
            for col in 0..self.chart.cols() {
                let reference = target_space.from_rgb(self.chart.rgb(row, col).map(f64::from));
                for (x, y) in self.sample_points(row, col, false) {
                    let observed = view.pixel_clamped(x, y).map(f64::from);
                    train.push(feature_space.from_rgb(observed));
                    answers.push(reference);
                }
            }
        }
        (train, answers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn ideal_chart_has_zero_deviation() {
        let chart = ReferenceChart::classic();
        let checker = ColorChecker::new(chart.render(10.0), chart, &SamplerParams::default());
        assert_abs_diff_eq!(checker.lab_deviation_from_reference(), 0.0, epsilon = 1e-9);
        assert_eq!(checker.cell_colors(false).len(), 24 * 9);
    }

    #[test]
    fn dense_samples_cover_the_stencil_block() {
        let chart = ReferenceChart::classic();
        let checker = ColorChecker::new(chart.render(10.0), chart, &SamplerParams::without_corrections());
        // x scale 25, y scale 21 -> 51 × 43 block, stride 10
        let pts = checker.sample_points(0, 0, true);
        assert_eq!(pts.len(), 6 * 5);
        let stencil = checker.sample_points(0, 0, false);
        assert_eq!(pts[0], stencil[0]);
    }

    #[test]
    fn training_pairs_follow_color_spaces() {
        let chart = ReferenceChart::classic();
        let checker = ColorChecker::new(chart.render(5.0), chart.clone(), &SamplerParams::default());
        let (train, answers) = checker.training_pairs(ColorSpace::Rgb, ColorSpace::Xyz);
        assert_eq!(train.len(), 216);
        assert_eq!(answers.len(), 216);
        assert_eq!(train[0], chart.rgb(0, 0).map(f64::from));
        assert_eq!(answers[0], ColorSpace::Xyz.from_rgb(chart.rgb(0, 0).map(f64::from)));
    }

    #[test]
    fn tinted_chart_deviates() {
        let chart = ReferenceChart::classic();
        let mut img = chart.render(5.0);
        for px in img.data.chunks_exact_mut(3) {
            px[2] = px[2].saturating_add(60);
        }
        let checker = ColorChecker::new(img, chart, &SamplerParams::without_corrections());
        assert!(checker.lab_deviation_from_reference() > 5.0);
    }
}
