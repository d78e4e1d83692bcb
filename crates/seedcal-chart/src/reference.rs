use seedcal_core::{Color, Quad, RgbImage};
use serde::{Deserialize, Serialize};

pub const CHART_ROWS: usize = 6;
pub const CHART_COLS: usize = 4;

/// Patch colors of the pocket 24-patch chart, row-major, sRGB.
const CLASSIC_COLORS: [[[u8; 3]; CHART_COLS]; CHART_ROWS] = [
    [[99, 191, 171], [229, 161, 41], [0, 136, 166], [50, 50, 50]],
    [[130, 129, 176], [160, 189, 62], [188, 84, 150], [83, 84, 85]],
    [[90, 108, 65], [91, 59, 105], [238, 200, 22], [120, 121, 121]],
    [[93, 123, 157], [195, 84, 98], [176, 48, 56], [160, 161, 161]],
    [[196, 149, 129], [72, 92, 168], [71, 149, 72], [200, 201, 201]],
    [[115, 81, 67], [220, 123, 45], [43, 62, 147], [245, 245, 240]],
];

/// Patch centres as fractions of the chart width / height.
const CLASSIC_X_CENTERS: [f64; CHART_COLS] = [0.143, 0.381, 0.613, 0.862];
const CLASSIC_Y_CENTERS: [f64; CHART_ROWS] = [0.160, 0.305, 0.440, 0.580, 0.717, 0.856];

/// Printed frame around the patches in [`ReferenceChart::render`].
const FRAME_COLOR: [u8; 3] = [25, 25, 25];
/// Half extent of a rendered patch as a fraction of the chart width / height.
const PATCH_HALF_X: f64 = 0.09;
const PATCH_HALF_Y: f64 = 0.053;

/// The known 6×4 color chart: reference colors, patch layout and physical size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceChart {
    pub colors: [[[u8; 3]; CHART_COLS]; CHART_ROWS],
    pub x_centers: [f64; CHART_COLS],
    pub y_centers: [f64; CHART_ROWS],
    pub width_mm: f64,
    pub height_mm: f64,
}

impl Default for ReferenceChart {
    fn default() -> Self {
        Self::classic()
    }
}

impl ReferenceChart {
    /// The 64 × 108 mm pocket chart.
    pub fn classic() -> Self {
        Self {
            colors: CLASSIC_COLORS,
            x_centers: CLASSIC_X_CENTERS,
            y_centers: CLASSIC_Y_CENTERS,
            width_mm: 64.0,
            height_mm: 108.0,
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        CHART_ROWS
    }

    #[inline]
    pub fn cols(&self) -> usize {
        CHART_COLS
    }

    #[inline]
    pub fn rgb(&self, row: usize, col: usize) -> [u8; 3] {
        self.colors[row][col]
    }

    pub fn color(&self, row: usize, col: usize) -> Color {
        Color::from_u8(self.colors[row][col])
    }

    pub fn area_mm2(&self) -> f64 {
        self.width_mm * self.height_mm
    }

    /// Physical area of one photo pixel, given the chart's outline in that photo.
    pub fn mm2_per_px(&self, quad: &Quad) -> f64 {
        self.area_mm2() / quad.area()
    }

    /// Raster size of the rectified chart at `px_per_mm` resolution.
    pub fn rectified_size(&self, px_per_mm: f64) -> (usize, usize) {
        (
            (self.width_mm * px_per_mm).round().max(1.0) as usize,
            (self.height_mm * px_per_mm).round().max(1.0) as usize,
        )
    }

    /// Idealised picture of the chart: flat patches on a dark frame.
    pub fn render(&self, px_per_mm: f64) -> RgbImage {
        let (w, h) = self.rectified_size(px_per_mm);
        let (wf, hf) = (w as f64, h as f64);
        RgbImage::from_fn(w, h, |x, y| {
            let fx = (x as f64 + 0.5) / wf;
            let fy = (y as f64 + 0.5) / hf;
            let col = self
                .x_centers
                .iter()
                .position(|&cx| (fx - cx).abs() <= PATCH_HALF_X);
            let row = self
                .y_centers
                .iter()
                .position(|&cy| (fy - cy).abs() <= PATCH_HALF_Y);
            match (row, col) {
                (Some(r), Some(c)) => self.colors[r][c],
                _ => FRAME_COLOR,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Point2;

    #[test]
    fn classic_layout() {
        let chart = ReferenceChart::classic();
        assert_eq!((chart.rows(), chart.cols()), (6, 4));
        assert_eq!(chart.rgb(5, 3), [245, 245, 240]);
        assert_eq!(chart.rgb(0, 1), [229, 161, 41]);
        assert_relative_eq!(chart.area_mm2(), 6912.0);
    }

    #[test]
    fn scale_from_quad() {
        let chart = ReferenceChart::classic();
        let quad = Quad::from_rect(Point2::new(0.0, 0.0), Point2::new(128.0, 216.0));
        assert_relative_eq!(chart.mm2_per_px(&quad), 0.25);
    }

    #[test]
    fn render_places_patches_at_centres() {
        let chart = ReferenceChart::classic();
        let img = chart.render(5.0);
        assert_eq!((img.width, img.height), (320, 540));
        for row in 0..CHART_ROWS {
            for col in 0..CHART_COLS {
                let x = (chart.x_centers[col] * 320.0) as usize;
                let y = (chart.y_centers[row] * 540.0) as usize;
                assert_eq!(img.pixel(x, y), chart.rgb(row, col));
            }
        }
        assert_eq!(img.pixel(1, 1), FRAME_COLOR);
    }
}
