use serde::{Deserialize, Serialize};

use crate::SegmentError;

/// Target color with a per-channel tolerance, in 8-bit HSV (`H ∈ [0, 180)`).
///
/// A pixel matches when every channel differs from `center` by strictly less
/// than `tolerance`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub center: [f64; 3],
    pub tolerance: [f64; 3],
}

impl ColorRange {
    pub const fn new(center: [f64; 3], tolerance: [f64; 3]) -> Self {
        Self { center, tolerance }
    }

    #[inline]
    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        hsv.iter()
            .zip(self.center.iter().zip(&self.tolerance))
            .all(|(&v, (&c, &t))| (f64::from(v) - c).abs() < t)
    }
}

/// Thresholds of [`ObjectSegmenter`](crate::ObjectSegmenter).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentParams {
    /// Seed colors; a pixel is foreground when it matches any of them.
    pub targets: Vec<ColorRange>,
    /// Pixels with gray level above this are paper, never foreground.
    pub white_threshold: u8,
    /// Physical diameter of the morphology kernel.
    pub kernel_mm: f64,
    /// Smallest kernel, also used when no scale is known.
    pub min_kernel_px: usize,
    /// Accepted object area, exclusive on both ends.
    pub min_area_mm2: f64,
    pub max_area_mm2: f64,
    /// Minimum share of the bounding box covered by object pixels.
    pub min_fill_ratio: f64,
    pub whiteness_percentile: f64,
    /// Objects whose darkest-channel percentile exceeds this are rejected.
    pub whiteness_threshold: f64,
}

impl Default for SegmentParams {
    fn default() -> Self {
        Self {
            targets: vec![
                ColorRange::new([4.0, 97.0, 108.0], [50.0, 100.0, 80.0]),
                ColorRange::new([17.0, 67.0, 232.0], [50.0, 50.0, 50.0]),
            ],
            white_threshold: 200,
            kernel_mm: 1.5,
            min_kernel_px: 10,
            min_area_mm2: 5.0,
            max_area_mm2: 30.0,
            min_fill_ratio: 0.5,
            whiteness_percentile: 10.0,
            whiteness_threshold: 150.0,
        }
    }
}

impl SegmentParams {
    /// Side of the elliptical kernel for a photo with `scale` mm² per pixel.
    pub fn kernel_size(&self, scale: Option<f64>) -> usize {
        let floor = self.min_kernel_px.max(1);
        match scale {
            Some(s) if s > 0.0 && s.is_finite() => ((self.kernel_mm / s.sqrt()) as usize).max(floor),
            _ => floor,
        }
    }

    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.targets.is_empty() {
            return Err(SegmentError::InvalidParams("no target colors".into()));
        }
        if !(self.min_area_mm2 < self.max_area_mm2) {
            return Err(SegmentError::InvalidParams(format!(
                "area range ({}, {}) is empty",
                self.min_area_mm2, self.max_area_mm2
            )));
        }
        if !(0.0..=100.0).contains(&self.whiteness_percentile) {
            return Err(SegmentError::InvalidParams(format!(
                "percentile {} outside [0, 100]",
                self.whiteness_percentile
            )));
        }
        Ok(())
    }
}
