use seedcal_core::{GrayImage, RgbImageView};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::contour::{find_external_contours, Contour};
use crate::mask::{apply_mask, build_mask};
use crate::SegmentParams;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SegmentError {
    #[error("image size {got:?} does not match {expected:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("invalid segmentation parameters: {0}")]
    InvalidParams(String),
}

/// One measured pixel of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPixel {
    pub x: usize,
    pub y: usize,
    pub rgb: [u8; 3],
}

/// An accepted object: its pixels (colors from the calibrated image) and area.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Unique across every call of the segmenter that produced it.
    pub sequence: u64,
    /// Physical area, or pixel area when no scale was given.
    pub area_mm2: f64,
    pub pixels: Vec<ObjectPixel>,
}

impl ObjectRecord {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Move pixel coordinates by `(dx, dy)`, e.g. from a crop back into the photo.
    pub fn translate(&mut self, dx: usize, dy: usize) {
        for p in &mut self.pixels {
            p.x += dx;
            p.y += dy;
        }
    }
}

/// Percentile with the `(n + 1)·p/100` rank and linear interpolation.
///
/// `None` for an empty sample.
pub fn percentile(values: &mut [f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    let pos = p * (n as f64 + 1.0) / 100.0;
    if pos < 1.0 {
        return Some(values[0]);
    }
    if pos >= n as f64 {
        return Some(values[n - 1]);
    }
    let lower = pos.floor();
    let d = pos - lower;
    let i = lower as usize;
    Some(values[i - 1] + d * (values[i] - values[i - 1]))
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Rejection {
    Area(f64),
    Sparse(f64),
    White(f64),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Area(a) => write!(f, "area {a:.2} out of range"),
            Rejection::Sparse(r) => write!(f, "fill ratio {r:.2} too low"),
            Rejection::White(v) => write!(f, "too white (darkest-channel percentile {v:.1})"),
        }
    }
}

/// Finds seed-colored objects and measures them.
///
/// Sequence numbers continue across calls, so sub-regions of one photograph
/// segmented one after another get distinct identifiers.
#[derive(Clone, Debug)]
pub struct ObjectSegmenter {
    params: SegmentParams,
    next_sequence: u64,
}

impl ObjectSegmenter {
    pub fn new(params: SegmentParams) -> Result<Self, SegmentError> {
        Self::starting_at(params, 0)
    }

    /// Segmenter whose first object gets sequence number `first`.
    pub fn starting_at(params: SegmentParams, first: u64) -> Result<Self, SegmentError> {
        params.validate()?;
        Ok(Self {
            params,
            next_sequence: first,
        })
    }

    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Cleaned seed mask of `image` (see [`build_mask`]).
    pub fn mask(&self, image: &RgbImageView<'_>, scale: Option<f64>) -> GrayImage {
        build_mask(image, &self.params, scale)
    }

    /// Segment `calibrated`, filtering contours on `filter`.
    ///
    /// The mask is built from `calibrated` and applied to both images.
    /// Contours come from the masked `filter` image; object colors come from
    /// the masked `calibrated` image. `scale` is the physical area of one
    /// pixel in mm²; without it areas are in pixels.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, calibrated, filter), fields(w = calibrated.width, h = calibrated.height))
    )]
    pub fn segment(
        &mut self,
        calibrated: &RgbImageView<'_>,
        filter: &RgbImageView<'_>,
        scale: Option<f64>,
    ) -> Result<Vec<ObjectRecord>, SegmentError> {
        if (calibrated.width, calibrated.height) != (filter.width, filter.height) {
            return Err(SegmentError::DimensionMismatch {
                expected: (calibrated.width, calibrated.height),
                got: (filter.width, filter.height),
            });
        }
        if calibrated.is_empty() {
            return Ok(Vec::new());
        }

        let mask = self.mask(calibrated, scale);
        let colors = apply_mask(calibrated, &mask.view())?;
        let filtered = apply_mask(filter, &mask.view())?;
        let gray = filtered.to_gray();

        let contours = find_external_contours(&gray.view());
        let px_area = scale.unwrap_or(1.0);
        let mut records = Vec::new();
        for contour in &contours {
            match self.measure(contour, &colors.view(), &filtered.view(), px_area) {
                Ok(mut record) => {
                    record.sequence = self.next_sequence;
                    self.next_sequence += 1;
                    records.push(record);
                }
                Err(reason) => log::debug!("contour at {:?} rejected: {reason}", contour.bbox),
            }
        }
        log::info!(
            "{} of {} contours accepted as objects",
            records.len(),
            contours.len()
        );
        Ok(records)
    }

    fn measure(
        &self,
        contour: &Contour,
        colors: &RgbImageView<'_>,
        filter: &RgbImageView<'_>,
        px_area: f64,
    ) -> Result<ObjectRecord, Rejection> {
        let p = &self.params;
        let area = contour.area() * px_area;
        if !(area > p.min_area_mm2 && area < p.max_area_mm2) {
            return Err(Rejection::Area(area));
        }

        let mut pixels = Vec::new();
        let mut darkest = Vec::new();
        for &(x, y) in &contour.interior {
            let rgb = colors.pixel(x, y);
            if rgb.iter().map(|&c| u32::from(c)).sum::<u32>() == 0 {
                continue;
            }
            pixels.push(ObjectPixel { x, y, rgb });
            darkest.push(f64::from(filter.pixel(x, y).into_iter().min().unwrap_or(0)));
        }

        let fill = pixels.len() as f64 / contour.bbox_area() as f64;
        if fill < p.min_fill_ratio {
            return Err(Rejection::Sparse(fill));
        }
        if let Some(v) = percentile(&mut darkest, p.whiteness_percentile) {
            if v > p.whiteness_threshold {
                return Err(Rejection::White(v));
            }
        }

        Ok(ObjectRecord {
            sequence: 0,
            area_mm2: area,
            pixels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedcal_core::RgbImage;

    #[test]
    fn percentile_matches_interpolated_rank() {
        let mut v: Vec<f64> = (1..=10).map(f64::from).collect();
        // rank 1.1 -> between 1 and 2
        assert!((percentile(&mut v, 10.0).unwrap() - 1.1).abs() < 1e-12);
        assert_eq!(percentile(&mut v, 50.0), Some(5.5));
        assert_eq!(percentile(&mut vec![7.0], 10.0), Some(7.0));
        assert_eq!(percentile(&mut [], 10.0), None);
    }

    #[test]
    fn mismatched_images_are_rejected() {
        let mut seg = ObjectSegmenter::new(SegmentParams::default()).unwrap();
        let a = RgbImage::new(4, 4);
        let b = RgbImage::new(4, 5);
        assert!(matches!(
            seg.segment(&a.view(), &b.view(), None),
            Err(SegmentError::DimensionMismatch { .. })
        ));
    }
}
