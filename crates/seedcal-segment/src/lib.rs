//! Segmentation and measurement of small colored objects.
//!
//! A photo (usually color-calibrated) is binarized against target HSV ranges,
//! cleaned with elliptical morphology and split into external contours. A
//! contour becomes an [`ObjectRecord`] when its physical area is in range,
//! it fills enough of its bounding box and it is not paper-white.
//!
//! ```
//! use seedcal_core::RgbImage;
//! use seedcal_segment::{ObjectSegmenter, SegmentParams};
//!
//! let photo = RgbImage::from_fn(64, 64, |_, _| [250, 250, 250]);
//! let mut segmenter = ObjectSegmenter::new(SegmentParams::default()).unwrap();
//! let objects = segmenter.segment(&photo.view(), &photo.view(), Some(0.01)).unwrap();
//! assert!(objects.is_empty());
//! ```

mod classify;
mod contour;
mod mask;
mod params;
mod segmenter;

pub use classify::{classify, NearestCentroid, SeedClassifier, SummarySpace};
pub use contour::{find_external_contours, Contour};
pub use mask::{
    apply_mask, binarize_hsv, build_mask, close, dilate, erode, open, white_threshold, Kernel,
};
pub use params::{ColorRange, SegmentParams};
pub use segmenter::{percentile, ObjectPixel, ObjectRecord, ObjectSegmenter, SegmentError};
