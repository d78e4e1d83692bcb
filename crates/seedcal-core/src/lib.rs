//! Core types for chart-based color calibration.
//!
//! Plain RGB/gray rasters, planar homographies (DLT, 4-point and RANSAC),
//! perspective warping, the canonical chart [`Quad`], color spaces and color
//! distance metrics. Nothing here depends on a particular image codec.

mod color;
mod homography;
mod image;
mod logger;
mod quad;

pub use color::{
    delinearize_channel, linearize_channel, rgb_to_hsv, Color, ColorMetric, ColorPairs,
    ColorSpace, UnknownColorSpace,
};
pub use homography::{
    estimate_homography, estimate_homography_ransac, homography_from_4pt, warp_perspective_rgb,
    Homography, RansacHomography, RansacParams,
};
pub use image::{
    luma, sample_bilinear, sample_bilinear_rgb, GrayImage, GrayImageView, ImageError, RgbImage,
    RgbImageView,
};
pub use quad::{polygon_signed_area, Quad};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_logging, LogConfig};
