//! High-level facade for the `seedcal-*` workspace.
//!
//! This crate provides:
//! - re-exports of the underlying crates,
//! - [`SeedPipeline`], which runs chart location, color calibration and seed
//!   segmentation on one photograph,
//! - JSON configuration and report files ([`io`]),
//! - (feature `image`) helpers working directly on `image::RgbImage` and
//!   image files ([`detect`]).
//!
//! ## Quickstart
//!
//! ```no_run
//! use seedcal::detect;
//! use seedcal::PipelineParams;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let photo = detect::load_rgb("tray.jpg")?;
//! let output = detect::process_image(&photo, PipelineParams::default())?;
//! println!(
//!     "{} seeds, calibrated: {}",
//!     output.report.objects.len(),
//!     output.report.calibrated()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `seedcal::core`: rasters, homographies, quads, color spaces and metrics.
//! - `seedcal::regression`: polynomial color-correction models.
//! - `seedcal::chart`: reference chart, locator, patch sampler, calibrator.
//! - `seedcal::segment`: mask building, contours, object records, classifiers.
//! - `seedcal::detect` (feature `image`): end-to-end helpers from `image::RgbImage`.

pub use seedcal_chart as chart;
pub use seedcal_core as core;
pub use seedcal_regression as regression;
pub use seedcal_segment as segment;

pub mod io;
mod pipeline;

#[cfg(feature = "image")]
pub mod detect;

pub use pipeline::{
    candidate_models, default_scale, ChartReport, ChartStatus, PipelineOutput, PipelineParams,
    PipelineReport, SeedPipeline,
};

/// Errors produced by the facade.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "image")]
    #[error("image codec error: {0}")]
    Codec(#[from] ::image::ImageError),

    #[error(transparent)]
    Raster(#[from] core::ImageError),

    #[error(transparent)]
    Segment(#[from] segment::SegmentError),
}

/// Route `log` records into `tracing` and install the workspace subscriber.
#[cfg(feature = "tracing")]
pub fn init_tracing(config: &core::LogConfig) {
    let _ = tracing_log::LogTracer::init();
    core::init_tracing(config);
}
