//! Color reference chart handling.
//!
//! This crate covers everything between a raw photograph and a trained color
//! correction:
//! - the 6×4 reference chart layout and its known swatch colors,
//! - locating the chart with keypoint matching and a RANSAC homography,
//! - sampling patch colors with stencil refinement on the rectified chart,
//! - training calibration models on those samples and applying them to images,
//! - painting the chart region with the surrounding background.
//!
//! ```
//! use seedcal_chart::{ColorChecker, ReferenceChart, SamplerParams};
//!
//! let chart = ReferenceChart::classic();
//! let checker = ColorChecker::new(chart.render(5.0), chart, &SamplerParams::default());
//! assert!(checker.lab_deviation_from_reference() < 1e-6);
//! ```

mod calibrate;
mod checker;
mod features;
mod fill;
mod locator;
mod matching;
mod reference;
mod sampler;

pub use calibrate::{
    evaluate_models, relative_change, CalibrationError, Calibrator, ModelEvaluation,
};
pub use checker::ColorChecker;
pub use features::{BriefExtractor, BriefParams, Descriptor, FeatureExtractor, Features, Keypoint};
pub use fill::{estimate_background, fill_chart_region};
pub use locator::{ChartLocator, LocateError, LocatorParams};
pub use matching::{knn2_match, ratio_test_matches, DescriptorMatch};
pub use reference::{ReferenceChart, CHART_COLS, CHART_ROWS};
pub use sampler::{
    DeviationRefineParams, PatchGrid, PatchSampler, ReferenceRefineParams, SamplerParams,
    STENCIL_LEN,
};
