//! Polynomial least-squares models mapping observed colors to reference colors.
//!
//! A single trainer covers every model family: the [`ModelSpec`] selects the
//! monomial expansion (first to third order, optional intercept) and each
//! output channel is fitted independently by ordinary least squares. Rank
//! deficient designs are reported as [`RegressionError::IllConditioned`]
//! instead of producing arbitrary coefficients.
//!
//! ```
//! use seedcal_regression::{CalibrationModel, ModelOrder, ModelSpec};
//!
//! let train = [[10.0, 20.0, 30.0], [200.0, 40.0, 90.0], [60.0, 220.0, 10.0], [90.0, 90.0, 250.0], [5.0, 5.0, 5.0]];
//! let answers: Vec<[f64; 3]> = train.iter().map(|c| c.map(|v| 0.5 * v + 3.0)).collect();
//!
//! let mut model = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
//! model.train(&train, &answers)?;
//! let out = model.calibrate([100.0, 100.0, 100.0])?;
//! assert!((out[0] - 53.0).abs() < 1e-6);
//! # Ok::<(), seedcal_regression::RegressionError>(())
//! ```

mod error;
mod features;
mod model;
mod ols;

pub use error::RegressionError;
pub use features::{PolynomialOrder, MAX_FEATURES};
pub use model::{CalibrationModel, ModelOrder, ModelSpec, RegressionParams};
