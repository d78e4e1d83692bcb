use crate::ols::solve_least_squares;
use crate::{PolynomialOrder, RegressionError};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which model family to fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrder {
    /// No fitting at all; colors pass through unchanged.
    Identity,
    First,
    Second,
    Third,
}

impl ModelOrder {
    pub const ALL: [ModelOrder; 4] = [
        ModelOrder::First,
        ModelOrder::Second,
        ModelOrder::Third,
        ModelOrder::Identity,
    ];

    pub fn polynomial(self) -> Option<PolynomialOrder> {
        match self {
            ModelOrder::Identity => None,
            ModelOrder::First => Some(PolynomialOrder::First),
            ModelOrder::Second => Some(PolynomialOrder::Second),
            ModelOrder::Third => Some(PolynomialOrder::Third),
        }
    }
}

/// Model family plus whether an intercept column is fitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub order: ModelOrder,
    pub intercept: bool,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            order: ModelOrder::Third,
            intercept: true,
        }
    }
}

impl ModelSpec {
    pub fn new(order: ModelOrder, intercept: bool) -> Self {
        Self { order, intercept }
    }

    pub fn identity() -> Self {
        Self::new(ModelOrder::Identity, false)
    }

    /// Human-readable model name, e.g. `second_order_intercept`.
    pub fn name(&self) -> String {
        let base = match self.order {
            ModelOrder::Identity => return "identity".to_string(),
            ModelOrder::First => "first_order",
            ModelOrder::Second => "second_order",
            ModelOrder::Third => "third_order",
        };
        if self.intercept {
            format!("{base}_intercept")
        } else {
            base.to_string()
        }
    }
}

/// Numerical knobs of the least-squares solver.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressionParams {
    /// Relative size of an `R` diagonal entry, after column equilibration,
    /// below which the design matrix counts as singular.
    pub singularity_threshold: f64,
}

impl Default for RegressionParams {
    fn default() -> Self {
        Self {
            singularity_threshold: 1e-10,
        }
    }
}

/// Per-channel polynomial color regression.
///
/// Each of the three output channels gets its own OLS fit over the same
/// monomial expansion of the three input channels.
#[derive(Clone, Debug)]
pub struct CalibrationModel {
    spec: ModelSpec,
    params: RegressionParams,
    /// `coefficients × 3`; intercept (if any) in row 0.
    beta: Option<DMatrix<f64>>,
}

impl CalibrationModel {
    pub fn new(spec: ModelSpec) -> Self {
        Self::with_params(spec, RegressionParams::default())
    }

    pub fn with_params(spec: ModelSpec, params: RegressionParams) -> Self {
        Self {
            spec,
            params,
            beta: None,
        }
    }

    pub fn identity() -> Self {
        Self::new(ModelSpec::identity())
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn is_identity(&self) -> bool {
        self.spec.order == ModelOrder::Identity
    }

    /// Identity models are always ready; polynomial ones after a successful [`train`](Self::train).
    pub fn is_trained(&self) -> bool {
        self.is_identity() || self.beta.is_some()
    }

    /// Fitted coefficients, one column per output channel.
    pub fn coefficients(&self) -> Option<&DMatrix<f64>> {
        self.beta.as_ref()
    }

    /// Number of regression coefficients per output channel.
    pub fn coefficient_count(&self) -> usize {
        match self.spec.order.polynomial() {
            Some(order) => order.feature_count() + usize::from(self.spec.intercept),
            None => 0,
        }
    }

    fn design_row(&self, order: PolynomialOrder, c: [f64; 3], row: &mut [f64]) {
        let features = order.expand(c);
        let offset = usize::from(self.spec.intercept);
        if self.spec.intercept {
            row[0] = 1.0;
        }
        row[offset..].copy_from_slice(&features[..order.feature_count()]);
    }

    fn design_matrix(&self, order: PolynomialOrder, samples: &[[f64; 3]]) -> DMatrix<f64> {
        let p = order.feature_count() + usize::from(self.spec.intercept);
        let mut x = DMatrix::<f64>::zeros(samples.len(), p);
        let mut row = vec![0.0; p];
        for (i, &c) in samples.iter().enumerate() {
            self.design_row(order, c, &mut row);
            for (j, v) in row.iter().enumerate() {
                x[(i, j)] = *v;
            }
        }
        x
    }

    /// Fit the model so that `calibrate(train[i]) ≈ answers[i]`.
    ///
    /// A failed fit leaves the model untrained, even if it was trained before.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, train, answers), fields(n = train.len()))
    )]
    pub fn train(
        &mut self,
        train: &[[f64; 3]],
        answers: &[[f64; 3]],
    ) -> Result<(), RegressionError> {
        if train.len() != answers.len() {
            return Err(RegressionError::LengthMismatch {
                train: train.len(),
                answers: answers.len(),
            });
        }
        let Some(order) = self.spec.order.polynomial() else {
            return Ok(());
        };

        self.beta = None;
        let x = self.design_matrix(order, train);
        let y = DMatrix::from_fn(answers.len(), 3, |i, j| answers[i][j]);
        let beta = solve_least_squares(x, &y, self.params.singularity_threshold)?;
        log::debug!(
            "trained {} on {} samples ({} coefficients per channel)",
            self.name(),
            train.len(),
            beta.nrows()
        );
        self.beta = Some(beta);
        Ok(())
    }

    /// Evaluate the fitted polynomials on one color.
    #[inline]
    pub fn calibrate(&self, color: [f64; 3]) -> Result<[f64; 3], RegressionError> {
        let Some(order) = self.spec.order.polynomial() else {
            return Ok(color);
        };
        let beta = self.beta.as_ref().ok_or(RegressionError::NotTrained)?;

        let features = order.expand(color);
        let n = order.feature_count();
        let offset = usize::from(self.spec.intercept);
        let mut out = [0.0; 3];
        for (ch, o) in out.iter_mut().enumerate() {
            let mut acc = if self.spec.intercept {
                beta[(0, ch)]
            } else {
                0.0
            };
            for (k, f) in features[..n].iter().enumerate() {
                acc += f * beta[(k + offset, ch)];
            }
            *o = acc;
        }
        Ok(out)
    }

    /// How far the map from `source` to `target` is from a rank-deficient one.
    ///
    /// Every expanded feature of `target` is regressed on the expanded features
    /// of `source`; the coefficient rows form a square matrix (plus a fixed
    /// `[1, 0, …]` row for the intercept) and the result is `1 − det`. Values near
    /// `1` indicate a collapsed (degenerate) transform. Identity models report `0`.
    pub fn transformation_deviance(
        &self,
        source: &[[f64; 3]],
        target: &[[f64; 3]],
    ) -> Result<f64, RegressionError> {
        if source.len() != target.len() {
            return Err(RegressionError::LengthMismatch {
                train: source.len(),
                answers: target.len(),
            });
        }
        let Some(order) = self.spec.order.polynomial() else {
            return Ok(0.0);
        };

        let n_features = order.feature_count();
        let offset = usize::from(self.spec.intercept);
        let dim = n_features + offset;

        let x = self.design_matrix(order, source);
        let y = DMatrix::from_fn(target.len(), n_features, |i, j| order.expand(target[i])[j]);
        let beta = solve_least_squares(x, &y, self.params.singularity_threshold)?;

        let mut m = DMatrix::<f64>::zeros(dim, dim);
        if self.spec.intercept {
            m[(0, 0)] = 1.0;
        }
        for feature in 0..n_features {
            for col in 0..dim {
                m[(feature + offset, col)] = beta[(col, feature)];
            }
        }
        Ok(1.0 - m.determinant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_colors() -> Vec<[f64; 3]> {
        let mut out = Vec::new();
        for r in [10.0, 90.0, 170.0, 250.0] {
            for g in [20.0, 80.0, 150.0, 220.0] {
                for b in [5.0, 60.0, 140.0, 230.0] {
                    out.push([r, g, b]);
                }
            }
        }
        out
    }

    #[test]
    fn identity_passes_colors_through() {
        let mut m = CalibrationModel::identity();
        assert!(m.is_trained());
        m.train(&[[1.0, 2.0, 3.0]], &[[9.0, 9.0, 9.0]]).expect("no-op");
        for c in [[0.0, 0.0, 0.0], [12.5, -3.0, 400.0], [255.0, 128.0, 1.0]] {
            assert_eq!(m.calibrate(c), Ok(c));
        }
        assert_eq!(m.transformation_deviance(&[], &[]), Ok(0.0));
    }

    #[test]
    fn untrained_polynomial_refuses_to_calibrate() {
        let m = CalibrationModel::new(ModelSpec::new(ModelOrder::Second, true));
        assert!(!m.is_trained());
        assert_eq!(
            m.calibrate([1.0, 2.0, 3.0]),
            Err(RegressionError::NotTrained)
        );
    }

    #[test]
    fn first_order_recovers_affine_map() {
        let src = grid_colors();
        let dst: Vec<[f64; 3]> = src
            .iter()
            .map(|c| {
                [
                    0.9 * c[0] + 0.05 * c[1] + 4.0,
                    0.1 * c[0] + 0.8 * c[1] - 0.02 * c[2] + 10.0,
                    1.1 * c[2] - 7.0,
                ]
            })
            .collect();

        let mut m = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
        m.train(&src, &dst).expect("train");
        assert_eq!(m.coefficient_count(), 4);
        let out = m.calibrate([100.0, 50.0, 25.0]).expect("calibrate");
        assert_relative_eq!(out[0], 96.5, epsilon = 1e-6);
        assert_relative_eq!(out[1], 59.5, epsilon = 1e-6);
        assert_relative_eq!(out[2], 20.5, epsilon = 1e-6);
    }

    #[test]
    fn third_order_fits_cubic_response() {
        let src = grid_colors();
        let dst: Vec<[f64; 3]> = src
            .iter()
            .map(|c| {
                let r = c[0] / 255.0;
                [
                    255.0 * r * r * r,
                    c[1] + 0.001 * c[1] * c[2],
                    c[2],
                ]
            })
            .collect();
        let mut m = CalibrationModel::new(ModelSpec::new(ModelOrder::Third, true));
        m.train(&src, &dst).expect("train");
        let out = m.calibrate([200.0, 100.0, 50.0]).expect("calibrate");
        let r = 200.0 / 255.0;
        assert_relative_eq!(out[0], 255.0 * r * r * r, epsilon = 1e-5);
        assert_relative_eq!(out[1], 105.0, epsilon = 1e-5);
        assert_relative_eq!(out[2], 50.0, epsilon = 1e-5);
    }

    #[test]
    fn identical_features_are_ill_conditioned() {
        let train = vec![[120.0, 60.0, 30.0]; 30];
        let answers: Vec<[f64; 3]> = (0..30).map(|i| [i as f64, 2.0 * i as f64, 5.0]).collect();
        for order in [ModelOrder::First, ModelOrder::Second, ModelOrder::Third] {
            let mut m = CalibrationModel::new(ModelSpec::new(order, true));
            let err = m.train(&train, &answers).unwrap_err();
            assert!(
                matches!(err, RegressionError::IllConditioned { .. }),
                "{order:?}: {err:?}"
            );
            assert!(!m.is_trained());
        }
    }

    #[test]
    fn too_few_samples_for_third_order() {
        let src = grid_colors()[..10].to_vec();
        let mut m = CalibrationModel::new(ModelSpec::new(ModelOrder::Third, false));
        assert_eq!(
            m.train(&src, &src),
            Err(RegressionError::NotEnoughSamples {
                samples: 10,
                features: 19
            })
        );
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut m = CalibrationModel::new(ModelSpec::default());
        assert_eq!(
            m.train(&[[0.0; 3]; 3], &[[0.0; 3]; 2]),
            Err(RegressionError::LengthMismatch {
                train: 3,
                answers: 2
            })
        );
    }

    #[test]
    fn deviance_of_identity_map_is_zero() {
        let src = grid_colors();
        let m = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
        let d = m.transformation_deviance(&src, &src).expect("deviance");
        assert_relative_eq!(d, 0.0, epsilon = 1e-8);

        let halved: Vec<[f64; 3]> = src.iter().map(|c| c.map(|v| v * 0.5)).collect();
        let d = m.transformation_deviance(&src, &halved).expect("deviance");
        assert_relative_eq!(d, 1.0 - 0.125, epsilon = 1e-8);
    }

    #[test]
    fn model_names() {
        assert_eq!(ModelSpec::new(ModelOrder::Second, true).name(), "second_order_intercept");
        assert_eq!(ModelSpec::new(ModelOrder::First, false).name(), "first_order");
        assert_eq!(ModelSpec::identity().name(), "identity");
    }
}
