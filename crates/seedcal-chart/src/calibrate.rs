use crate::ColorChecker;
use seedcal_core::{ColorMetric, ColorSpace, RgbImage, RgbImageView};
use seedcal_regression::{CalibrationModel, ModelOrder, ModelSpec, RegressionError};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Errors returned by [`Calibrator`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error(transparent)]
    Regression(#[from] RegressionError),
    #[error("cannot calibrate an empty image")]
    EmptyImage,
}

/// Trains color models on a chart and applies them to whole images.
///
/// Models read features in `feature_space` and predict colors in
/// `target_space`; results are converted back to 8-bit RGB.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibrator {
    pub feature_space: ColorSpace,
    pub target_space: ColorSpace,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(ColorSpace::Rgb, ColorSpace::Rgb)
    }
}

impl Calibrator {
    pub fn new(feature_space: ColorSpace, target_space: ColorSpace) -> Self {
        Self {
            feature_space,
            target_space,
        }
    }

    /// Fit `model` on the checker's (observed, reference) pairs.
    pub fn train(
        &self,
        checker: &ColorChecker,
        model: &mut CalibrationModel,
    ) -> Result<(), CalibrationError> {
        let (train, answers) = checker.training_pairs(self.feature_space, self.target_space);
        model.train(&train, &answers).map_err(|e| {
            log::warn!(
                "training {} ({} -> {}) failed: {e}",
                model.name(),
                self.feature_space,
                self.target_space
            );
            CalibrationError::from(e)
        })
    }

    /// Apply an already trained model to every pixel of `image`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, image, model), fields(w = image.width, h = image.height))
    )]
    pub fn apply(
        &self,
        image: &RgbImageView<'_>,
        model: &CalibrationModel,
    ) -> Result<RgbImage, CalibrationError> {
        if image.is_empty() {
            return Err(CalibrationError::EmptyImage);
        }
        if !model.is_trained() {
            return Err(RegressionError::NotTrained.into());
        }

        let mut out = RgbImage::new(image.width, image.height);
        for (src, dst) in image
            .data
            .chunks_exact(3)
            .zip(out.data.chunks_exact_mut(3))
        {
            let features = self
                .feature_space
                .from_rgb([src[0] as f64, src[1] as f64, src[2] as f64]);
            let predicted = model.calibrate(features)?;
            let rgb = self.target_space.to_rgb(predicted);
            for (d, v) in dst.iter_mut().zip(rgb) {
                *d = if v.is_finite() {
                    v.round().clamp(0.0, 255.0) as u8
                } else {
                    0
                };
            }
        }
        Ok(out)
    }

    /// Train `model` on `checker`, then apply it to `image`.
    ///
    /// A failed fit is returned as an error; the input is never passed through silently.
    pub fn calibrate(
        &self,
        checker: &ColorChecker,
        image: &RgbImageView<'_>,
        model: &mut CalibrationModel,
    ) -> Result<RgbImage, CalibrationError> {
        if image.is_empty() {
            return Err(CalibrationError::EmptyImage);
        }
        self.train(checker, model)?;
        self.apply(image, model)
    }

    /// Deviance of the chart's feature-space map from a degenerate transform.
    ///
    /// Samples and references are both taken in `feature_space`.
    pub fn transformation_deviance(
        &self,
        checker: &ColorChecker,
        model: &CalibrationModel,
    ) -> Result<f64, CalibrationError> {
        let (source, target) = checker.training_pairs(self.feature_space, self.feature_space);
        Ok(model.transformation_deviance(&source, &target)?)
    }
}

/// How one model / color-space combination changed the chart's fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelEvaluation {
    pub model: String,
    pub feature_space: ColorSpace,
    pub target_space: ColorSpace,
    /// Calibrated ÷ uncalibrated mean Euclidean RGB distance to the references.
    /// See [`relative_change`] for a chart that already matches.
    pub rgb_change: f64,
    /// Calibrated ÷ uncalibrated mean Euclidean Lab distance to the references.
    pub lab_change: f64,
}

/// Distances at or below this count as an exact match.
const MATCH_EPS: f64 = 1e-9;

/// `calibrated / baseline`, or, when the baseline is already an exact match,
/// 1.0 if calibration kept it that way and the raw calibrated distance otherwise.
pub fn relative_change(calibrated: f64, baseline: f64) -> f64 {
    if baseline > MATCH_EPS {
        calibrated / baseline
    } else if calibrated <= MATCH_EPS {
        1.0
    } else {
        calibrated
    }
}

/// Train every `model` for every feature/target space pair on `checker` and
/// measure the dense patch samples of the calibrated chart against the
/// uncalibrated baseline.
///
/// Identity models are only evaluated for RGB → RGB. Combinations whose
/// training fails are skipped.
pub fn evaluate_models(checker: &ColorChecker, models: &[ModelSpec]) -> Vec<ModelEvaluation> {
    let baseline = checker.cell_colors(true);
    let rgb_base = baseline.mean_distance(ColorMetric::EuclideanRgb);
    let lab_base = baseline.mean_distance(ColorMetric::EuclideanLab);
    let view = checker.image().view();

    let mut out = Vec::new();
    for spec in models {
        for feature_space in ColorSpace::ALL {
            for target_space in ColorSpace::ALL {
                if spec.order == ModelOrder::Identity
                    && (feature_space != ColorSpace::Rgb || target_space != ColorSpace::Rgb)
                {
                    continue;
                }
                let calibrator = Calibrator::new(feature_space, target_space);
                let mut model = CalibrationModel::new(*spec);
                let calibrated = match calibrator.calibrate(checker, &view, &mut model) {
                    Ok(img) => img,
                    Err(e) => {
                        log::info!(
                            "skipping {} ({feature_space} -> {target_space}): {e}",
                            spec.name()
                        );
                        continue;
                    }
                };
                let pairs = checker.patch_colors(&calibrated.view(), true);
                out.push(ModelEvaluation {
                    model: spec.name(),
                    feature_space,
                    target_space,
                    rgb_change: relative_change(
                        pairs.mean_distance(ColorMetric::EuclideanRgb),
                        rgb_base,
                    ),
                    lab_change: relative_change(
                        pairs.mean_distance(ColorMetric::EuclideanLab),
                        lab_base,
                    ),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReferenceChart, SamplerParams};

    fn tinted_checker() -> ColorChecker {
        let chart = ReferenceChart::classic();
        let mut img = chart.render(5.0);
        for px in img.data.chunks_exact_mut(3) {
            px[0] = (px[0] as f64 * 0.8 + 20.0) as u8;
            px[2] = (px[2] as f64 * 0.9) as u8;
        }
        ColorChecker::new(img, chart, &SamplerParams::without_corrections())
    }

    #[test]
    fn untrained_model_is_rejected() {
        let checker = tinted_checker();
        let model = CalibrationModel::new(ModelSpec::default());
        let err = Calibrator::default()
            .apply(&checker.image().view(), &model)
            .unwrap_err();
        assert_eq!(err, CalibrationError::Regression(RegressionError::NotTrained));
    }

    #[test]
    fn empty_image_is_rejected() {
        let checker = tinted_checker();
        let mut model = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
        let empty = RgbImage::new(0, 0);
        assert_eq!(
            Calibrator::default().calibrate(&checker, &empty.view(), &mut model),
            Err(CalibrationError::EmptyImage)
        );
    }

    #[test]
    fn identity_model_returns_input() {
        let checker = tinted_checker();
        let mut model = CalibrationModel::identity();
        let out = Calibrator::default()
            .calibrate(&checker, &checker.image().view(), &mut model)
            .expect("identity");
        assert_eq!(&out, checker.image());
    }

    #[test]
    fn first_order_undoes_a_linear_tint() {
        let checker = tinted_checker();
        let mut model = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
        let calibrator = Calibrator::default();
        let out = calibrator
            .calibrate(&checker, &checker.image().view(), &mut model)
            .expect("calibrate");
        let before = checker.cell_colors(false).mean_distance(ColorMetric::EuclideanLab);
        let after = checker
            .patch_colors(&out.view(), false)
            .mean_distance(ColorMetric::EuclideanLab);
        assert!(after < before, "after={after} before={before}");
        assert!(after < 1.5);
    }

    #[test]
    fn deviance_reflects_the_tint_determinant() {
        let checker = tinted_checker();
        let model = CalibrationModel::new(ModelSpec::new(ModelOrder::First, true));
        let d = Calibrator::default()
            .transformation_deviance(&checker, &model)
            .expect("deviance");
        // observed -> reference stretches red by 1/0.8 and blue by 1/0.9
        let expected = 1.0 - 1.0 / (0.8 * 0.9);
        assert!((d - expected).abs() < 0.05, "d={d} expected={expected}");
    }

    #[test]
    fn evaluation_skips_identity_outside_rgb() {
        let checker = tinted_checker();
        let evals = evaluate_models(
            &checker,
            &[ModelSpec::identity(), ModelSpec::new(ModelOrder::First, true)],
        );
        let identity: Vec<_> = evals.iter().filter(|e| e.model == "identity").collect();
        assert_eq!(identity.len(), 1);
        assert!((identity[0].rgb_change - 1.0).abs() < 1e-12);
        assert_eq!(evals.len(), 1 + 16);
        assert!(evals
            .iter()
            .filter(|e| e.model == "first_order_intercept"
                && e.feature_space == ColorSpace::Rgb
                && e.target_space == ColorSpace::Rgb)
            .all(|e| e.lab_change < 1.0));
    }

    #[test]
    fn relative_change_on_an_exact_baseline() {
        assert_eq!(relative_change(2.0, 4.0), 0.5);
        assert_eq!(relative_change(0.0, 0.0), 1.0);
        assert_eq!(relative_change(3.5, 0.0), 3.5);
    }

    #[test]
    fn evaluating_a_perfect_chart_stays_finite() {
        let chart = ReferenceChart::classic();
        let checker = ColorChecker::new(
            chart.render(5.0),
            chart,
            &SamplerParams::without_corrections(),
        );
        let evals = evaluate_models(&checker, &[ModelSpec::default(), ModelSpec::identity()]);
        assert!(!evals.is_empty());
        for e in &evals {
            assert!(
                e.rgb_change.is_finite() && e.lab_change.is_finite(),
                "{} {} -> {}: {} / {}",
                e.model,
                e.feature_space,
                e.target_space,
                e.rgb_change,
                e.lab_change
            );
        }
        assert!(evals.iter().any(|e| e.model == ModelSpec::identity().name()));
    }
}
