//! End-to-end processing of one photograph.
//!
//! locate chart → health checks → calibrate → (optionally paint the chart
//! out) → segment the central region → report.

use crate::chart::{
    evaluate_models, fill_chart_region, Calibrator, ChartLocator, ColorChecker, LocatorParams,
    ModelEvaluation, ReferenceChart, SamplerParams,
};
use crate::core::{ColorSpace, Quad, RgbImage, RgbImageView};
use crate::regression::{CalibrationModel, ModelOrder, ModelSpec, RegressionParams};
use crate::segment::{ObjectRecord, ObjectSegmenter, SegmentParams};
use crate::PipelineError;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Area of one pixel when the photo is assumed to show an A4 sheet
/// (297 × 210 mm) filling 80 % of its width and 85 % of its height.
pub fn default_scale(width: usize, height: usize) -> f64 {
    (297.0 / 0.8 / width.max(1) as f64) * (210.0 / 0.85 / height.max(1) as f64)
}

/// Every polynomial order with and without intercept, then identity.
pub fn candidate_models() -> Vec<ModelSpec> {
    let mut out = Vec::new();
    for order in [ModelOrder::First, ModelOrder::Second, ModelOrder::Third] {
        out.push(ModelSpec::new(order, false));
        out.push(ModelSpec::new(order, true));
    }
    out.push(ModelSpec::identity());
    out
}

/// Pipeline switches and the parameters of every stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineParams {
    /// Look for the chart and calibrate; otherwise segment the raw photo.
    pub calibrate: bool,
    /// A located chart covering a larger share of the photo is rejected.
    pub max_chart_area_ratio: f64,
    /// A located chart deviating more (mean Lab distance) is rejected.
    pub max_lab_deviation: f64,
    pub feature_space: ColorSpace,
    pub target_space: ColorSpace,
    pub model: ModelSpec,
    pub regression: RegressionParams,
    /// Only the central half of the photo (in each direction) is segmented.
    pub central_region: bool,
    /// Paint the accepted chart with the background color before segmenting.
    pub fill_chart: bool,
    pub chart: ReferenceChart,
    pub locator: LocatorParams,
    pub sampler: SamplerParams,
    pub segment: SegmentParams,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            calibrate: true,
            max_chart_area_ratio: 0.15,
            max_lab_deviation: 25.0,
            feature_space: ColorSpace::Rgb,
            target_space: ColorSpace::Rgb,
            model: ModelSpec::default(),
            regression: RegressionParams::default(),
            central_region: true,
            fill_chart: false,
            chart: ReferenceChart::classic(),
            locator: LocatorParams::default(),
            sampler: SamplerParams::default(),
            segment: SegmentParams::default(),
        }
    }
}

/// What happened to the chart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChartStatus {
    /// Calibration was not requested.
    Skipped,
    /// Chart accepted and the photo calibrated.
    Calibrated,
    TooLarge { area_ratio: f64 },
    TooDeviant { lab_deviation: f64 },
    CalibrationFailed { reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChartReport {
    pub quad: Quad,
    pub area_ratio: f64,
    pub lab_deviation: Option<f64>,
}

/// Serializable summary of one processed photo.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineReport {
    pub width: usize,
    pub height: usize,
    pub status: ChartStatus,
    pub chart: Option<ChartReport>,
    /// mm² per pixel used for object areas.
    pub scale: f64,
    pub objects: Vec<ObjectRecord>,
}

impl PipelineReport {
    pub fn calibrated(&self) -> bool {
        self.status == ChartStatus::Calibrated
    }
}

/// Report plus the (possibly calibrated) image that was segmented.
#[derive(Clone, Debug)]
pub struct PipelineOutput {
    pub report: PipelineReport,
    pub image: RgbImage,
}

/// Runs every stage on photographs with one fixed configuration.
///
/// Object sequence numbers continue across [`process`](Self::process) calls.
pub struct SeedPipeline {
    params: PipelineParams,
    locator: ChartLocator,
    segmenter: ObjectSegmenter,
}

impl SeedPipeline {
    /// Pipeline whose locator uses a rendering of the configured chart as template.
    pub fn new(params: PipelineParams) -> Result<Self, PipelineError> {
        let locator = ChartLocator::from_chart(params.chart.clone(), params.locator.clone());
        Self::with_locator(params, locator)
    }

    /// Pipeline whose locator matches against `reference`, e.g. a scan of the chart.
    pub fn with_reference(
        params: PipelineParams,
        reference: &RgbImageView<'_>,
    ) -> Result<Self, PipelineError> {
        let locator =
            ChartLocator::new(params.chart.clone(), reference, params.locator.clone());
        Self::with_locator(params, locator)
    }

    fn with_locator(params: PipelineParams, locator: ChartLocator) -> Result<Self, PipelineError> {
        let segmenter = ObjectSegmenter::new(params.segment.clone())?;
        Ok(Self {
            params,
            locator,
            segmenter,
        })
    }

    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    pub fn locator(&self) -> &ChartLocator {
        &self.locator
    }

    /// Locate the chart and check that it is plausible.
    ///
    /// Returns the quad, its report, and either an accepted checker or the
    /// rejection status.
    fn inspect_chart(
        &self,
        photo: &RgbImageView<'_>,
    ) -> (ChartReport, Result<ColorChecker, ChartStatus>) {
        let quad = self.locator.locate_best_fit(photo);
        let area_ratio = quad.area() / (photo.width * photo.height) as f64;
        let mut report = ChartReport {
            quad,
            area_ratio,
            lab_deviation: None,
        };
        if area_ratio >= self.params.max_chart_area_ratio {
            log::warn!("chart rejected: covers {:.1}% of the photo", 100.0 * area_ratio);
            return (report, Err(ChartStatus::TooLarge { area_ratio }));
        }
        let Some(checker) = self.locator.checker(photo, &quad, &self.params.sampler) else {
            log::warn!("chart rejected: quad cannot be rectified");
            return (
                report,
                Err(ChartStatus::CalibrationFailed {
                    reason: "degenerate chart outline".into(),
                }),
            );
        };
        let deviation = checker.lab_deviation_from_reference();
        report.lab_deviation = Some(deviation);
        if deviation > self.params.max_lab_deviation {
            log::warn!("chart rejected: colors deviate by {deviation:.1} from the reference");
            return (
                report,
                Err(ChartStatus::TooDeviant {
                    lab_deviation: deviation,
                }),
            );
        }
        (report, Ok(checker))
    }

    /// Locate the chart and score `models` on it.
    ///
    /// Returns the chart's Lab deviation from its reference and one entry per
    /// model and color-space pair, or `None` when no usable chart is found.
    pub fn evaluate(
        &self,
        photo: &RgbImageView<'_>,
        models: &[ModelSpec],
    ) -> Option<(f64, Vec<ModelEvaluation>)> {
        if photo.is_empty() {
            return None;
        }
        let (report, checked) = self.inspect_chart(photo);
        let checker = checked.ok()?;
        Some((report.lab_deviation?, evaluate_models(&checker, models)))
    }

    /// Process one photograph.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, photo), fields(w = photo.width, h = photo.height))
    )]
    pub fn process(&mut self, photo: &RgbImageView<'_>) -> Result<PipelineOutput, PipelineError> {
        let mut scale = default_scale(photo.width, photo.height);
        let mut status = ChartStatus::Skipped;
        let mut chart = None;
        let mut image = None;

        if self.params.calibrate && !photo.is_empty() {
            let (report, checked) = self.inspect_chart(photo);
            match checked {
                Ok(checker) => {
                    scale = self.params.chart.mm2_per_px(&report.quad);
                    let calibrator =
                        Calibrator::new(self.params.feature_space, self.params.target_space);
                    let mut model = CalibrationModel::with_params(
                        self.params.model,
                        self.params.regression.clone(),
                    );
                    match calibrator.calibrate(&checker, photo, &mut model) {
                        Ok(calibrated) => {
                            log::info!("calibrated with {}", model.name());
                            status = ChartStatus::Calibrated;
                            image = Some(calibrated);
                        }
                        Err(e) => {
                            log::warn!("calibration failed, segmenting the raw photo: {e}");
                            status = ChartStatus::CalibrationFailed {
                                reason: e.to_string(),
                            };
                        }
                    }
                }
                Err(rejected) => status = rejected,
            }
            chart = Some(report);
        }

        let mut image = image.unwrap_or_else(|| photo.to_owned_image());
        if self.params.fill_chart && status == ChartStatus::Calibrated {
            if let Some(report) = &chart {
                fill_chart_region(&mut image, &report.quad);
            }
        }

        let objects = self.segment_region(&image, scale)?;
        log::info!("{} objects at {scale:.5} mm²/px", objects.len());

        Ok(PipelineOutput {
            report: PipelineReport {
                width: photo.width,
                height: photo.height,
                status,
                chart,
                scale,
                objects,
            },
            image,
        })
    }

    fn segment_region(
        &mut self,
        image: &RgbImage,
        scale: f64,
    ) -> Result<Vec<ObjectRecord>, PipelineError> {
        let view = image.view();
        if !self.params.central_region {
            return Ok(self.segmenter.segment(&view, &view, Some(scale))?);
        }
        let (x0, y0) = (image.width / 4, image.height / 4);
        let (x1, y1) = (3 * image.width / 4, 3 * image.height / 4);
        let region = view.crop(x0, y0, x1 - x0, y1 - y0)?;
        let mut objects = self
            .segmenter
            .segment(&region.view(), &region.view(), Some(scale))?;
        for o in &mut objects {
            o.translate(x0, y0);
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_default_scale() {
        // a 297/0.8 × 210/0.85 px photo is 1 mm per px
        let s = default_scale(371, 247);
        assert_relative_eq!(s, (297.0 / 0.8 / 371.0) * (210.0 / 0.85 / 247.0));
        assert!((s - 1.0).abs() < 0.01);
    }

    #[test]
    fn candidates_cover_every_order() {
        let models = candidate_models();
        assert_eq!(models.len(), 7);
        assert_eq!(models.last(), Some(&ModelSpec::identity()));
        assert!(models.contains(&ModelSpec::default()));
    }

    #[test]
    fn uncalibrated_run_reports_skipped() {
        let params = PipelineParams {
            calibrate: false,
            ..PipelineParams::default()
        };
        let mut pipeline = SeedPipeline::new(params).expect("pipeline");
        let photo = RgbImage::from_fn(80, 60, |_, _| [240, 240, 240]);
        let out = pipeline.process(&photo.view()).expect("process");
        assert_eq!(out.report.status, ChartStatus::Skipped);
        assert!(out.report.chart.is_none());
        assert!(out.report.objects.is_empty());
        assert_eq!(out.image, photo);
    }

    #[test]
    fn missing_chart_is_rejected_as_too_large() {
        let mut pipeline = SeedPipeline::new(PipelineParams::default()).expect("pipeline");
        let photo = RgbImage::from_fn(120, 160, |_, _| [240, 240, 240]);
        let out = pipeline.process(&photo.view()).expect("process");
        // the fallback quad is the whole photo
        assert!(matches!(out.report.status, ChartStatus::TooLarge { .. }));
        assert!(!out.report.calibrated());
        assert_relative_eq!(out.report.scale, default_scale(120, 160));
    }
}
