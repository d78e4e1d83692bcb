//! Finding the reference chart in a photograph.
//!
//! The locator matches keypoints of a reference rendering of the chart
//! against the photo, fits a homography with RANSAC and projects the
//! reference corners into the photo. The best-fit search adds two-pass
//! candidates: a quad grown by a margin bounds a crop that is searched again,
//! which corrects drift when the chart covers only a small part of the frame.
//! Every failure degrades to the full-image quad.

use crate::features::{BriefExtractor, FeatureExtractor, Features};
use crate::matching::ratio_test_matches;
use crate::{ColorChecker, ReferenceChart, SamplerParams};
use nalgebra::Point2;
use seedcal_core::{
    estimate_homography_ransac, GrayImageView, Homography, Quad, RansacParams, RgbImage,
    RgbImageView,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Why a single locate attempt produced no quad.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    #[error("image {width}x{height} is smaller than the {min_width}x{min_height} minimum")]
    ImageTooSmall {
        width: usize,
        height: usize,
        min_width: usize,
        min_height: usize,
    },
    #[error("only {found} keypoints found (need {required})")]
    TooFewKeypoints { found: usize, required: usize },
    #[error("only {found} matches passed the ratio test (need {required})")]
    NoGoodMatches { found: usize, required: usize },
    #[error("no homography consistent with the matches")]
    HomographyFailed,
}

/// Locator thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorParams {
    /// Lowe ratio: keep a match when `d1 <= ratio · d2`.
    pub ratio: f32,
    pub ransac: RansacParams,
    pub min_good_matches: usize,
    pub min_width: usize,
    pub min_height: usize,
    /// Minimum keypoints on either image.
    pub min_keypoints: usize,
    /// Extra margins tried by [`ChartLocator::locate_best_fit`] after margin 0.
    pub margins: Vec<f64>,
    /// Resolution of rectified chart rasters.
    pub px_per_mm: f64,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            ratio: 0.75,
            ransac: RansacParams::default(),
            min_good_matches: 4,
            min_width: 50,
            min_height: 100,
            min_keypoints: 2,
            margins: vec![0.05, 0.1, 0.2],
            px_per_mm: 10.0,
        }
    }
}

/// Locates a [`ReferenceChart`] in photos by feature matching against a
/// reference image of it.
#[derive(Clone, Debug)]
pub struct ChartLocator<E: FeatureExtractor = BriefExtractor> {
    extractor: E,
    chart: ReferenceChart,
    reference: Features,
    reference_size: (usize, usize),
    params: LocatorParams,
}

impl ChartLocator<BriefExtractor> {
    /// Locator for `chart` using `reference` (a photo or scan of the chart) as template.
    pub fn new(chart: ReferenceChart, reference: &RgbImageView<'_>, params: LocatorParams) -> Self {
        Self::with_extractor(BriefExtractor::default(), chart, reference, params)
    }

    /// Locator that uses a synthetic rendering of `chart` as template.
    pub fn from_chart(chart: ReferenceChart, params: LocatorParams) -> Self {
        let rendered = chart.render(params.px_per_mm);
        Self::new(chart, &rendered.view(), params)
    }
}

impl<E: FeatureExtractor> ChartLocator<E> {
    pub fn with_extractor(
        extractor: E,
        chart: ReferenceChart,
        reference: &RgbImageView<'_>,
        params: LocatorParams,
    ) -> Self {
        let gray = reference.to_gray();
        let features = extractor.extract(&gray.view());
        log::debug!(
            "reference {}x{}: {} keypoints",
            reference.width,
            reference.height,
            features.len()
        );
        Self {
            extractor,
            chart,
            reference: features,
            reference_size: (reference.width, reference.height),
            params,
        }
    }

    pub fn chart(&self) -> &ReferenceChart {
        &self.chart
    }

    pub fn params(&self) -> &LocatorParams {
        &self.params
    }

    pub fn reference_features(&self) -> &Features {
        &self.reference
    }

    /// Homography mapping reference-image pixels to `photo` pixels.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, photo), fields(w = photo.width, h = photo.height))
    )]
    pub fn homography(&self, photo: &GrayImageView<'_>) -> Result<Homography, LocateError> {
        let p = &self.params;
        if photo.width < p.min_width || photo.height < p.min_height {
            return Err(LocateError::ImageTooSmall {
                width: photo.width,
                height: photo.height,
                min_width: p.min_width,
                min_height: p.min_height,
            });
        }

        let found = self.extractor.extract(photo);
        let fewest = found.len().min(self.reference.len());
        if fewest < p.min_keypoints {
            return Err(LocateError::TooFewKeypoints {
                found: fewest,
                required: p.min_keypoints,
            });
        }

        let matches = ratio_test_matches(&self.reference.descriptors, &found.descriptors, p.ratio);
        if matches.len() < p.min_good_matches.max(4) {
            return Err(LocateError::NoGoodMatches {
                found: matches.len(),
                required: p.min_good_matches.max(4),
            });
        }

        let (src, dst): (Vec<Point2<f64>>, Vec<Point2<f64>>) = matches
            .iter()
            .map(|m| {
                (
                    self.reference.keypoints[m.query].position,
                    found.keypoints[m.train].position,
                )
            })
            .unzip();
        let fit = estimate_homography_ransac(&src, &dst, &p.ransac)
            .ok_or(LocateError::HomographyFailed)?;
        log::debug!(
            "homography from {} matches, {} inliers",
            matches.len(),
            fit.inliers.len()
        );
        Ok(fit.homography)
    }

    /// Project the reference corners, expanded outward by `margin` of the
    /// reference size, into `photo`.
    pub fn try_locate(&self, photo: &RgbImageView<'_>, margin: f64) -> Result<Quad, LocateError> {
        let gray = photo.to_gray();
        let h = self.homography(&gray.view())?;
        let (w, ht) = (self.reference_size.0 as f64, self.reference_size.1 as f64);
        let (lo, hi) = (-margin, 1.0 + margin);
        let corners = [
            Point2::new(lo * w, lo * ht),
            Point2::new(hi * w, lo * ht),
            Point2::new(hi * w, hi * ht),
            Point2::new(lo * w, hi * ht),
        ]
        .map(|c| h.apply(c));
        if corners.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(LocateError::HomographyFailed);
        }
        Ok(Quad::new(corners))
    }

    /// Single-pass locate at margin 0, falling back to the full image.
    pub fn locate(&self, photo: &RgbImageView<'_>) -> Quad {
        match self.try_locate(photo, 0.0) {
            Ok(q) => q,
            Err(e) => {
                log::info!("chart not located: {e}; using the full image");
                Quad::full_image(photo.width, photo.height)
            }
        }
    }

    /// Two-pass locate: a first quad at `margin` bounds a crop, the crop is
    /// searched again at margin 0 and the result is shifted back.
    ///
    /// Any failure yields [`Quad::full_image`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, photo), fields(w = photo.width, h = photo.height))
    )]
    pub fn locate_with_margin(&self, photo: &RgbImageView<'_>, margin: f64) -> Quad {
        match self.refined(photo, margin) {
            Ok(q) => q,
            Err(e) => {
                log::info!("chart not located (margin {margin}): {e}; using the full image");
                Quad::full_image(photo.width, photo.height)
            }
        }
    }

    fn refined(&self, photo: &RgbImageView<'_>, margin: f64) -> Result<Quad, LocateError> {
        let first = self.try_locate(photo, margin)?;
        let (min, max) = first.bounding_box();
        let right = max.x.min(photo.width as f64 - 1.0);
        let bottom = max.y.min(photo.height as f64 - 1.0);
        let left = min.x.max(0.0);
        let top = min.y.max(0.0);
        if right < left || bottom < top {
            return Err(LocateError::HomographyFailed);
        }

        let (x0, y0) = (left as usize, top as usize);
        let (x1, y1) = (right as usize, bottom as usize);
        let crop = photo
            .crop(x0, y0, x1 - x0 + 1, y1 - y0 + 1)
            .map_err(|_| LocateError::HomographyFailed)?;
        let second = self.try_locate(&crop.view(), 0.0)?;
        log::trace!("refined chart in crop at ({x0}, {y0})");
        Ok(second.shifted(x0 as f64, y0 as f64))
    }

    /// Try [`locate`](Self::locate) and the two-pass search at every configured
    /// margin; keep the quad whose rectified patches deviate least (mean Lab
    /// distance) from the reference colors.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, photo), fields(w = photo.width, h = photo.height))
    )]
    pub fn locate_best_fit(&self, photo: &RgbImageView<'_>) -> Quad {
        let scoring = SamplerParams::without_corrections();
        let mut best: Option<(Quad, f64, f64)> = None;

        for margin in std::iter::once(0.0).chain(self.params.margins.iter().copied()) {
            let quad = if margin == 0.0 {
                self.locate(photo)
            } else {
                self.locate_with_margin(photo, margin)
            };
            let Some(checker) = self.checker(photo, &quad, &scoring) else {
                continue;
            };
            let score = checker.lab_deviation_from_reference();
            log::debug!("margin {margin}: lab deviation {score:.3}");
            if best.as_ref().map_or(true, |(_, s, _)| score < *s) {
                best = Some((quad, score, margin));
            }
        }

        match best {
            Some((quad, score, margin)) => {
                log::info!("best fit at margin {margin} (lab deviation {score:.3})");
                quad
            }
            None => Quad::full_image(photo.width, photo.height),
        }
    }

    /// Perspective-rectify `quad` of `photo` to the chart's aspect at `px_per_mm`.
    pub fn rectify(&self, photo: &RgbImageView<'_>, quad: &Quad) -> Option<RgbImage> {
        let (w, h) = self.chart.rectified_size(self.params.px_per_mm);
        quad.rectify(photo, w, h)
    }

    /// Rectify `quad` and sample its patches.
    pub fn checker(
        &self,
        photo: &RgbImageView<'_>,
        quad: &Quad,
        params: &SamplerParams,
    ) -> Option<ColorChecker> {
        let rectified = self.rectify(photo, quad)?;
        Some(ColorChecker::new(rectified, self.chart.clone(), params))
    }
}
