//! Helpers operating on `image` crate buffers and image files.

use crate::core;
use crate::io::PipelineConfig;
use crate::{PipelineError, PipelineOutput, PipelineParams, SeedPipeline};
use std::path::Path;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Borrow an `image::RgbImage` as the lightweight `seedcal-core` view type.
pub fn rgb_view(img: &::image::RgbImage) -> core::RgbImageView<'_> {
    core::RgbImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

/// Convert a `seedcal-core` raster into an `image::RgbImage`.
pub fn to_image(img: core::RgbImage) -> Result<::image::RgbImage, PipelineError> {
    let (width, height) = (img.width, img.height);
    let len = img.data.len();
    ::image::RgbImage::from_raw(width as u32, height as u32, img.data).ok_or(
        PipelineError::Raster(core::ImageError::BufferSize {
            expected: width * height * 3,
            got: len,
        }),
    )
}

/// Decode any supported image file into 8-bit RGB.
pub fn load_rgb(path: impl AsRef<Path>) -> Result<::image::RgbImage, PipelineError> {
    Ok(::image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8())
}

/// Save a `seedcal-core` raster; the format follows the file extension.
pub fn save_rgb(img: core::RgbImage, path: impl AsRef<Path>) -> Result<(), PipelineError> {
    to_image(img)?.save(path)?;
    Ok(())
}

/// Run the full pipeline on one photo with the built-in chart template.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(photo, params), fields(width = photo.width(), height = photo.height()))
)]
pub fn process_image(
    photo: &::image::RgbImage,
    params: PipelineParams,
) -> Result<PipelineOutput, PipelineError> {
    SeedPipeline::new(params)?.process(&rgb_view(photo))
}

/// Run the full pipeline, matching against a scan of the physical chart.
pub fn process_image_with_reference(
    photo: &::image::RgbImage,
    reference: &::image::RgbImage,
    params: PipelineParams,
) -> Result<PipelineOutput, PipelineError> {
    SeedPipeline::with_reference(params, &rgb_view(reference))?.process(&rgb_view(photo))
}

/// Build a pipeline from a config, loading the reference scan when one is named.
pub fn pipeline_from_config(cfg: &PipelineConfig) -> Result<SeedPipeline, PipelineError> {
    match &cfg.reference_path {
        Some(path) => {
            let reference = load_rgb(path)?;
            SeedPipeline::with_reference(cfg.params.clone(), &rgb_view(&reference))
        }
        None => SeedPipeline::new(cfg.params.clone()),
    }
}

/// Load the configured photo, process it and save the calibrated image if asked.
pub fn run_config(cfg: &PipelineConfig) -> Result<PipelineOutput, PipelineError> {
    let mut pipeline = pipeline_from_config(cfg)?;
    let photo = load_rgb(&cfg.image_path)?;
    let output = pipeline.process(&rgb_view(&photo))?;
    if let Some(path) = &cfg.calibrated_path {
        save_rgb(output.image.clone(), path)?;
        log::info!("calibrated photo written to {path}");
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_and_back_preserve_pixels() {
        let img = ::image::RgbImage::from_fn(3, 2, |x, y| ::image::Rgb([x as u8, y as u8, 7]));
        let view = rgb_view(&img);
        assert_eq!((view.width, view.height), (3, 2));
        assert_eq!(view.pixel(2, 1), [2, 1, 7]);
        let back = to_image(view.to_owned_image()).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_rgb("/nonexistent/seedcal/tray.png").unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)), "{err}");
    }
}
