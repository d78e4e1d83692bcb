//! Binary foreground masks and morphology.
//!
//! Masks are [`GrayImage`]s holding `0` or `255`.

use seedcal_core::{luma, rgb_to_hsv, GrayImage, GrayImageView, RgbImage, RgbImageView};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{ColorRange, SegmentError, SegmentParams};

const ON: u8 = 255;

/// Foreground where the pixel's HSV value falls in any of `targets`.
pub fn binarize_hsv(image: &RgbImageView<'_>, targets: &[ColorRange]) -> GrayImage {
    let data = image
        .data
        .chunks_exact(3)
        .map(|p| {
            let hsv = rgb_to_hsv([p[0], p[1], p[2]]);
            if targets.iter().any(|t| t.contains(hsv)) {
                ON
            } else {
                0
            }
        })
        .collect();
    GrayImage {
        width: image.width,
        height: image.height,
        data,
    }
}

/// Foreground where the gray level is at most `threshold` (paper is excluded).
pub fn white_threshold(image: &RgbImageView<'_>, threshold: u8) -> GrayImage {
    let data = image
        .data
        .chunks_exact(3)
        .map(|p| if luma(p[0], p[1], p[2]) > threshold { 0 } else { ON })
        .collect();
    GrayImage {
        width: image.width,
        height: image.height,
        data,
    }
}

/// Elliptical structuring element inscribed in a `size × size` box.
///
/// Stored as one `[start, end)` column span per row, anchored at the centre.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kernel {
    size: usize,
    spans: Vec<(usize, usize)>,
}

impl Kernel {
    pub fn ellipse(size: usize) -> Self {
        let size = size.max(1);
        let r = (size / 2) as i64;
        let c = (size / 2) as i64;
        let inv_r2 = if r > 0 { 1.0 / (r * r) as f64 } else { 0.0 };
        let spans = (0..size as i64)
            .map(|i| {
                let dy = i - r;
                if dy.abs() > r {
                    return (0, 0);
                }
                let dx = (c as f64 * (((r * r - dy * dy) as f64) * inv_r2).sqrt()).round() as i64;
                let start = (c - dx).max(0) as usize;
                let end = ((c + dx + 1) as usize).min(size);
                (start, end)
            })
            .collect();
        Self { size, spans }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        self.spans
            .get(y)
            .is_some_and(|&(start, end)| x >= start && x < end)
    }

    fn anchor(&self) -> i64 {
        (self.size / 2) as i64
    }
}

/// Per-row prefix counts of foreground pixels; `row[x]` counts columns `< x`.
fn row_prefix(mask: &GrayImageView<'_>) -> Vec<u32> {
    let w = mask.width + 1;
    let mut prefix = vec![0u32; w * mask.height];
    for y in 0..mask.height {
        let row = &mask.data[y * mask.width..(y + 1) * mask.width];
        let out = &mut prefix[y * w..(y + 1) * w];
        for (x, &v) in row.iter().enumerate() {
            out[x + 1] = out[x] + u32::from(v > 0);
        }
    }
    prefix
}

#[derive(Clone, Copy)]
enum Morph {
    Dilate,
    Erode,
}

fn morph(mask: &GrayImageView<'_>, kernel: &Kernel, op: Morph) -> GrayImage {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let stride = mask.width + 1;
    let prefix = row_prefix(mask);
    let a = kernel.anchor();
    let mut out = GrayImage::new(mask.width, mask.height);

    for y in 0..h {
        for x in 0..w {
            // pixels outside the image never change the result
            let mut hit = matches!(op, Morph::Erode);
            for (ky, &(start, end)) in kernel.spans.iter().enumerate() {
                if start >= end {
                    continue;
                }
                let yy = y + ky as i64 - a;
                if yy < 0 || yy >= h {
                    continue;
                }
                let x0 = (x + start as i64 - a).clamp(0, w);
                let x1 = (x + end as i64 - a).clamp(0, w);
                if x0 >= x1 {
                    continue;
                }
                let row = &prefix[yy as usize * stride..(yy as usize + 1) * stride];
                let count = row[x1 as usize] - row[x0 as usize];
                match op {
                    Morph::Dilate if count > 0 => {
                        hit = true;
                        break;
                    }
                    Morph::Erode if count < (x1 - x0) as u32 => {
                        hit = false;
                        break;
                    }
                    _ => {}
                }
            }
            if hit {
                out.set(x as usize, y as usize, ON);
            }
        }
    }
    out
}

pub fn dilate(mask: &GrayImageView<'_>, kernel: &Kernel) -> GrayImage {
    morph(mask, kernel, Morph::Dilate)
}

pub fn erode(mask: &GrayImageView<'_>, kernel: &Kernel) -> GrayImage {
    morph(mask, kernel, Morph::Erode)
}

/// Dilation followed by erosion; bridges gaps narrower than the kernel.
pub fn close(mask: &GrayImageView<'_>, kernel: &Kernel) -> GrayImage {
    erode(&dilate(mask, kernel).view(), kernel)
}

/// Erosion followed by dilation; removes specks smaller than the kernel.
pub fn open(mask: &GrayImageView<'_>, kernel: &Kernel) -> GrayImage {
    dilate(&erode(mask, kernel).view(), kernel)
}

/// Seed-color mask of `image`: HSV targets minus paper-white, cleaned by a
/// close then open with a kernel sized from `scale` (mm² per pixel).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(image, params), fields(w = image.width, h = image.height))
)]
pub fn build_mask(image: &RgbImageView<'_>, params: &SegmentParams, scale: Option<f64>) -> GrayImage {
    let mut mask = binarize_hsv(image, &params.targets);
    let white = white_threshold(image, params.white_threshold);
    for (m, w) in mask.data.iter_mut().zip(&white.data) {
        *m &= *w;
    }

    let kernel = Kernel::ellipse(params.kernel_size(scale));
    log::debug!("morphology kernel {} px", kernel.size());
    let closed = close(&mask.view(), &kernel);
    open(&closed.view(), &kernel)
}

/// Copy of `image` with every pixel outside `mask` set to black.
pub fn apply_mask(image: &RgbImageView<'_>, mask: &GrayImageView<'_>) -> Result<RgbImage, SegmentError> {
    if (image.width, image.height) != (mask.width, mask.height) {
        return Err(SegmentError::DimensionMismatch {
            expected: (image.width, image.height),
            got: (mask.width, mask.height),
        });
    }
    let mut out = image.to_owned_image();
    for (px, &m) in out.data.chunks_exact_mut(3).zip(mask.data) {
        if m == 0 {
            px.fill(0);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let h = rows.len();
        let w = rows[0].len();
        let mut m = GrayImage::new(w, h);
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if ch == '#' {
                    m.set(x, y, ON);
                }
            }
        }
        m
    }

    #[test]
    fn ellipse_kernel_shape() {
        let k = Kernel::ellipse(5);
        let rows: Vec<String> = (0..5)
            .map(|y| (0..5).map(|x| if k.contains(x, y) { '#' } else { '.' }).collect())
            .collect();
        assert_eq!(rows, ["..#..", "#####", "#####", "#####", "..#.."]);
        assert!(Kernel::ellipse(1).contains(0, 0));
    }

    #[test]
    fn open_removes_specks_and_keeps_blobs() {
        let mut m = GrayImage::new(30, 30);
        m.set(3, 3, ON);
        for y in 10..22 {
            for x in 10..22 {
                m.set(x, y, ON);
            }
        }
        let k = Kernel::ellipse(3);
        let out = open(&m.view(), &k);
        assert_eq!(out.get(3, 3), 0);
        assert_eq!(out.get(15, 15), ON);
        assert_eq!(out.get(10, 15), ON);
    }

    #[test]
    fn close_bridges_a_thin_gap() {
        let m = mask_from(&[
            "..........",
            ".####.###.",
            ".####.###.",
            ".####.###.",
            "..........",
        ]);
        let out = close(&m.view(), &Kernel::ellipse(3));
        assert_eq!(out.get(5, 2), ON);
        assert_eq!(out.get(0, 0), 0);
    }

    #[test]
    fn erosion_ignores_the_image_border() {
        let m = mask_from(&["###", "###", "###"]);
        let out = erode(&m.view(), &Kernel::ellipse(3));
        assert_eq!(out.count_nonzero(), 9);
    }

    #[test]
    fn paper_white_is_never_foreground() {
        let img = RgbImage::from_fn(2, 1, |x, _| if x == 0 { [240, 240, 240] } else { [90, 40, 40] });
        let white = white_threshold(&img.view(), 200);
        assert_eq!(white.data, vec![0, ON]);
    }

    #[test]
    fn mask_zeroes_background() {
        let img = RgbImage::from_fn(2, 2, |_, _| [10, 20, 30]);
        let mut m = GrayImage::new(2, 2);
        m.set(1, 1, ON);
        let out = apply_mask(&img.view(), &m.view()).expect("same size");
        assert_eq!(out.pixel(0, 0), [0, 0, 0]);
        assert_eq!(out.pixel(1, 1), [10, 20, 30]);
        let small = GrayImage::new(1, 1);
        assert!(matches!(
            apply_mask(&img.view(), &small.view()),
            Err(SegmentError::DimensionMismatch { .. })
        ));
    }
}
