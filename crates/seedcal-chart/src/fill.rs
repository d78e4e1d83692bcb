use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seedcal_core::{Quad, RgbImage, RgbImageView};

const BACKGROUND_SAMPLES: usize = 1000;
const MAX_ATTEMPTS: usize = 20 * BACKGROUND_SAMPLES;
const TRIM_ROUNDS: usize = 10;
const TRIM_TOLERANCE: f64 = 25.0;
const SAMPLE_SEED: u64 = 0xb4c6_0001;

/// Dominant color of `image` outside the bounding box of `quad`.
///
/// Up to 1000 pixels are drawn uniformly (fixed seed); the mean is then
/// trimmed repeatedly to samples within ±25 per channel. `None` when no pixel
/// lies outside the box.
pub fn estimate_background(image: &RgbImageView<'_>, quad: &Quad) -> Option<[u8; 3]> {
    if image.is_empty() {
        return None;
    }
    let (min, max) = quad.bounding_box();
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    let mut samples: Vec<[f64; 3]> = Vec::with_capacity(BACKGROUND_SAMPLES);
    for _ in 0..MAX_ATTEMPTS {
        if samples.len() == BACKGROUND_SAMPLES {
            break;
        }
        let x = rng.gen_range(0..image.width);
        let y = rng.gen_range(0..image.height);
        let (fx, fy) = (x as f64, y as f64);
        if fx >= min.x && fx <= max.x && fy >= min.y && fy <= max.y {
            continue;
        }
        samples.push(image.pixel(x, y).map(f64::from));
    }
    if samples.is_empty() {
        return None;
    }

    let mut mean = channel_mean(&samples);
    for _ in 0..TRIM_ROUNDS {
        samples.retain(|s| {
            s.iter()
                .zip(mean)
                .all(|(v, m)| (v - m).abs() <= TRIM_TOLERANCE)
        });
        if samples.is_empty() {
            break;
        }
        mean = channel_mean(&samples);
    }
    log::debug!(
        "background estimate {:?} from {} samples",
        mean.map(|v| v.round()),
        samples.len()
    );
    Some(mean.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

fn channel_mean(samples: &[[f64; 3]]) -> [f64; 3] {
    let mut acc = [0.0; 3];
    for s in samples {
        for (a, v) in acc.iter_mut().zip(s) {
            *a += v;
        }
    }
    acc.map(|a| a / samples.len() as f64)
}

/// Paint the pixels inside `quad` with the estimated background color.
///
/// Returns the color used, or `None` (image untouched) when no background
/// could be sampled.
pub fn fill_chart_region(image: &mut RgbImage, quad: &Quad) -> Option<[u8; 3]> {
    let color = estimate_background(&image.view(), quad)?;
    let (min, max) = quad.bounding_box();
    let x0 = min.x.floor().max(0.0) as usize;
    let y0 = min.y.floor().max(0.0) as usize;
    let x1 = (max.x.ceil().max(0.0) as usize).min(image.width.saturating_sub(1));
    let y1 = (max.y.ceil().max(0.0) as usize).min(image.height.saturating_sub(1));
    for y in y0..=y1 {
        for x in x0..=x1 {
            if quad.contains(Point2::new(x as f64, y as f64)) {
                image.put_pixel(x, y, color);
            }
        }
    }
    Some(color)
}
