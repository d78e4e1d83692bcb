use seedcal_core::{rgb_to_hsv, Color};
use serde::{Deserialize, Serialize};

use crate::ObjectRecord;

/// Color representation of an object summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySpace {
    #[default]
    Rgb,
    /// CIE L*a*b* (D65), unscaled.
    Lab,
    /// 8-bit HSV with `H ∈ [0, 180)`.
    Hsv,
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}

fn channel_medians(samples: impl Iterator<Item = [f64; 3]>) -> Option<[f64; 3]> {
    let mut channels: [Vec<f64>; 3] = Default::default();
    for s in samples {
        for (ch, v) in channels.iter_mut().zip(s) {
            ch.push(v);
        }
    }
    let [r, g, b] = &mut channels;
    Some([median(r)?, median(g)?, median(b)?])
}

impl ObjectRecord {
    /// Per-channel median RGB of the object's pixels.
    pub fn median_color(&self) -> Option<[f64; 3]> {
        channel_medians(self.pixels.iter().map(|p| p.rgb.map(f64::from)))
    }

    /// Per-channel median of the pixels converted to `space`; the classifier input.
    pub fn summary(&self, space: SummarySpace) -> Option<[f32; 3]> {
        let pixels = self.pixels.iter().map(|p| match space {
            SummarySpace::Rgb => p.rgb.map(f64::from),
            SummarySpace::Lab => Color::from_u8(p.rgb).lab(),
            SummarySpace::Hsv => rgb_to_hsv(p.rgb).map(f64::from),
        });
        channel_medians(pixels).map(|m| m.map(|v| v as f32))
    }
}

/// A pretrained model assigning a label to an object's color summary.
pub trait SeedClassifier {
    type Label;

    fn predict(&self, summary: &[f32; 3]) -> Self::Label;
}

/// Label every non-empty record; returns `(sequence, label)` pairs.
pub fn classify<C: SeedClassifier>(
    records: &[ObjectRecord],
    space: SummarySpace,
    classifier: &C,
) -> Vec<(u64, C::Label)> {
    records
        .iter()
        .filter_map(|r| Some((r.sequence, classifier.predict(&r.summary(space)?))))
        .collect()
}

/// Assigns the label of the closest centroid (Euclidean).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid<L> {
    pub centroids: Vec<([f32; 3], L)>,
}

impl<L> NearestCentroid<L> {
    pub fn new(centroids: Vec<([f32; 3], L)>) -> Self {
        Self { centroids }
    }
}

impl<L: Clone> SeedClassifier for NearestCentroid<L> {
    type Label = Option<L>;

    fn predict(&self, summary: &[f32; 3]) -> Option<L> {
        let d2 = |c: &[f32; 3]| -> f32 { c.iter().zip(summary).map(|(a, b)| (a - b) * (a - b)).sum() };
        self.centroids
            .iter()
            .min_by(|a, b| d2(&a.0).total_cmp(&d2(&b.0)))
            .map(|(_, label)| label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ObjectPixel;

    fn record(colors: &[[u8; 3]]) -> ObjectRecord {
        ObjectRecord {
            sequence: 7,
            area_mm2: 10.0,
            pixels: colors
                .iter()
                .enumerate()
                .map(|(i, &rgb)| ObjectPixel { x: i, y: 0, rgb })
                .collect(),
        }
    }

    #[test]
    fn median_is_per_channel() {
        let r = record(&[[10, 200, 0], [30, 100, 0], [20, 0, 9]]);
        assert_eq!(r.median_color(), Some([20.0, 100.0, 0.0]));
        let even = record(&[[10, 0, 0], [20, 0, 0]]);
        assert_eq!(even.median_color(), Some([15.0, 0.0, 0.0]));
        assert_eq!(record(&[]).median_color(), None);
    }

    #[test]
    fn summaries_in_other_spaces() {
        let r = record(&[[255, 0, 0], [255, 0, 0], [250, 5, 5]]);
        let hsv = r.summary(SummarySpace::Hsv).expect("hsv");
        assert_eq!(hsv, [0.0, 255.0, 255.0]);
        let lab = r.summary(SummarySpace::Lab).expect("lab");
        assert!(lab[0] > 50.0 && lab[1] > 60.0, "{lab:?}");
    }

    #[test]
    fn nearest_centroid_labels_records() {
        let clf = NearestCentroid::new(vec![
            ([120.0, 40.0, 60.0], "purple"),
            ([200.0, 60.0, 40.0], "red"),
            ([230.0, 220.0, 200.0], "white"),
        ]);
        let out = classify(&[record(&[[195, 70, 45]]), record(&[])], SummarySpace::Rgb, &clf);
        assert_eq!(out, vec![(7, Some("red"))]);
    }
}
