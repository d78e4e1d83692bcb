//! Color spaces, colors with lazily derived Lab, and color distance metrics.

use palette::{FromColor, Lab, Srgb};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Working representation a regression model reads features from or writes targets to.
///
/// Every variant converts from a raw 0–255 RGB triple and back. The linear
/// variants undo the sRGB gamma first (scaled to 0–100); the XYZ variants apply
/// the sRGB→XYZ matrix to whatever the gamma step produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Rgb,
    RgbLinear,
    Xyz,
    XyzLinear,
}

impl ColorSpace {
    pub const ALL: [ColorSpace; 4] = [
        ColorSpace::Rgb,
        ColorSpace::RgbLinear,
        ColorSpace::Xyz,
        ColorSpace::XyzLinear,
    ];

    #[inline]
    pub fn is_xyz(self) -> bool {
        matches!(self, ColorSpace::Xyz | ColorSpace::XyzLinear)
    }

    #[inline]
    pub fn is_linear(self) -> bool {
        matches!(self, ColorSpace::RgbLinear | ColorSpace::XyzLinear)
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorSpace::Rgb => "rgb",
            ColorSpace::RgbLinear => "rgb_linear",
            ColorSpace::Xyz => "xyz",
            ColorSpace::XyzLinear => "xyz_linear",
        }
    }

    /// Convert a raw `[r, g, b]` triple into this space.
    pub fn from_rgb(self, rgb: [f64; 3]) -> [f64; 3] {
        let [mut r, mut g, mut b] = rgb;
        if self.is_linear() {
            r = linearize_channel(r);
            g = linearize_channel(g);
            b = linearize_channel(b);
        }
        if self.is_xyz() {
            [
                r * 0.4124 + g * 0.3576 + b * 0.1805,
                r * 0.2126 + g * 0.7152 + b * 0.0722,
                r * 0.0193 + g * 0.1192 + b * 0.9505,
            ]
        } else {
            [r, g, b]
        }
    }

    /// Convert a triple in this space back to raw `[r, g, b]` (unclamped).
    pub fn to_rgb(self, value: [f64; 3]) -> [f64; 3] {
        let mut rgb = value;
        if self.is_xyz() {
            let [x, y, z] = value;
            rgb = [
                3.2404542 * x - 1.5371385 * y - 0.4985314 * z,
                -0.9692660 * x + 1.8760108 * y + 0.0415560 * z,
                0.0556434 * x - 0.2040259 * y + 1.0572252 * z,
            ];
        }
        if self.is_linear() {
            rgb = rgb.map(delinearize_channel);
        }
        rgb
    }
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown color space `{0}` (expected rgb, rgb_linear, xyz or xyz_linear)")]
pub struct UnknownColorSpace(pub String);

impl FromStr for ColorSpace {
    type Err = UnknownColorSpace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ColorSpace::ALL
            .into_iter()
            .find(|cs| cs.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownColorSpace(s.to_string()))
    }
}

/// sRGB gamma removal: 0–255 in, 0–100 out.
pub fn linearize_channel(c: f64) -> f64 {
    let c = c / 255.0;
    let l = if c > 0.04045 {
        ((c + 0.055) / 1.055).powf(2.4)
    } else {
        c / 12.92
    };
    l * 100.0
}

/// Inverse of [`linearize_channel`]: 0–100 in, 0–255 out.
pub fn delinearize_channel(c: f64) -> f64 {
    let c = c / 100.0;
    let g = if c > 0.0031308 {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    } else {
        c * 12.92
    };
    g * 255.0
}

/// An RGB color (0–255 scale, possibly out of gamut) with cached CIE Lab.
#[derive(Clone, Debug, Default)]
pub struct Color {
    rgb: [f64; 3],
    lab: OnceLock<[f64; 3]>,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64) -> Self {
        Self::from_rgb([r, g, b])
    }

    pub fn from_rgb(rgb: [f64; 3]) -> Self {
        Self {
            rgb,
            lab: OnceLock::new(),
        }
    }

    pub fn from_u8(rgb: [u8; 3]) -> Self {
        Self::from_rgb(rgb.map(f64::from))
    }

    #[inline]
    pub fn rgb(&self) -> [f64; 3] {
        self.rgb
    }

    #[inline]
    pub fn red(&self) -> f64 {
        self.rgb[0]
    }

    #[inline]
    pub fn green(&self) -> f64 {
        self.rgb[1]
    }

    #[inline]
    pub fn blue(&self) -> f64 {
        self.rgb[2]
    }

    /// Saturated 8-bit rendition.
    pub fn to_u8(&self) -> [u8; 3] {
        self.rgb.map(|c| c.round().clamp(0.0, 255.0) as u8)
    }

    /// CIE L*a*b* (D65) of the gamut-clamped color; computed on first use.
    pub fn lab(&self) -> [f64; 3] {
        *self.lab.get_or_init(|| {
            let [r, g, b] = self.rgb.map(|c| (c / 255.0).clamp(0.0, 1.0) as f32);
            let lab = Lab::from_color(Srgb::new(r, g, b));
            [lab.l as f64, lab.a as f64, lab.b as f64]
        })
    }

    pub fn lightness(&self) -> f64 {
        self.lab()[0]
    }

    pub fn a(&self) -> f64 {
        self.lab()[1]
    }

    pub fn b(&self) -> f64 {
        self.lab()[2]
    }

    /// Representation of this color in `space`.
    pub fn in_space(&self, space: ColorSpace) -> [f64; 3] {
        space.from_rgb(self.rgb)
    }
}

impl PartialEq for Color {
    fn eq(&self, other: &Self) -> bool {
        self.rgb == other.rgb
    }
}

impl From<[u8; 3]> for Color {
    fn from(rgb: [u8; 3]) -> Self {
        Self::from_u8(rgb)
    }
}

/// Distance between two colors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMetric {
    EuclideanRgb,
    /// Red-mean weighted RGB distance, a cheap perceptual approximation.
    HumanFriendlyRgb,
    EuclideanLab,
}

impl ColorMetric {
    pub const ALL: [ColorMetric; 3] = [
        ColorMetric::EuclideanRgb,
        ColorMetric::HumanFriendlyRgb,
        ColorMetric::EuclideanLab,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ColorMetric::EuclideanRgb => "euclidean_rgb",
            ColorMetric::HumanFriendlyRgb => "human_friendly_rgb",
            ColorMetric::EuclideanLab => "euclidean_lab",
        }
    }

    pub fn distance(self, c1: &Color, c2: &Color) -> f64 {
        match self {
            ColorMetric::EuclideanRgb => euclidean(c1.rgb(), c2.rgb()),
            ColorMetric::HumanFriendlyRgb => {
                let r_mean = (c1.red() + c2.red()) / 2.0;
                let dr = c1.red() - c2.red();
                let dg = c1.green() - c2.green();
                let db = c1.blue() - c2.blue();
                ((2.0 + r_mean / 256.0) * dr * dr
                    + 4.0 * dg * dg
                    + (2.0 + (255.0 - r_mean) / 256.0) * db * db)
                    .sqrt()
            }
            ColorMetric::EuclideanLab => euclidean(c1.lab(), c2.lab()),
        }
    }
}

#[inline]
fn euclidean(a: [f64; 3], b: [f64; 3]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Observed colors paired with the reference color they should match.
#[derive(Clone, Debug, Default)]
pub struct ColorPairs {
    actual: Vec<Color>,
    reference: Vec<Color>,
}

impl ColorPairs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, actual: Color, reference: Color) {
        self.actual.push(actual);
        self.reference.push(reference);
    }

    pub fn len(&self) -> usize {
        self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }

    pub fn actual(&self) -> &[Color] {
        &self.actual
    }

    pub fn reference(&self) -> &[Color] {
        &self.reference
    }

    /// Mean of `metric` over all pairs; `0.0` when empty.
    pub fn mean_distance(&self, metric: ColorMetric) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .actual
            .iter()
            .zip(&self.reference)
            .map(|(a, r)| metric.distance(a, r))
            .sum();
        total / self.len() as f64
    }
}

/// 8-bit HSV with the hue halved to fit a byte (`H ∈ [0, 180)`, `S, V ∈ [0, 255]`).
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { 255.0 * delta / v } else { 0.0 };

    let mut h = if delta <= 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    let h = (h / 2.0).round();
    [
        if h >= 180.0 { 0 } else { h as u8 },
        s.round().clamp(0.0, 255.0) as u8,
        v as u8,
    ]
}
