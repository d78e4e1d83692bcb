//! Four-corner chart outline in image coordinates.

use crate::{homography_from_4pt, warp_perspective_rgb, Homography, RgbImage, RgbImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Quadrilateral with canonically labelled corners `[tl, tr, br, bl]`.
///
/// Construction re-sorts the input corners around their mass centre, so the
/// labelling does not depend on the order the points were supplied in. The
/// top-left corner is the one nearest the image origin (smallest `x + y`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 2]; 4]", into = "[[f64; 2]; 4]")]
pub struct Quad {
    corners: [Point2<f64>; 4],
}

impl Quad {
    pub fn new(points: [Point2<f64>; 4]) -> Self {
        let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
        let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

        // y grows downwards, so increasing angle walks the outline clockwise on screen
        let mut sorted = points;
        sorted.sort_by(|a, b| {
            let ta = (a.y - cy).atan2(a.x - cx);
            let tb = (b.y - cy).atan2(b.x - cx);
            ta.total_cmp(&tb)
        });

        let start = sorted
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| (a.x + a.y).total_cmp(&(b.x + b.y)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let corners = std::array::from_fn(|k| sorted[(start + k) % 4]);
        Self { corners }
    }

    /// Axis-aligned rectangle from its top-left and bottom-right corners.
    pub fn from_rect(tl: Point2<f64>, br: Point2<f64>) -> Self {
        Self::new([
            tl,
            Point2::new(br.x, tl.y),
            br,
            Point2::new(tl.x, br.y),
        ])
    }

    /// Quad covering the whole raster; the fallback chart region.
    pub fn full_image(width: usize, height: usize) -> Self {
        let w = width.saturating_sub(1) as f64;
        let h = height.saturating_sub(1) as f64;
        Self::from_rect(Point2::new(0.0, 0.0), Point2::new(w, h))
    }

    #[inline]
    pub fn corners(&self) -> [Point2<f64>; 4] {
        self.corners
    }

    #[inline]
    pub fn tl(&self) -> Point2<f64> {
        self.corners[0]
    }

    #[inline]
    pub fn tr(&self) -> Point2<f64> {
        self.corners[1]
    }

    #[inline]
    pub fn br(&self) -> Point2<f64> {
        self.corners[2]
    }

    #[inline]
    pub fn bl(&self) -> Point2<f64> {
        self.corners[3]
    }

    /// Shoelace area; positive for the canonical (clockwise on screen) labelling.
    pub fn signed_area(&self) -> f64 {
        polygon_signed_area(&self.corners)
    }

    pub fn area(&self) -> f64 {
        self.signed_area().abs()
    }

    /// `(min, max)` corners of the axis-aligned bounding box.
    pub fn bounding_box(&self) -> (Point2<f64>, Point2<f64>) {
        let mut min = self.corners[0];
        let mut max = self.corners[0];
        for p in &self.corners[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        (min, max)
    }

    /// Point-in-quad test for convex outlines; boundary points count as inside.
    pub fn contains(&self, p: Point2<f64>) -> bool {
        let mut sign = 0.0f64;
        for k in 0..4 {
            let a = self.corners[k];
            let b = self.corners[(k + 1) % 4];
            let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
            if cross.abs() < 1e-12 {
                continue;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    pub fn shifted(&self, dx: f64, dy: f64) -> Self {
        Self {
            corners: self.corners.map(|p| Point2::new(p.x + dx, p.y + dy)),
        }
    }

    /// Re-express the quad for a raster resized from `from` to `to` (width, height).
    pub fn scaled_to(&self, from: (usize, usize), to: (usize, usize)) -> Self {
        let sx = to.0 as f64 / from.0.max(1) as f64;
        let sy = to.1 as f64 / from.1.max(1) as f64;
        Self {
            corners: self.corners.map(|p| Point2::new(p.x * sx, p.y * sy)),
        }
    }

    /// Homography mapping the `width × height` rectangle onto this quad.
    pub fn img_from_rect(&self, width: f64, height: f64) -> Option<Homography> {
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(width, 0.0),
            Point2::new(width, height),
            Point2::new(0.0, height),
        ];
        homography_from_4pt(&rect, &self.corners)
    }

    /// Perspective-rectify the quad's region into a `width × height` raster.
    pub fn rectify(
        &self,
        image: &RgbImageView<'_>,
        width: usize,
        height: usize,
    ) -> Option<RgbImage> {
        let h = self.img_from_rect(width as f64, height as f64)?;
        Some(warp_perspective_rgb(image, h, width, height))
    }
}

impl From<[[f64; 2]; 4]> for Quad {
    fn from(pts: [[f64; 2]; 4]) -> Self {
        Self::new(pts.map(|p| Point2::new(p[0], p[1])))
    }
}

impl From<Quad> for [[f64; 2]; 4] {
    fn from(q: Quad) -> Self {
        q.corners.map(|p| [p.x, p.y])
    }
}

/// Signed shoelace area of a closed polygon.
pub fn polygon_signed_area(points: &[Point2<f64>]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for k in 0..n {
        let a = points[k];
        let b = points[(k + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}
