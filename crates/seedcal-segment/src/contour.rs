//! External contours of a binary mask.
//!
//! Foreground pixels are grouped into 8-connected components. Each component
//! yields its outer boundary (traced counter-clockwise on screen with the Moore
//! neighbourhood) and the set of pixels enclosed by that boundary, holes
//! included. A component lying inside another one's hole still gets its own
//! contour.

use std::collections::VecDeque;

use nalgebra::Point2;
use seedcal_core::{polygon_signed_area, GrayImageView};

/// Neighbour offsets, counter-clockwise on screen starting east.
const DIRS: [(i64, i64); 8] = [
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Outer boundary of one connected foreground region.
#[derive(Clone, Debug, PartialEq)]
pub struct Contour {
    /// Boundary pixels in tracing order (no repeated closing point).
    pub points: Vec<(usize, usize)>,
    /// Inclusive bounding box `(min_x, min_y, max_x, max_y)`.
    pub bbox: (usize, usize, usize, usize),
    /// Every pixel inside the boundary, row-major.
    pub interior: Vec<(usize, usize)>,
}

impl Contour {
    /// Polygon area through the boundary pixel centres.
    pub fn area(&self) -> f64 {
        let pts: Vec<Point2<f64>> = self
            .points
            .iter()
            .map(|&(x, y)| Point2::new(x as f64, y as f64))
            .collect();
        polygon_signed_area(&pts).abs()
    }

    pub fn bbox_area(&self) -> usize {
        let (x0, y0, x1, y1) = self.bbox;
        (x1 - x0 + 1) * (y1 - y0 + 1)
    }
}

fn is_on(mask: &GrayImageView<'_>, x: i64, y: i64) -> bool {
    x >= 0
        && y >= 0
        && (x as usize) < mask.width
        && (y as usize) < mask.height
        && mask.data[y as usize * mask.width + x as usize] > 0
}

/// Moore-neighbour boundary trace from the component's first pixel in scan order.
fn trace_boundary(mask: &GrayImageView<'_>, start: (usize, usize)) -> Vec<(usize, usize)> {
    let s = (start.0 as i64, start.1 as i64);
    let mut points = vec![start];
    let mut cur = s;
    let mut dir = 7usize;
    let mut first_dir: Option<usize> = None;
    let limit = 4 * mask.width * mask.height + 8;

    for _ in 0..limit {
        let from = if dir % 2 == 0 { (dir + 7) % 8 } else { (dir + 6) % 8 };
        let next = (0..8).map(|i| (from + i) % 8).find(|&d| {
            let (dx, dy) = DIRS[d];
            is_on(mask, cur.0 + dx, cur.1 + dy)
        });
        let Some(d) = next else {
            // isolated pixel
            break;
        };
        if cur == s && first_dir == Some(d) {
            break;
        }
        if first_dir.is_none() {
            first_dir = Some(d);
        }
        cur = (cur.0 + DIRS[d].0, cur.1 + DIRS[d].1);
        dir = d;
        points.push((cur.0 as usize, cur.1 as usize));
    }
    if points.len() > 1 && points.last() == Some(&start) {
        points.pop();
    }
    points
}

/// Pixels of the component's bounding box not reachable from the box border
/// through pixels outside the component (4-connected).
fn fill_interior(
    labels: &[u32],
    width: usize,
    label: u32,
    bbox: (usize, usize, usize, usize),
) -> Vec<(usize, usize)> {
    let (x0, y0, x1, y1) = bbox;
    let bw = x1 - x0 + 1;
    let bh = y1 - y0 + 1;
    let mut outside = vec![false; bw * bh];
    let mut queue = VecDeque::new();
    let own = |x: usize, y: usize| labels[(y0 + y) * width + x0 + x] == label;

    for y in 0..bh {
        for x in 0..bw {
            let border = x == 0 || y == 0 || x + 1 == bw || y + 1 == bh;
            if border && !own(x, y) {
                outside[y * bw + x] = true;
                queue.push_back((x, y));
            }
        }
    }
    while let Some((x, y)) = queue.pop_front() {
        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx >= bw || ny >= bh || outside[ny * bw + nx] || own(nx, ny) {
                continue;
            }
            outside[ny * bw + nx] = true;
            queue.push_back((nx, ny));
        }
    }

    let mut interior = Vec::new();
    for y in 0..bh {
        for x in 0..bw {
            if !outside[y * bw + x] {
                interior.push((x0 + x, y0 + y));
            }
        }
    }
    interior
}

/// External contours of all 8-connected foreground regions, in scan order of
/// their topmost-leftmost pixel.
pub fn find_external_contours(mask: &GrayImageView<'_>) -> Vec<Contour> {
    let (w, h) = (mask.width, mask.height);
    let mut labels = vec![0u32; w * h];
    let mut contours = Vec::new();
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();

    for y in 0..h {
        for x in 0..w {
            if mask.data[y * w + x] == 0 || labels[y * w + x] != 0 {
                continue;
            }
            next_label += 1;
            labels[y * w + x] = next_label;
            queue.push_back((x, y));
            let mut bbox = (x, y, x, y);

            while let Some((cx, cy)) = queue.pop_front() {
                bbox.0 = bbox.0.min(cx);
                bbox.1 = bbox.1.min(cy);
                bbox.2 = bbox.2.max(cx);
                bbox.3 = bbox.3.max(cy);
                for (dx, dy) in DIRS {
                    let (nx, ny) = (cx as i64 + dx, cy as i64 + dy);
                    if !is_on(mask, nx, ny) {
                        continue;
                    }
                    let i = ny as usize * w + nx as usize;
                    if labels[i] == 0 {
                        labels[i] = next_label;
                        queue.push_back((nx as usize, ny as usize));
                    }
                }
            }

            contours.push(Contour {
                points: trace_boundary(mask, (x, y)),
                bbox,
                interior: fill_interior(&labels, w, next_label, bbox),
            });
        }
    }
    log::trace!("{} external contours", contours.len());
    contours
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedcal_core::GrayImage;

    fn mask_from(rows: &[&str]) -> GrayImage {
        let mut m = GrayImage::new(rows[0].len(), rows.len());
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().enumerate() {
                if ch == '#' {
                    m.set(x, y, 255);
                }
            }
        }
        m
    }

    #[test]
    fn square_area_follows_pixel_centres() {
        let m = mask_from(&[".....", ".###.", ".###.", ".###.", "....."]);
        let c = find_external_contours(&m.view());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].area(), 4.0);
        assert_eq!(c[0].points.len(), 8);
        assert_eq!(c[0].bbox, (1, 1, 3, 3));
        assert_eq!(c[0].interior.len(), 9);
    }

    #[test]
    fn concave_shape_is_traced_around_the_notch() {
        let m = mask_from(&["#.#", "###"]);
        let c = find_external_contours(&m.view());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].area(), 1.0);
        assert_eq!(c[0].interior.len(), 5);
    }

    #[test]
    fn holes_are_part_of_the_interior() {
        let m = mask_from(&["#####", "#...#", "#...#", "#####"]);
        let c = find_external_contours(&m.view());
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].interior.len(), 20);
        assert_eq!(c[0].area(), 12.0);
    }

    #[test]
    fn diagonal_pixels_connect() {
        let m = mask_from(&["#..", ".#.", "..#", "...", "#.."]);
        let c = find_external_contours(&m.view());
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].interior.len(), 3);
        assert_eq!(c[1].points, vec![(0, 4)]);
        assert_eq!(c[1].area(), 0.0);
    }

    #[test]
    fn blob_inside_a_ring_is_reported_separately() {
        let m = mask_from(&[
            ".......",
            ".#####.",
            ".#...#.",
            ".#.#.#.",
            ".#...#.",
            ".#####.",
            ".......",
        ]);
        let c = find_external_contours(&m.view());
        assert_eq!(c.len(), 2);

        let (ring, blob) = (&c[0], &c[1]);
        assert_eq!(ring.bbox, (1, 1, 5, 5));
        assert_eq!(ring.points.len(), 16);
        assert_eq!(ring.area(), 16.0);
        assert_eq!(ring.interior.len(), 25);
        assert!(ring.interior.contains(&(3, 3)));

        assert_eq!(blob.points, vec![(3, 3)]);
        assert_eq!(blob.bbox, (3, 3, 3, 3));
        assert_eq!(blob.interior, vec![(3, 3)]);
    }
}
