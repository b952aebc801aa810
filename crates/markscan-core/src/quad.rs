//! Contour geometry and paper outline detection.
//!
//! The paper is found as the largest convex four-sided outline among the
//! external contours of the (closed, dilated) edge map.

#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::similar_names)]

use crate::config::ScanConfig;
use crate::image::ImageView;
use crate::segmentation::{self, LabelResult};
use crate::{filter, gradient, morphology};
use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;
use multiversion::multiversion;

/// A 2D point with subpixel precision.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    /// Construct a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

impl std::ops::Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A quadrilateral with corners ordered top-left, top-right, bottom-right, bottom-left.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quad {
    /// Corners in TL, TR, BR, BL order.
    pub corners: [Point; 4],
}

impl Quad {
    /// Build a quad from four corners in any order or winding.
    #[must_use]
    pub fn from_unordered(points: [Point; 4]) -> Self {
        Self {
            corners: order_corners(points),
        }
    }

    /// Top-left corner.
    #[must_use]
    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    /// Top-right corner.
    #[must_use]
    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    /// Bottom-right corner.
    #[must_use]
    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    /// Bottom-left corner.
    #[must_use]
    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    /// Enclosed area.
    #[must_use]
    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }

    /// True if the quad is strictly convex.
    #[must_use]
    pub fn is_convex(&self) -> bool {
        is_convex(&self.corners)
    }

    /// Move every side `distance` pixels towards the interior.
    ///
    /// Adjacent shifted sides are intersected to give the new corners.
    /// Returns `None` when the sides are parallel or the quad would fold over.
    #[must_use]
    pub fn inset(&self, distance: f64) -> Option<Quad> {
        let c = &self.corners;
        let winding = twice_signed_area(c).signum();
        let sides: [(Point, Point); 4] = std::array::from_fn(|i| {
            let d = c[(i + 1) % 4] - c[i];
            let len = d.x.hypot(d.y).max(f64::EPSILON);
            let shift = Point::new(-d.y / len * winding * distance, d.x / len * winding * distance);
            (c[i] + shift, d)
        });

        let mut corners = [Point::default(); 4];
        for (i, corner) in corners.iter_mut().enumerate() {
            let (p, d) = sides[(i + 3) % 4];
            let (q, e) = sides[i];
            let denom = d.x * e.y - d.y * e.x;
            if denom.abs() < 1e-9 {
                return None;
            }
            let w = q - p;
            let t = (w.x * e.y - w.y * e.x) / denom;
            *corner = Point::new(p.x + t * d.x, p.y + t * d.y);
        }
        let quad = Quad { corners };
        (quad.is_convex() && twice_signed_area(&quad.corners).signum() == winding).then_some(quad)
    }
}

fn twice_signed_area(points: &[Point; 4]) -> f64 {
    (0..4)
        .map(|i| {
            let (a, b) = (points[i], points[(i + 1) % 4]);
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Order four points as TL, TR, BR, BL.
///
/// Points are sorted by angle around their centroid, which in image
/// coordinates (y down) yields a clockwise cycle starting near the top-left.
/// The cycle is then rotated so the first corner minimizes `x + y`, ties going
/// to the smaller `y - x`.
#[must_use]
pub fn order_corners(points: [Point; 4]) -> [Point; 4] {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;

    let mut sorted = points;
    sorted.sort_by(|a, b| {
        let ta = (a.y - cy).atan2(a.x - cx);
        let tb = (b.y - cy).atan2(b.x - cx);
        ta.total_cmp(&tb)
    });

    let mut start = 0;
    for i in 1..4 {
        let (p, q) = (sorted[i], sorted[start]);
        let (sp, sq) = (p.x + p.y, q.x + q.y);
        if sp < sq || (sp == sq && (p.y - p.x) < (q.y - q.x)) {
            start = i;
        }
    }
    sorted.rotate_left(start);
    sorted
}

/// Shoelace area of a closed polygon given without a repeated closing vertex.
#[must_use]
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        area += a.x * b.y - b.x * a.y;
    }
    area.abs() * 0.5
}

/// True if every turn of the closed polygon has the same, non-zero orientation.
#[must_use]
pub fn is_convex(points: &[Point]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < 1e-9 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

/// Length of a closed contour, including the segment back to the start.
#[must_use]
pub fn closed_perimeter(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n).map(|i| points[i].distance(points[(i + 1) % n])).sum()
}

/// Simplify an open polyline using the Douglas-Peucker algorithm.
///
/// Leverages an iterative implementation with a manual stack to avoid
/// the overhead of recursive function calls.
pub fn douglas_peucker<'a>(arena: &'a Bump, points: &[Point], epsilon: f64) -> BumpVec<'a, Point> {
    if points.len() < 3 {
        let mut v = BumpVec::new_in(arena);
        v.extend_from_slice(points);
        return v;
    }

    let n = points.len();
    let mut keep = BumpVec::from_iter_in((0..n).map(|_| false), arena);
    keep[0] = true;
    keep[n - 1] = true;

    let mut stack = BumpVec::new_in(arena);
    stack.push((0, n - 1));

    while let Some((start, end)) = stack.pop() {
        if end - start < 2 {
            continue;
        }

        let mut dmax = 0.0;
        let mut index = start;

        for i in start + 1..end {
            let d = perpendicular_distance(points[i], points[start], points[end]);
            if d > dmax {
                index = i;
                dmax = d;
            }
        }

        if dmax > epsilon {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }

    let mut simplified = BumpVec::new_in(arena);
    for (i, &k) in keep.iter().enumerate() {
        if k {
            simplified.push(points[i]);
        }
    }
    simplified
}

/// Simplify a closed contour (no repeated closing point).
///
/// The contour is split at the point farthest from its first point and each
/// half is simplified separately. Vertices that end up within `epsilon` of
/// the line through their neighbors, such as an arbitrary starting pixel on a
/// straight side, are dropped afterwards.
pub fn approx_closed_polygon<'a>(arena: &'a Bump, contour: &[Point], epsilon: f64) -> BumpVec<'a, Point> {
    let n = contour.len();
    if n < 4 {
        return BumpVec::from_iter_in(contour.iter().copied(), arena);
    }

    let first = contour[0];
    let mut far = 0;
    let mut far_d = 0.0;
    for (i, p) in contour.iter().enumerate() {
        let d = p.distance(first);
        if d > far_d {
            far_d = d;
            far = i;
        }
    }
    if far == 0 {
        return BumpVec::from_iter_in(std::iter::once(first), arena);
    }

    let head = douglas_peucker(arena, &contour[..=far], epsilon);
    let mut tail_pts = BumpVec::from_iter_in(contour[far..].iter().copied(), arena);
    tail_pts.push(first);
    let tail = douglas_peucker(arena, &tail_pts, epsilon);

    let mut poly = BumpVec::new_in(arena);
    poly.extend_from_slice(&head);
    // `tail` starts with the split point and ends with `first`, both already present
    if tail.len() > 2 {
        poly.extend_from_slice(&tail[1..tail.len() - 1]);
    }

    drop_collinear_vertices(&mut poly, epsilon);
    poly
}

fn drop_collinear_vertices(poly: &mut BumpVec<'_, Point>, epsilon: f64) {
    loop {
        let n = poly.len();
        if n <= 3 {
            return;
        }
        let mut removed = false;
        for i in 0..n {
            let prev = poly[(i + n - 1) % n];
            let next = poly[(i + 1) % n];
            if perpendicular_distance(poly[i], prev, next) <= epsilon {
                poly.remove(i);
                removed = true;
                break;
            }
        }
        if !removed {
            return;
        }
    }
}

fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let mag = (dx * dx + dy * dy).sqrt();
    if mag < 1e-9 {
        return ((p.x - a.x).powi(2) + (p.y - a.y).powi(2)).sqrt();
    }
    ((dy * p.x - dx * p.y + b.x * a.y - b.y * a.x).abs()) / mag
}

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
/// Moore-neighborhood border following of one labeled component.
///
/// Must start at the component's first pixel in raster order. Tracing stops
/// when the start pixel is left in the same direction as the first step, so
/// one-pixel-wide spurs do not end the walk early. The returned contour has
/// no repeated closing point.
#[must_use]
pub fn trace_boundary<'a>(
    arena: &'a Bump,
    labels: &[u32],
    width: usize,
    height: usize,
    start_x: usize,
    start_y: usize,
    target_label: u32,
    max_steps: usize,
) -> BumpVec<'a, Point> {
    let mut points = BumpVec::new_in(arena);

    // Moore Neighborhood directions (CW order starting from Top)
    // index: 0, 1, 2, 3, 4, 5, 6, 7
    // dir:   T, TR, R, BR, B, BL, L, TL
    let dx = [0, 1, 1, 1, 0, -1, -1, -1];
    let dy = [-1, -1, 0, 1, 1, 1, 0, -1];

    let mut curr_x = start_x;
    let mut curr_y = start_y;
    // The start pixel is topmost-leftmost, so pretend we arrived moving right
    let mut walk_dir = 2;
    let mut first_dir = None;

    points.push(Point {
        x: curr_x as f64,
        y: curr_y as f64,
    });

    for _ in 0..max_steps {
        let mut next = None;
        // Search neighbors clockwise starting from the relative left of the movement
        for i in 0..8 {
            let dir = (walk_dir + 6 + i) % 8;
            let nx = curr_x as isize + dx[dir];
            let ny = curr_y as isize + dy[dir];

            if nx >= 0
                && nx < width as isize
                && ny >= 0
                && ny < height as isize
                && labels[ny as usize * width + nx as usize] == target_label
            {
                next = Some((dir, nx as usize, ny as usize));
                break;
            }
        }

        // Isolated pixel
        let Some((dir, nx, ny)) = next else { break };

        if curr_x == start_x && curr_y == start_y {
            match first_dir {
                None => first_dir = Some(dir),
                Some(d) if d == dir => break,
                Some(_) => {}
            }
        }

        curr_x = nx;
        curr_y = ny;
        walk_dir = dir;
        if curr_x != start_x || curr_y != start_y {
            points.push(Point {
                x: curr_x as f64,
                y: curr_y as f64,
            });
        }
    }

    points
}

/// A convex four-vertex outline found in an edge mask.
#[derive(Clone, Copy, Debug)]
pub struct QuadCandidate {
    /// The ordered outline.
    pub quad: Quad,
    /// Enclosed area in pixels.
    pub area: f64,
}

/// Approximate the external contour of every component and return the
/// convex quadrilateral with the largest area.
pub fn largest_convex_quad(
    label_result: &LabelResult,
    width: usize,
    height: usize,
    epsilon_fraction: f64,
) -> Option<QuadCandidate> {
    use rayon::prelude::*;

    let labels = label_result.labels;
    label_result
        .component_stats
        .par_iter()
        .enumerate()
        .filter_map(|(label_idx, stat)| {
            // A quad needs at least a few pixels of extent in both axes
            if stat.width() < 3 || stat.height() < 3 {
                return None;
            }
            // Thread-local arena for this component
            let arena = Bump::new();
            let label = (label_idx + 1) as u32;
            let contour = trace_boundary(
                &arena,
                labels,
                width,
                height,
                stat.first_x as usize,
                stat.first_y as usize,
                label,
                4 * stat.pixel_count as usize + 8,
            );
            if contour.len() < 8 {
                return None;
            }
            let epsilon = closed_perimeter(&contour) * epsilon_fraction;
            let poly = approx_closed_polygon(&arena, &contour, epsilon);
            if poly.len() != 4 || !is_convex(&poly) {
                return None;
            }
            let quad = Quad::from_unordered([poly[0], poly[1], poly[2], poly[3]]);
            Some(QuadCandidate {
                area: quad.area(),
                quad,
            })
        })
        .max_by(|a, b| a.area.total_cmp(&b.area))
}

/// Find the sheet outline in a raw grayscale frame.
///
/// Blur, Canny edges, closing and dilation produce a mask whose external
/// contours are approximated as polygons; the largest convex quadrilateral
/// wins. Returns `None` when no such outline exists.
pub fn locate_paper(arena: &Bump, img: &ImageView, config: &ScanConfig) -> Option<QuadCandidate> {
    if img.is_empty() {
        return None;
    }
    let blurred = filter::gaussian_blur(img, config.paper_blur_kernel, 0.0);
    let edges = gradient::canny(&blurred.view(), config.canny_low, config.canny_high);
    let k = config.paper_close_kernel;
    let closed = morphology::close(&edges.view(), k, k);
    let d = config.paper_dilate_kernel;
    let mask = morphology::dilate(&closed.view(), d, d);

    let label_result = segmentation::label_components_with_stats(arena, &mask.data, mask.width, mask.height);
    let candidate = largest_convex_quad(&label_result, mask.width, mask.height, config.polygon_epsilon_fraction)?;

    // The traced outline runs through the outermost pixel centers of the
    // dilated band, half a pixel plus the dilation radius beyond the edge.
    let shrink = (d / 2) as f64 + 0.5;
    Some(match candidate.quad.inset(shrink) {
        Some(quad) => QuadCandidate {
            area: quad.area(),
            quad,
        },
        None => candidate,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::image::ImageBuf;
    use crate::test_utils::fill_convex_polygon;

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_order_corners_any_input_order() {
        let tl = p(10.0, 12.0);
        let tr = p(90.0, 8.0);
        let br = p(95.0, 70.0);
        let bl = p(5.0, 80.0);
        let expected = [tl, tr, br, bl];
        for input in [[tl, tr, br, bl], [br, tl, bl, tr], [bl, br, tr, tl], [tr, bl, tl, br]] {
            assert_eq!(order_corners(input), expected);
        }
    }

    #[test]
    fn test_order_corners_axis_aligned_square() {
        let q = Quad::from_unordered([p(0.0, 10.0), p(10.0, 0.0), p(0.0, 0.0), p(10.0, 10.0)]);
        assert_eq!(q.top_left(), p(0.0, 0.0));
        assert_eq!(q.top_right(), p(10.0, 0.0));
        assert_eq!(q.bottom_right(), p(10.0, 10.0));
        assert_eq!(q.bottom_left(), p(0.0, 10.0));
        assert!((q.area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_corners_diamond_tie_break() {
        // Top and left vertices share x + y; the top one has smaller y - x.
        let q = Quad::from_unordered([p(50.0, 0.0), p(100.0, 50.0), p(50.0, 100.0), p(0.0, 50.0)]);
        assert_eq!(q.top_left(), p(50.0, 0.0));
        assert_eq!(q.top_right(), p(100.0, 50.0));
    }

    #[test]
    fn test_convexity() {
        let square = [p(0.0, 0.0), p(1.0, 0.0), p(1.0, 1.0), p(0.0, 1.0)];
        assert!(is_convex(&square));
        let dart = [p(0.0, 0.0), p(4.0, 2.0), p(0.0, 4.0), p(1.0, 2.0)];
        assert!(!is_convex(&dart));
        let bowtie = [p(0.0, 0.0), p(1.0, 1.0), p(1.0, 0.0), p(0.0, 1.0)];
        assert!(!is_convex(&bowtie));
    }

    #[test]
    fn test_trace_boundary_square() {
        let arena = Bump::new();
        let (w, h) = (8, 8);
        let mut labels = vec![0u32; w * h];
        for y in 2..6 {
            for x in 2..6 {
                labels[y * w + x] = 1;
            }
        }
        let contour = trace_boundary(&arena, &labels, w, h, 2, 2, 1, 1000);
        // A 4x4 block has 12 border pixels
        assert_eq!(contour.len(), 12);
        assert_eq!(contour[0], p(2.0, 2.0));
        assert!((closed_perimeter(&contour) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_trace_boundary_single_pixel_spur() {
        let arena = Bump::new();
        let (w, h) = (6, 6);
        let mut labels = vec![0u32; w * h];
        // Vertical line of three pixels: the walk goes down and comes back up
        for y in 1..4 {
            labels[y * w + 2] = 1;
        }
        let contour = trace_boundary(&arena, &labels, w, h, 2, 1, 1, 100);
        assert_eq!(contour.len(), 4);
    }

    #[test]
    fn test_approx_closed_polygon_on_rectangle_outline() {
        let arena = Bump::new();
        let mut contour = Vec::new();
        // Start mid-side so the first vertex is not a corner
        for x in 10..=40 {
            contour.push(p(f64::from(x), 0.0));
        }
        for y in 1..=20 {
            contour.push(p(40.0, f64::from(y)));
        }
        for x in (0..40).rev() {
            contour.push(p(f64::from(x), 20.0));
        }
        for y in (0..20).rev() {
            contour.push(p(0.0, f64::from(y)));
        }
        for x in 1..10 {
            contour.push(p(f64::from(x), 0.0));
        }
        let eps = closed_perimeter(&contour) * 0.02;
        let poly = approx_closed_polygon(&arena, &contour, eps);
        assert_eq!(poly.len(), 4);
        let q = Quad::from_unordered([poly[0], poly[1], poly[2], poly[3]]);
        assert_eq!(q.corners, [p(0.0, 0.0), p(40.0, 0.0), p(40.0, 20.0), p(0.0, 20.0)]);
    }

    #[test]
    fn test_locate_paper_synthetic() {
        let arena = Bump::new();
        let mut img = ImageBuf::filled(200, 160, 30);
        let corners = [p(30.0, 20.0), p(170.0, 32.0), p(160.0, 140.0), p(22.0, 128.0)];
        fill_convex_polygon(&mut img, &corners, 220);
        let found = locate_paper(&arena, &img.view(), &ScanConfig::default()).unwrap();
        for (got, want) in found.quad.corners.iter().zip(&corners) {
            assert!(got.distance(*want) < 6.0, "corner {got:?} too far from {want:?}");
        }
    }

    #[test]
    fn test_inset_moves_sides_inward() {
        let q = Quad::from_unordered([p(0.0, 0.0), p(10.0, 0.0), p(10.0, 20.0), p(0.0, 20.0)]);
        let inner = q.inset(2.5).unwrap();
        let expected = [p(2.5, 2.5), p(7.5, 2.5), p(7.5, 17.5), p(2.5, 17.5)];
        for (got, want) in inner.corners.iter().zip(&expected) {
            assert!(got.distance(*want) < 1e-9, "{got:?} vs {want:?}");
        }
        // Shrinking past the middle would fold the quad over.
        assert!(q.inset(6.0).is_none());
    }

    #[test]
    fn test_locate_paper_excludes_background_rim() {
        let arena = Bump::new();
        let mut img = ImageBuf::filled(240, 200, 30);
        let corners = [p(40.0, 30.0), p(200.0, 30.0), p(200.0, 170.0), p(40.0, 170.0)];
        fill_convex_polygon(&mut img, &corners, 220);
        let found = locate_paper(&arena, &img.view(), &ScanConfig::default()).unwrap();
        for (got, want) in found.quad.corners.iter().zip(&corners) {
            assert!(got.distance(*want) < 2.5, "corner {got:?} too far from {want:?}");
        }
    }

    #[test]
    fn test_locate_paper_blank_frame() {
        let arena = Bump::new();
        let img = ImageBuf::filled(120, 90, 128);
        assert!(locate_paper(&arena, &img.view(), &ScanConfig::default()).is_none());
    }
}
