//! Synthetic answer sheets and camera frames for tests and benchmarks.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::expect_used)]

use crate::config::{NormRect, RegionDefinition, RegionKind, ScanConfig, SheetLayout};
use crate::homography::{Homography, sheet_corners};
use crate::image::ImageBuf;
use crate::quad::Point;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Gray level of blank paper.
pub const PAPER: u8 = 235;
/// Gray level of pencil fill.
pub const PENCIL: u8 = 40;
/// Gray level of printed bubble outlines.
pub const OUTLINE: u8 = 170;
/// Gray level of corner markers.
pub const MARKER: u8 = 20;
/// Gray level of the table behind the sheet in rendered photos.
pub const BACKGROUND: u8 = 40;

/// A filled bubble: `(region name, row, column)`. Single-column regions use column 0.
pub type FilledBubble = (&'static str, usize, usize);

/// Description of a synthetic sheet.
#[derive(Clone, Debug)]
pub struct SheetSpec {
    /// Rectified sheet width in pixels.
    pub width: usize,
    /// Rectified sheet height in pixels.
    pub height: usize,
    /// Side length of the square corner markers.
    pub marker_side: usize,
    /// Distance from the sheet edge to a marker center.
    pub marker_inset: usize,
    /// Regions printed on the sheet.
    pub regions: Vec<RegionDefinition>,
}

impl Default for SheetSpec {
    fn default() -> Self {
        let region = |name: &str, rect: NormRect, rows, cols, kind| RegionDefinition {
            name: name.to_string(),
            rect,
            rows,
            cols,
            kind,
        };
        Self {
            width: 400,
            height: 560,
            marker_side: 9,
            marker_inset: 7,
            regions: vec![
                region("mathematics", NormRect::new(0.10, 0.20, 0.30, 0.30), 5, 4, RegionKind::LETTERED),
                region("science", NormRect::new(0.55, 0.20, 0.30, 0.30), 5, 4, RegionKind::LETTERED),
                region("class_digit", NormRect::new(0.25, 0.58, 0.05, 0.30), 10, 1, RegionKind::DIGIT),
            ],
        }
    }
}

impl SheetSpec {
    /// Scan configuration whose warp size matches the sheet.
    ///
    /// Corner regions of a sheet this small are only ~66 px wide, so the
    /// marker gate is widened to keep a pixel of slack after rectification.
    #[must_use]
    pub fn config(&self) -> ScanConfig {
        ScanConfig::builder()
            .warp_size(self.width, self.height)
            .marker_corner_gate(0.2)
            .build()
    }

    /// The printed regions as a layout.
    #[must_use]
    pub fn layout(&self) -> SheetLayout {
        SheetLayout {
            regions: self.regions.clone(),
        }
    }

    /// Marker centers in TL, TR, BR, BL order.
    #[must_use]
    pub fn marker_centers(&self) -> [Point; 4] {
        let i = self.marker_inset as f64;
        let r = (self.width - 1 - self.marker_inset) as f64;
        let b = (self.height - 1 - self.marker_inset) as f64;
        [Point::new(i, i), Point::new(r, i), Point::new(r, b), Point::new(i, b)]
    }

    /// A fixed set of answers touching every outcome.
    ///
    /// Reads as `A,C,-,X,D` for mathematics, `B,B,A,-,C` for science and `7`
    /// for the class digit.
    #[must_use]
    pub fn sample_answers(&self) -> Vec<FilledBubble> {
        vec![
            ("mathematics", 0, 0),
            ("mathematics", 1, 2),
            ("mathematics", 3, 1),
            ("mathematics", 3, 3),
            ("mathematics", 4, 3),
            ("science", 0, 1),
            ("science", 1, 1),
            ("science", 2, 0),
            ("science", 4, 2),
            ("class_digit", 7, 0),
        ]
    }

    /// Mark strings a perfect reader produces for `marks`, in layout order.
    ///
    /// Single columns report the first filled row.
    #[must_use]
    pub fn expected_mark_strings(&self, marks: &[FilledBubble]) -> Vec<String> {
        self.regions
            .iter()
            .map(|region| {
                let filled = |row: usize| -> Vec<usize> {
                    marks
                        .iter()
                        .filter(|(name, r, _)| *name == region.name && *r == row)
                        .map(|&(_, _, c)| c)
                        .collect()
                };
                match region.kind {
                    RegionKind::Grid { first_option } => (0..region.rows)
                        .map(|row| match filled(row).as_slice() {
                            [] => '-',
                            [col] => char::from_u32(first_option as u32 + *col as u32).unwrap_or('?'),
                            _ => 'X',
                        })
                        .map(String::from)
                        .collect::<Vec<_>>()
                        .join(","),
                    RegionKind::SingleColumn { first_symbol } => (0..region.rows)
                        .find(|&row| !filled(row).is_empty())
                        .and_then(|row| char::from_u32(first_symbol as u32 + row as u32))
                        .unwrap_or('-')
                        .to_string(),
                }
            })
            .collect()
    }
}

/// Fill every pixel whose center lies inside a convex polygon (either winding).
pub fn fill_convex_polygon(img: &mut ImageBuf, polygon: &[Point], value: u8) {
    if polygon.len() < 3 {
        return;
    }
    let min_y = polygon.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_y = polygon.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max).ceil().max(0.0) as usize;
    let min_x = polygon.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0) as usize;
    let max_x = polygon.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max).ceil().max(0.0) as usize;

    let inside = |x: f64, y: f64| {
        let mut sign = 0.0f64;
        for i in 0..polygon.len() {
            let a = polygon[i];
            let b = polygon[(i + 1) % polygon.len()];
            let cross = (b.x - a.x) * (y - a.y) - (b.y - a.y) * (x - a.x);
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
    };

    for y in min_y..=max_y.min(img.height.saturating_sub(1)) {
        for x in min_x..=max_x.min(img.width.saturating_sub(1)) {
            if inside(x as f64, y as f64) {
                img.row_mut(y)[x] = value;
            }
        }
    }
}

fn fill_disc(img: &mut ImageBuf, cx: f64, cy: f64, radius: f64, value: u8) {
    let r2 = radius * radius;
    for y in (cy - radius).floor() as isize..=(cy + radius).ceil() as isize {
        for x in (cx - radius).floor() as isize..=(cx + radius).ceil() as isize {
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            if dx * dx + dy * dy <= r2 {
                img.put(x, y, value);
            }
        }
    }
}

fn draw_circle(img: &mut ImageBuf, cx: f64, cy: f64, radius: f64, value: u8) {
    let steps = (radius * 8.0).ceil().max(16.0) as usize;
    for i in 0..steps {
        let t = i as f64 / steps as f64 * std::f64::consts::TAU;
        img.put((cx + radius * t.cos()).round() as isize, (cy + radius * t.sin()).round() as isize, value);
    }
}

/// Render a rectified sheet: paper, corner markers, bubble outlines and the given fills.
///
/// Bubbles sit at the centers of the same integer cells the reader uses.
#[must_use]
pub fn render_sheet(spec: &SheetSpec, marks: &[FilledBubble]) -> ImageBuf {
    let mut img = ImageBuf::filled(spec.width, spec.height, PAPER);

    let half = (spec.marker_side / 2) as isize;
    for c in spec.marker_centers() {
        for dy in -half..=half {
            for dx in -half..=half {
                img.put(c.x as isize + dx, c.y as isize + dy, MARKER);
            }
        }
    }

    for region in &spec.regions {
        let Some(rect) = region.clipped_rect().to_pixels(spec.width, spec.height) else {
            continue;
        };
        let cols = match region.kind {
            RegionKind::Grid { .. } => region.cols,
            RegionKind::SingleColumn { .. } => 1,
        };
        let cell_w = rect.width / cols;
        let cell_h = rect.height / region.rows;
        let radius = 0.3 * cell_w.min(cell_h) as f64;
        for row in 0..region.rows {
            for col in 0..cols {
                let cx = (rect.x + col * cell_w) as f64 + cell_w as f64 / 2.0;
                let cy = (rect.y + row * cell_h) as f64 + cell_h as f64 / 2.0;
                let filled = marks
                    .iter()
                    .any(|&(name, r, c)| name == region.name && r == row && c == col);
                if filled {
                    fill_disc(&mut img, cx, cy, radius, PENCIL);
                } else {
                    draw_circle(&mut img, cx, cy, radius, OUTLINE);
                }
            }
        }
    }
    img
}

/// Place a rendered sheet into a `width x height` camera frame.
///
/// `corners` are where the sheet's TL, TR, BR, BL corners land. Pixels outside
/// the sheet show a dark background, and seeded Gaussian noise of
/// `noise_sigma` is added everywhere.
#[must_use]
pub fn render_photo(
    sheet: &ImageBuf,
    width: usize,
    height: usize,
    corners: [Point; 4],
    noise_sigma: f64,
    seed: u64,
) -> ImageBuf {
    let frame_to_sheet = Homography::from_pairs(&corners, &sheet_corners(sheet.width, sheet.height))
        .expect("photo corners must form a proper quadrilateral");
    let view = sheet.view();
    let max_x = sheet.width as f64 - 1.0;
    let max_y = sheet.height as f64 - 1.0;

    let mut out = ImageBuf::filled(width, height, BACKGROUND);
    for y in 0..height {
        for x in 0..width {
            let Some(s) = frame_to_sheet.try_project(Point::new(x as f64, y as f64)) else {
                continue;
            };
            if (0.0..=max_x).contains(&s.x) && (0.0..=max_y).contains(&s.y) {
                out.row_mut(y)[x] = (view.sample_bilinear(s.x, s.y) + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }

    if noise_sigma > 0.0 {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, noise_sigma).expect("Invalid noise params");
        for pixel in &mut out.data {
            let noisy = f64::from(*pixel) + normal.sample(&mut rng);
            *pixel = noisy.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Mean distance between two corner sets under the best of the four cyclic rotations.
#[must_use]
pub fn compute_corner_error(detected: &[Point; 4], ground_truth: &[Point; 4]) -> f64 {
    (0..4)
        .map(|rot| {
            (0..4)
                .map(|i| detected[(i + rot) % 4].distance(ground_truth[i]))
                .sum::<f64>()
                / 4.0
        })
        .fold(f64::MAX, f64::min)
}
