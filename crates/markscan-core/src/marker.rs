//! Corner registration markers on the rectified sheet.
//!
//! Markers are solid dark squares printed near each sheet corner. Detection
//! runs per frame ([`detect_corner_markers`]); [`MarkerTracker`] carries a
//! short memory across frames so a briefly occluded marker is not lost, and
//! reconstructs a single missing corner from the other three.

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

use crate::config::ScanConfig;
use crate::homography::Homography;
use crate::image::{ImageBuf, ImageView};
use crate::quad::{Point, closed_perimeter, polygon_area, trace_boundary};
use crate::segmentation::{ComponentStats, label_components_with_stats};
use crate::threshold::{AdaptiveThreshold, otsu_inv};
use crate::{filter, morphology};
use bumpalo::Bump;

/// One of the four sheet corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Corner {
    /// Top-left.
    TopLeft = 0,
    /// Top-right.
    TopRight = 1,
    /// Bottom-right.
    BottomRight = 2,
    /// Bottom-left.
    BottomLeft = 3,
}

impl Corner {
    /// All corners in slot order.
    pub const ALL: [Corner; 4] = [Corner::TopLeft, Corner::TopRight, Corner::BottomRight, Corner::BottomLeft];

    /// Slot index (TL=0, TR=1, BR=2, BL=3).
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    fn is_left(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::BottomLeft)
    }

    fn is_top(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::TopRight)
    }
}

/// Pixel rectangle of a corner search region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CornerRegion {
    /// Which corner this region belongs to.
    pub corner: Corner,
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width.
    pub width: usize,
    /// Height.
    pub height: usize,
}

/// The four `1/divisor` corner regions of a `width x height` sheet.
///
/// Right and bottom regions run to the last column and row.
#[must_use]
pub fn corner_regions(width: usize, height: usize, divisor: usize) -> [CornerRegion; 4] {
    let divisor = divisor.max(2);
    let right = width * (divisor - 1) / divisor;
    let bottom = height * (divisor - 1) / divisor;
    Corner::ALL.map(|corner| {
        let x = if corner.is_left() { 0 } else { right };
        let y = if corner.is_top() { 0 } else { bottom };
        CornerRegion {
            corner,
            x,
            y,
            width: if corner.is_left() { width / divisor } else { width - right },
            height: if corner.is_top() { height / divisor } else { height - bottom },
        }
    })
}

/// Shape and photometry of one connected blob.
#[derive(Clone, Copy, Debug)]
struct Blob {
    /// Filled area: lattice points inside or on the traced outline.
    area: f64,
    /// Closed length of the traced outline.
    perimeter: f64,
    /// Centroid of the filled blob, in region coordinates.
    centroid: Point,
    /// Mean gray level of the filled blob.
    interior_mean: f64,
    min_x: usize,
    min_y: usize,
    width: usize,
    height: usize,
}

impl Blob {
    fn aspect(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

/// Measure a labeled component against the gray image of the same region.
///
/// Holes are filled by taking, on every row, the span between the leftmost
/// and rightmost pixel of the label.
fn measure_blob(
    arena: &Bump,
    labels: &[u32],
    gray: &ImageView,
    label: u32,
    stat: &ComponentStats,
) -> Option<Blob> {
    let w = gray.width;
    let contour = trace_boundary(
        arena,
        labels,
        w,
        gray.height,
        stat.first_x as usize,
        stat.first_y as usize,
        label,
        4 * stat.pixel_count as usize + 8,
    );
    let perimeter = closed_perimeter(&contour);
    // Pick's theorem on the pixel-center polygon gives the pixel count of the filled shape
    let area = polygon_area(&contour) + contour.len() as f64 / 2.0 + 1.0;

    let (x0, x1) = (stat.min_x as usize, stat.max_x as usize);
    let mut count = 0u64;
    let mut sum_gray = 0u64;
    let mut sum_x = 0f64;
    let mut sum_y = 0f64;
    for y in stat.min_y as usize..=stat.max_y as usize {
        let row = &labels[y * w..(y + 1) * w];
        let Some(first) = (x0..=x1).find(|&x| row[x] == label) else {
            continue;
        };
        let last = (first..=x1).rev().find(|&x| row[x] == label).unwrap_or(first);
        let n = (last - first + 1) as u64;
        count += n;
        sum_gray += gray.sum_in_rect(first, y, last + 1, y + 1);
        sum_x += n as f64 * (first + last) as f64 / 2.0;
        sum_y += n as f64 * y as f64;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(Blob {
        area,
        perimeter,
        centroid: Point::new(sum_x / n, sum_y / n),
        interior_mean: sum_gray as f64 / n,
        min_x: x0,
        min_y: stat.min_y as usize,
        width: stat.width(),
        height: stat.height(),
    })
}

/// Mean gray level of the ring between the blob's bounding box and the box
/// grown by `max(3, min(w, h) / 6)`, clipped to the region.
fn ring_mean(gray: &ImageView, blob: &Blob) -> Option<f64> {
    let pad = (blob.width.min(blob.height) / 6).max(3);
    let ox0 = blob.min_x.saturating_sub(pad);
    let oy0 = blob.min_y.saturating_sub(pad);
    let ox1 = (blob.min_x + blob.width + pad).min(gray.width);
    let oy1 = (blob.min_y + blob.height + pad).min(gray.height);
    let outer_sum = gray.sum_in_rect(ox0, oy0, ox1, oy1);
    let inner_sum = gray.sum_in_rect(blob.min_x, blob.min_y, blob.min_x + blob.width, blob.min_y + blob.height);
    let outer_n = (ox1 - ox0) * (oy1 - oy0);
    let inner_n = blob.width * blob.height;
    if outer_n <= inner_n {
        return None;
    }
    Some((outer_sum - inner_sum) as f64 / (outer_n - inner_n) as f64)
}

/// Background border kept around a corner crop during the 5x5 closing, so
/// blobs touching the crop edge do not grow into it.
const CLEANUP_PAD: usize = 3;

fn padded_crop(img: &ImageView, region: &CornerRegion, pad: usize) -> ImageBuf {
    let mut out = ImageBuf::filled(region.width + 2 * pad, region.height + 2 * pad, 0);
    for y in 0..region.height {
        let src = &img.get_row(region.y + y)[region.x..region.x + region.width];
        out.row_mut(y + pad)[pad..pad + region.width].copy_from_slice(src);
    }
    out
}

fn best_marker_in_region(no_lines: &ImageView, gray: &ImageView, region: &CornerRegion, config: &ScanConfig) -> Option<Point> {
    let arena = Bump::new();
    let bin = padded_crop(no_lines, region, CLEANUP_PAD);
    let bin = morphology::open(&bin.view(), 3, 3);
    let bin = morphology::close(&bin.view(), 5, 5);
    let bin = bin.view().crop(CLEANUP_PAD, CLEANUP_PAD, region.width, region.height);
    let roi = gray.sub_view(region.x, region.y, region.width, region.height);

    let labeled = label_components_with_stats(&arena, &bin.data, bin.width, bin.height);
    let region_area = (region.width * region.height) as f64;
    let min_area = region_area * config.marker_min_area_fraction;
    let max_area = region_area * config.marker_max_area_fraction;
    let gate_x = config.marker_corner_gate * region.width as f64;
    let gate_y = config.marker_corner_gate * region.height as f64;

    let mut best: Option<(f64, Point)> = None;
    for (idx, stat) in labeled.component_stats.iter().enumerate() {
        let label = idx as u32 + 1;
        let Some(blob) = measure_blob(&arena, labeled.labels, &roi, label, stat) else {
            continue;
        };
        if blob.area < min_area || blob.area > max_area {
            continue;
        }
        if (blob.aspect() - 1.0).abs() > config.marker_aspect_tolerance {
            continue;
        }
        if blob.perimeter <= 1.0 {
            continue;
        }
        let compactness = 4.0 * std::f64::consts::PI * blob.area / (blob.perimeter * blob.perimeter);
        let extent = blob.area / (blob.width * blob.height) as f64;
        if compactness < config.marker_min_compactness || extent < config.marker_min_extent {
            continue;
        }
        if blob.interior_mean > config.marker_max_interior {
            continue;
        }
        let Some(ring) = ring_mean(&roi, &blob) else {
            continue;
        };
        if ring < config.marker_min_ring || ring - blob.interior_mean < config.marker_min_ring_contrast {
            continue;
        }

        // Distance from the region's outer corner
        let c = blob.centroid;
        let dx = if region.corner.is_left() { c.x } else { (region.width - 1) as f64 - c.x };
        let dy = if region.corner.is_top() { c.y } else { (region.height - 1) as f64 - c.y };
        if dx > gate_x || dy > gate_y {
            continue;
        }

        let score = blob.area * (255.0 - blob.interior_mean) / (1.0 + dx * dx + dy * dy);
        if best.map_or(true, |(s, _)| score > s) {
            best = Some((score, Point::new(c.x + region.x as f64, c.y + region.y as f64)));
        }
    }
    best.map(|(_, p)| p)
}

/// Largest roughly square dark blob in a window around `guess`.
fn search_near(gray: &ImageView, guess: Point, config: &ScanConfig) -> Option<Point> {
    let half = (config.recovery_window / 2) as f64;
    let x0 = (guess.x - half).max(0.0) as usize;
    let y0 = (guess.y - half).max(0.0) as usize;
    let x1 = ((guess.x + half).max(0.0) as usize).min(gray.width);
    let y1 = ((guess.y + half).max(0.0) as usize).min(gray.height);
    if x1 < x0 + 10 || y1 < y0 + 10 {
        return None;
    }
    let window = gray.sub_view(x0, y0, x1 - x0, y1 - y0);
    let bin = otsu_inv(&window);

    let arena = Bump::new();
    let labeled = label_components_with_stats(&arena, &bin.data, bin.width, bin.height);
    let mut best: Option<(f64, Point)> = None;
    for (idx, stat) in labeled.component_stats.iter().enumerate() {
        let Some(blob) = measure_blob(&arena, labeled.labels, &window, idx as u32 + 1, stat) else {
            continue;
        };
        if blob.area < config.recovery_min_area {
            continue;
        }
        if (blob.aspect() - 1.0).abs() > config.recovery_aspect_tolerance {
            continue;
        }
        if best.map_or(true, |(a, _)| blob.area > a) {
            best = Some((blob.area, Point::new(blob.centroid.x + x0 as f64, blob.centroid.y + y0 as f64)));
        }
    }
    best.map(|(_, p)| p)
}

/// Detect the four corner markers in a rectified sheet image.
///
/// Slots are TL, TR, BR, BL. When both bottom markers are found, a missing top
/// marker is searched for once more around the vertical reflection of the
/// bottom pair.
#[must_use]
pub fn detect_corner_markers(img: &ImageView, config: &ScanConfig) -> [Option<Point>; 4] {
    let mut found = [None; 4];
    let divisor = config.marker_region_divisor;
    if img.width < divisor || img.height < divisor {
        return found;
    }

    let eq = filter::clahe(img, config.clahe_clip_limit, config.clahe_tiles);
    let binary = AdaptiveThreshold::for_markers(config).apply(&eq.view());

    // Strip printed ruling lines before looking for blobs
    let len = config.marker_line_length;
    let mut lines = morphology::open(&binary.view(), len, 1);
    let vertical = morphology::open(&binary.view(), 1, len);
    for (l, &v) in lines.data.iter_mut().zip(&vertical.data) {
        *l = (*l).max(v);
    }
    let mut no_lines: ImageBuf = binary;
    morphology::subtract_in_place(&mut no_lines, &lines);

    for region in corner_regions(img.width, img.height, divisor) {
        found[region.corner.index()] = best_marker_in_region(&no_lines.view(), img, &region, config);
    }

    if let (Some(br), Some(bl)) = (found[Corner::BottomRight.index()], found[Corner::BottomLeft.index()]) {
        let mirrored_y = img.height as f64 - (br.y + bl.y) / 2.0;
        let border = config.recovery_border;
        let clamp = |x: f64| {
            Point::new(
                x.clamp(border, (img.width as f64 - border).max(border)),
                mirrored_y.clamp(border, (img.height as f64 - border).max(border)),
            )
        };
        for (top, bottom) in [(Corner::TopLeft, bl), (Corner::TopRight, br)] {
            if found[top.index()].is_none() {
                found[top.index()] = search_near(img, clamp(bottom.x), config);
                if found[top.index()].is_some() {
                    tracing::debug!(corner = ?top, "recovered top marker from bottom pair");
                }
            }
        }
    }

    found
}

/// Reconstruct the missing corner of a parallelogram from the other three.
///
/// Returns `None` unless exactly one slot is empty.
#[must_use]
pub fn complete_parallelogram(slots: &[Option<Point>; 4]) -> Option<(Corner, Point)> {
    let missing: Vec<usize> = (0..4).filter(|&i| slots[i].is_none()).collect();
    let [m] = missing.as_slice() else {
        return None;
    };
    let get = |c: Corner| slots[c.index()];
    let (corner, point) = match *m {
        0 => (Corner::TopLeft, get(Corner::BottomLeft)? + get(Corner::TopRight)? - get(Corner::BottomRight)?),
        1 => (Corner::TopRight, get(Corner::TopLeft)? + get(Corner::BottomRight)? - get(Corner::BottomLeft)?),
        2 => (Corner::BottomRight, get(Corner::TopRight)? + get(Corner::BottomLeft)? - get(Corner::TopLeft)?),
        _ => (Corner::BottomLeft, get(Corner::TopLeft)? + get(Corner::BottomRight)? - get(Corner::TopRight)?),
    };
    Some((corner, point))
}

/// Cross-frame marker memory: one optional point and one age counter per slot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerSet {
    points: [Option<Point>; 4],
    ages: [u32; 4],
}

impl MarkerSet {
    /// An empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame's detections into memory.
    ///
    /// Detected slots are overwritten with age 0. Other slots age by one
    /// (capped at `max_age + 100`); once older than `max_age` they are cleared.
    pub fn integrate(&mut self, detections: &[Option<Point>; 4], max_age: u32) {
        for i in 0..4 {
            if let Some(p) = detections[i] {
                self.points[i] = Some(p);
                self.ages[i] = 0;
            } else {
                self.ages[i] = self.ages[i].saturating_add(1).min(max_age.saturating_add(100));
                if self.ages[i] > max_age {
                    self.points[i] = None;
                }
            }
        }
    }

    /// Remembered position of a corner.
    #[must_use]
    pub fn get(&self, corner: Corner) -> Option<Point> {
        self.points[corner.index()]
    }

    /// Frames since the corner was last detected.
    #[must_use]
    pub fn age(&self, corner: Corner) -> u32 {
        self.ages[corner.index()]
    }

    /// All slots.
    #[must_use]
    pub fn points(&self) -> &[Option<Point>; 4] {
        &self.points
    }

    /// Number of known slots.
    #[must_use]
    pub fn known_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    /// Forget everything.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Where a reported marker position came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MarkerSource {
    /// Found in the current frame.
    Detected,
    /// Carried over from an earlier frame.
    Remembered {
        /// Frames since last detection.
        age: u32,
    },
    /// Estimated from the other three corners; never stored.
    Completed,
    /// Unknown.
    Absent,
}

/// One reported marker.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerObservation {
    /// Slot.
    pub corner: Corner,
    /// Position in rectified-sheet coordinates.
    pub sheet: Option<Point>,
    /// Position back-projected into the original frame.
    pub frame: Option<Point>,
    /// Provenance.
    pub source: MarkerSource,
}

/// Markers of one frame after memory and completion.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MarkerReport {
    /// Observations in TL, TR, BR, BL order.
    pub markers: [MarkerObservation; 4],
}

impl MarkerReport {
    /// Observation for one corner.
    #[must_use]
    pub fn get(&self, corner: Corner) -> &MarkerObservation {
        &self.markers[corner.index()]
    }

    /// True when every corner has a position, estimated or not.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.markers.iter().all(|m| m.sheet.is_some())
    }

    /// Number of markers found in this very frame.
    #[must_use]
    pub fn detected_count(&self) -> usize {
        self.markers.iter().filter(|m| m.source == MarkerSource::Detected).count()
    }

    /// All four sheet positions, if complete.
    #[must_use]
    pub fn sheet_points(&self) -> Option<[Point; 4]> {
        let [a, b, c, d] = self.markers.map(|m| m.sheet);
        Some([a?, b?, c?, d?])
    }
}

/// Caller-owned marker tracking session, one per camera stream.
///
/// # Example
/// ```
/// use markscan_core::marker::{Corner, MarkerTracker};
/// use markscan_core::homography::Homography;
/// use markscan_core::quad::Point;
///
/// let mut tracker = MarkerTracker::new(20);
/// let frame = [Some(Point::new(10.0, 10.0)), Some(Point::new(90.0, 10.0)), None, Some(Point::new(10.0, 130.0))];
/// let report = tracker.update(&frame, &Homography::identity());
/// assert!(report.is_complete());
/// assert_eq!(report.get(Corner::BottomRight).sheet, Some(Point::new(90.0, 130.0)));
/// ```
#[derive(Clone, Debug)]
pub struct MarkerTracker {
    memory: MarkerSet,
    max_age: u32,
}

impl Default for MarkerTracker {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default())
    }
}

impl MarkerTracker {
    /// New session forgetting markers after `max_age` frames without detection.
    #[must_use]
    pub fn new(max_age: u32) -> Self {
        Self {
            memory: MarkerSet::new(),
            max_age,
        }
    }

    /// New session using the configured maximum age.
    #[must_use]
    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.marker_max_age)
    }

    /// Current memory.
    #[must_use]
    pub fn memory(&self) -> &MarkerSet {
        &self.memory
    }

    /// Start over, e.g. when the camera restarts.
    pub fn reset(&mut self) {
        self.memory.reset();
    }

    /// Fold one frame's detections into memory and build the report.
    pub fn update(&mut self, detections: &[Option<Point>; 4], sheet_to_frame: &Homography) -> MarkerReport {
        self.memory.integrate(detections, self.max_age);

        let mut markers = Corner::ALL.map(|corner| {
            let sheet = self.memory.get(corner);
            let source = match (detections[corner.index()], sheet) {
                (Some(_), _) => MarkerSource::Detected,
                (None, Some(_)) => MarkerSource::Remembered {
                    age: self.memory.age(corner),
                },
                (None, None) => MarkerSource::Absent,
            };
            MarkerObservation {
                corner,
                sheet,
                frame: None,
                source,
            }
        });

        if let Some((corner, point)) = complete_parallelogram(self.memory.points()) {
            tracing::debug!(?corner, x = point.x, y = point.y, "completed missing marker");
            markers[corner.index()].sheet = Some(point);
            markers[corner.index()].source = MarkerSource::Completed;
        }

        for m in &mut markers {
            m.frame = m.sheet.and_then(|p| sheet_to_frame.try_project(p));
        }

        MarkerReport { markers }
    }

    /// Detect markers in a rectified sheet and update memory.
    pub fn track(&mut self, rectified: &ImageView, config: &ScanConfig, sheet_to_frame: &Homography) -> MarkerReport {
        let detections = detect_corner_markers(rectified, config);
        self.update(&detections, sheet_to_frame)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{SheetSpec, render_sheet};

    fn p(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_corner_regions() {
        let regions = corner_regions(1600, 2200, 6);
        assert_eq!(regions[0], CornerRegion { corner: Corner::TopLeft, x: 0, y: 0, width: 266, height: 366 });
        assert_eq!((regions[1].x, regions[1].y), (1333, 0));
        assert_eq!((regions[2].x, regions[2].y), (1333, 1833));
        assert_eq!((regions[3].x, regions[3].y), (0, 1833));
        // The far regions reach the last column and row.
        assert_eq!(regions[2].x + regions[2].width, 1600);
        assert_eq!(regions[2].y + regions[2].height, 2200);
    }

    #[test]
    fn test_edge_blob_keeps_its_size_after_cleanup() {
        // A 9x9 square two pixels from the right edge of a corner crop.
        let mut img = ImageBuf::filled(60, 40, 0);
        for y in 5..14 {
            img.row_mut(y)[49..58].fill(255);
        }
        let region = CornerRegion { corner: Corner::TopRight, x: 0, y: 0, width: 60, height: 40 };
        let bin = padded_crop(&img.view(), &region, CLEANUP_PAD);
        let bin = morphology::close(&morphology::open(&bin.view(), 3, 3).view(), 5, 5);
        let bin = bin.view().crop(CLEANUP_PAD, CLEANUP_PAD, 60, 40);
        assert_eq!(bin, img);
    }

    #[test]
    fn test_parallelogram_completion_each_slot() {
        let rect = [p(10.0, 20.0), p(110.0, 20.0), p(110.0, 220.0), p(10.0, 220.0)];
        for missing in 0..4 {
            let mut slots = rect.map(Some);
            slots[missing] = None;
            let (corner, point) = complete_parallelogram(&slots).unwrap();
            assert_eq!(corner.index(), missing);
            assert!(point.distance(rect[missing]) < 1e-9);
        }
        assert!(complete_parallelogram(&rect.map(Some)).is_none());
        assert!(complete_parallelogram(&[None, None, Some(rect[2]), Some(rect[3])]).is_none());
    }

    #[test]
    fn test_memory_ages_out() {
        let mut set = MarkerSet::new();
        let seen = [Some(p(1.0, 1.0)), None, None, None];
        set.integrate(&seen, 2);
        assert_eq!(set.get(Corner::TopLeft), Some(p(1.0, 1.0)));

        let nothing = [None; 4];
        set.integrate(&nothing, 2);
        set.integrate(&nothing, 2);
        assert_eq!(set.age(Corner::TopLeft), 2);
        assert!(set.get(Corner::TopLeft).is_some());

        set.integrate(&nothing, 2);
        assert!(set.get(Corner::TopLeft).is_none());
        assert_eq!(set.known_count(), 0);
    }

    #[test]
    fn test_age_is_capped() {
        let mut set = MarkerSet::new();
        for _ in 0..500 {
            set.integrate(&[None; 4], 20);
        }
        assert_eq!(set.age(Corner::BottomLeft), 120);
    }

    #[test]
    fn test_tracker_sources() {
        let mut tracker = MarkerTracker::new(5);
        let all = [Some(p(5.0, 5.0)), Some(p(95.0, 5.0)), Some(p(95.0, 135.0)), Some(p(5.0, 135.0))];
        let report = tracker.update(&all, &Homography::identity());
        assert_eq!(report.detected_count(), 4);

        // Bottom-right occluded for a frame: remembered, not completed.
        let partial = [all[0], all[1], None, all[3]];
        let report = tracker.update(&partial, &Homography::identity());
        assert_eq!(report.get(Corner::BottomRight).source, MarkerSource::Remembered { age: 1 });
        assert_eq!(report.get(Corner::BottomRight).frame, Some(p(95.0, 135.0)));
    }

    #[test]
    fn test_completion_is_not_stored() {
        let mut tracker = MarkerTracker::new(0);
        let three = [Some(p(5.0, 5.0)), Some(p(95.0, 5.0)), None, Some(p(5.0, 135.0))];
        let report = tracker.update(&three, &Homography::identity());
        assert_eq!(report.get(Corner::BottomRight).source, MarkerSource::Completed);
        assert!(report.is_complete());
        assert!(tracker.memory().get(Corner::BottomRight).is_none());

        tracker.reset();
        assert_eq!(tracker.memory().known_count(), 0);
    }

    #[test]
    fn test_detects_markers_on_clean_sheet() {
        let spec = SheetSpec::default();
        let sheet = render_sheet(&spec, &[]);
        let config = spec.config();
        let found = detect_corner_markers(&sheet.view(), &config);
        for (corner, expected) in Corner::ALL.iter().zip(spec.marker_centers()) {
            let got = found[corner.index()].unwrap_or_else(|| panic!("{corner:?} not found"));
            assert!(got.distance(expected) < 1.5, "{corner:?}: {got:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_recovers_faint_top_marker() {
        let spec = SheetSpec::default();
        let mut sheet = render_sheet(&spec, &[]);
        // Gray out the top-left marker so it fails the interior check but
        // stays darker than the paper for the local search.
        let tl = spec.marker_centers()[0];
        let half = spec.marker_side as isize / 2;
        for dy in -half..=half {
            for dx in -half..=half {
                sheet.put(tl.x as isize + dx, tl.y as isize + dy, 120);
            }
        }
        let found = detect_corner_markers(&sheet.view(), &spec.config());
        let got = found[0].unwrap();
        assert!(got.distance(tl) < 2.0, "{got:?} vs {tl:?}");
    }

    #[test]
    fn test_blank_sheet_has_no_markers() {
        let blank = ImageBuf::filled(400, 560, 235);
        let found = detect_corner_markers(&blank.view(), &ScanConfig::default());
        assert_eq!(found, [None; 4]);
    }
}
