//! Configuration types for the scanning pipeline.
//!
//! This module provides:
//! - [`ScanConfig`]: every heuristic threshold of the pipeline in one place
//! - [`SheetLayout`]: the named answer regions of a sheet template

use crate::error::ScanError;

// ============================================================================
// ScanConfig: pipeline-level heuristics
// ============================================================================

/// Pipeline-level configuration.
///
/// Values are tuned for an A4 sheet rectified to 1600x2200 and a 720p
/// webcam. They are tunable per template, printer and lighting; none of them
/// is an invariant. Use the builder for ergonomic construction.
///
/// # Example
/// ```
/// use markscan_core::config::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .warp_size(800, 1100)
///     .fill_threshold(0.3)
///     .build();
/// assert_eq!(config.warp_width, 800);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ScanConfig {
    // Rectification
    /// Width of the rectified sheet image (default: 1600).
    pub warp_width: usize,
    /// Height of the rectified sheet image (default: 2200).
    pub warp_height: usize,

    // Paper outline
    /// Gaussian kernel size applied before edge detection (default: 5).
    pub paper_blur_kernel: usize,
    /// Canny hysteresis low threshold on the L1 Sobel magnitude (default: 50).
    pub canny_low: f32,
    /// Canny hysteresis high threshold (default: 150).
    pub canny_high: f32,
    /// Closing kernel that bridges gaps in the edge map (default: 7).
    pub paper_close_kernel: usize,
    /// Dilation kernel applied after closing (default: 5).
    pub paper_dilate_kernel: usize,
    /// Polygon approximation tolerance as a fraction of the perimeter (default: 0.02).
    pub polygon_epsilon_fraction: f64,

    // Registration markers
    /// Corner search regions are `1/divisor` of the sheet in each axis (default: 6).
    pub marker_region_divisor: usize,
    /// CLAHE clip limit (default: 2.0).
    pub clahe_clip_limit: f32,
    /// CLAHE tile grid size per axis (default: 8).
    pub clahe_tiles: usize,
    /// Adaptive Gaussian threshold block size for marker binarization (default: 41).
    pub marker_block_size: usize,
    /// Constant subtracted from the local mean for marker binarization (default: 8).
    pub marker_threshold_constant: i16,
    /// Length of the line kernels used to suppress ruling lines (default: 25).
    pub marker_line_length: usize,
    /// Minimum blob area as a fraction of the corner region area (default: 0.0005).
    pub marker_min_area_fraction: f64,
    /// Maximum blob area as a fraction of the corner region area (default: 0.02).
    pub marker_max_area_fraction: f64,
    /// Allowed deviation of the bounding-box aspect ratio from 1 (default: 0.15).
    pub marker_aspect_tolerance: f64,
    /// Minimum isoperimetric ratio 4πA/P² (default: 0.70).
    pub marker_min_compactness: f64,
    /// Minimum area / bounding-box area (default: 0.80).
    pub marker_min_extent: f64,
    /// Maximum mean gray level inside a marker (default: 80).
    pub marker_max_interior: f64,
    /// Minimum mean gray level of the ring around a marker (default: 185).
    pub marker_min_ring: f64,
    /// Minimum ring minus interior contrast (default: 110).
    pub marker_min_ring_contrast: f64,
    /// Marker centroid must lie within this fraction of the region from its outer corner (default: 0.12).
    pub marker_corner_gate: f64,
    /// Side of the square window searched around a predicted top marker (default: 40).
    pub recovery_window: usize,
    /// Minimum blob area accepted in the recovery search (default: 50).
    pub recovery_min_area: f64,
    /// Allowed aspect deviation in the recovery search (default: 0.2).
    pub recovery_aspect_tolerance: f64,
    /// Predicted positions are clamped this many pixels away from the border (default: 10).
    pub recovery_border: f64,
    /// Frames a marker is remembered after its last detection (default: 20).
    pub marker_max_age: u32,

    // Bubble reading
    /// Adaptive mean threshold block size for bubble binarization (default: 21).
    pub bubble_block_size: usize,
    /// Constant subtracted from the local mean for bubble binarization (default: 7).
    pub bubble_threshold_constant: i16,
    /// Fraction of a cell trimmed on every side before measuring fill (default: 0.2).
    pub bubble_cell_margin: f64,
    /// Fill ratio at or above which a cell counts as marked (default: 0.28).
    pub fill_threshold: f64,
    /// Minimum gap between the best and second-best fill ratio (default: 0.12).
    pub min_separation: f64,

    // Scoring
    /// Wrong answers cancel `1 / penalty_divisor` of a correct one (default: 4).
    pub penalty_divisor: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            warp_width: 1600,
            warp_height: 2200,
            paper_blur_kernel: 5,
            canny_low: 50.0,
            canny_high: 150.0,
            paper_close_kernel: 7,
            paper_dilate_kernel: 5,
            polygon_epsilon_fraction: 0.02,
            marker_region_divisor: 6,
            clahe_clip_limit: 2.0,
            clahe_tiles: 8,
            marker_block_size: 41,
            marker_threshold_constant: 8,
            marker_line_length: 25,
            marker_min_area_fraction: 0.0005,
            marker_max_area_fraction: 0.02,
            marker_aspect_tolerance: 0.15,
            marker_min_compactness: 0.70,
            marker_min_extent: 0.80,
            marker_max_interior: 80.0,
            marker_min_ring: 185.0,
            marker_min_ring_contrast: 110.0,
            marker_corner_gate: 0.12,
            recovery_window: 40,
            recovery_min_area: 50.0,
            recovery_aspect_tolerance: 0.2,
            recovery_border: 10.0,
            marker_max_age: 20,
            bubble_block_size: 21,
            bubble_threshold_constant: 7,
            bubble_cell_margin: 0.2,
            fill_threshold: 0.28,
            min_separation: 0.12,
            penalty_divisor: 4.0,
        }
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    #[must_use]
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Parse a (possibly partial) JSON configuration; missing fields take defaults.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        serde_json::from_str::<Self>(json)
            .map(|c| c.normalized())
            .map_err(|e| ScanError::Parse {
                what: "scan config",
                message: e.to_string(),
            })
    }

    /// Force kernel and block sizes to odd values and clamp ratios into range.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.warp_width = self.warp_width.max(16);
        self.warp_height = self.warp_height.max(16);
        self.paper_blur_kernel = odd(self.paper_blur_kernel, 1);
        self.paper_close_kernel = odd(self.paper_close_kernel, 1);
        self.paper_dilate_kernel = odd(self.paper_dilate_kernel, 1);
        self.marker_block_size = odd(self.marker_block_size, 3);
        self.bubble_block_size = odd(self.bubble_block_size, 3);
        self.marker_line_length = odd(self.marker_line_length, 3);
        self.marker_region_divisor = self.marker_region_divisor.max(2);
        self.clahe_tiles = self.clahe_tiles.max(1);
        self.bubble_cell_margin = self.bubble_cell_margin.clamp(0.0, 0.45);
        self.fill_threshold = self.fill_threshold.clamp(0.0, 1.0);
        self.min_separation = self.min_separation.clamp(0.0, 1.0);
        if self.penalty_divisor <= 0.0 || !self.penalty_divisor.is_finite() {
            self.penalty_divisor = ScanConfig::default().penalty_divisor;
        }
        self
    }
}

fn odd(size: usize, min: usize) -> usize {
    let s = size.max(min);
    if s % 2 == 0 { s + 1 } else { s }
}

/// Builder for [`ScanConfig`].
#[derive(Default)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    /// Set the rectified image size.
    #[must_use]
    pub fn warp_size(mut self, width: usize, height: usize) -> Self {
        self.config.warp_width = width;
        self.config.warp_height = height;
        self
    }

    /// Set the pre-edge-detection blur kernel.
    #[must_use]
    pub fn paper_blur_kernel(mut self, size: usize) -> Self {
        self.config.paper_blur_kernel = size;
        self
    }

    /// Set the Canny hysteresis thresholds.
    #[must_use]
    pub fn canny_thresholds(mut self, low: f32, high: f32) -> Self {
        self.config.canny_low = low;
        self.config.canny_high = high;
        self
    }

    /// Set the edge closing and dilation kernels.
    #[must_use]
    pub fn paper_morphology(mut self, close: usize, dilate: usize) -> Self {
        self.config.paper_close_kernel = close;
        self.config.paper_dilate_kernel = dilate;
        self
    }

    /// Set the polygon approximation tolerance.
    #[must_use]
    pub fn polygon_epsilon_fraction(mut self, fraction: f64) -> Self {
        self.config.polygon_epsilon_fraction = fraction;
        self
    }

    /// Set the corner region divisor.
    #[must_use]
    pub fn marker_region_divisor(mut self, divisor: usize) -> Self {
        self.config.marker_region_divisor = divisor;
        self
    }

    /// Set the CLAHE parameters.
    #[must_use]
    pub fn clahe(mut self, clip_limit: f32, tiles: usize) -> Self {
        self.config.clahe_clip_limit = clip_limit;
        self.config.clahe_tiles = tiles;
        self
    }

    /// Set the marker binarization block size and constant.
    #[must_use]
    pub fn marker_threshold(mut self, block_size: usize, constant: i16) -> Self {
        self.config.marker_block_size = block_size;
        self.config.marker_threshold_constant = constant;
        self
    }

    /// Set the ruling-line suppression kernel length.
    #[must_use]
    pub fn marker_line_length(mut self, length: usize) -> Self {
        self.config.marker_line_length = length;
        self
    }

    /// Set the marker area range as fractions of the corner region.
    #[must_use]
    pub fn marker_area_fractions(mut self, min: f64, max: f64) -> Self {
        self.config.marker_min_area_fraction = min;
        self.config.marker_max_area_fraction = max;
        self
    }

    /// Set the marker aspect tolerance.
    #[must_use]
    pub fn marker_aspect_tolerance(mut self, tolerance: f64) -> Self {
        self.config.marker_aspect_tolerance = tolerance;
        self
    }

    /// Set the marker shape thresholds.
    #[must_use]
    pub fn marker_shape(mut self, min_compactness: f64, min_extent: f64) -> Self {
        self.config.marker_min_compactness = min_compactness;
        self.config.marker_min_extent = min_extent;
        self
    }

    /// Set the marker photometric thresholds.
    #[must_use]
    pub fn marker_photometry(mut self, max_interior: f64, min_ring: f64, min_contrast: f64) -> Self {
        self.config.marker_max_interior = max_interior;
        self.config.marker_min_ring = min_ring;
        self.config.marker_min_ring_contrast = min_contrast;
        self
    }

    /// Set the corner gate fraction.
    #[must_use]
    pub fn marker_corner_gate(mut self, gate: f64) -> Self {
        self.config.marker_corner_gate = gate;
        self
    }

    /// Set the top-marker recovery search parameters.
    #[must_use]
    pub fn recovery(mut self, window: usize, min_area: f64) -> Self {
        self.config.recovery_window = window;
        self.config.recovery_min_area = min_area;
        self
    }

    /// Set how many frames a marker survives without being seen.
    #[must_use]
    pub fn marker_max_age(mut self, age: u32) -> Self {
        self.config.marker_max_age = age;
        self
    }

    /// Set the bubble binarization block size and constant.
    #[must_use]
    pub fn bubble_threshold(mut self, block_size: usize, constant: i16) -> Self {
        self.config.bubble_block_size = block_size;
        self.config.bubble_threshold_constant = constant;
        self
    }

    /// Set the per-cell margin trim.
    #[must_use]
    pub fn bubble_cell_margin(mut self, margin: f64) -> Self {
        self.config.bubble_cell_margin = margin;
        self
    }

    /// Set the fill threshold.
    #[must_use]
    pub fn fill_threshold(mut self, threshold: f64) -> Self {
        self.config.fill_threshold = threshold;
        self
    }

    /// Set the minimum separation between best and runner-up fill.
    #[must_use]
    pub fn min_separation(mut self, separation: f64) -> Self {
        self.config.min_separation = separation;
        self
    }

    /// Set the guessing penalty divisor.
    #[must_use]
    pub fn penalty_divisor(mut self, divisor: f64) -> Self {
        self.config.penalty_divisor = divisor;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> ScanConfig {
        self.config.normalized()
    }
}

// ============================================================================
// Sheet layout: named regions in normalized coordinates
// ============================================================================

/// How marks inside a region are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum RegionKind {
    /// Rows are questions, columns are options labelled from `first_option`.
    Grid {
        /// Label of the first column, e.g. `'A'`.
        first_option: char,
    },
    /// A single mark among the rows, labelled from `first_symbol` (e.g. a digit column).
    SingleColumn {
        /// Label of the first row, e.g. `'0'`.
        first_symbol: char,
    },
}

impl RegionKind {
    /// A grid with options `A`, `B`, ...
    pub const LETTERED: RegionKind = RegionKind::Grid { first_option: 'A' };
    /// A grid whose options are digits.
    pub const NUMERIC_GRID: RegionKind = RegionKind::Grid { first_option: '0' };
    /// A digit column.
    pub const DIGIT: RegionKind = RegionKind::SingleColumn { first_symbol: '0' };
}

/// An axis-aligned rectangle in normalized (0-1) sheet coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NormRect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub w: f64,
    /// Height.
    pub h: f64,
}

impl NormRect {
    /// Construct from `x, y, w, h`.
    #[must_use]
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Convert to a pixel rectangle `(x, y, w, h)` clipped to a `width x height` image.
    ///
    /// Returns `None` when nothing of the rectangle remains inside the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn to_pixels(&self, width: usize, height: usize) -> Option<PixelRect> {
        let x0 = (self.x * width as f64).floor().max(0.0);
        let y0 = (self.y * height as f64).floor().max(0.0);
        let x1 = ((self.x + self.w) * width as f64).floor().min(width as f64);
        let y1 = ((self.y + self.h) * height as f64).floor().min(height as f64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect {
            x: x0 as usize,
            y: y0 as usize,
            width: (x1 - x0) as usize,
            height: (y1 - y0) as usize,
        })
    }
}

/// A rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    /// Left edge.
    pub x: usize,
    /// Top edge.
    pub y: usize,
    /// Width.
    pub width: usize,
    /// Height.
    pub height: usize,
}

/// A named region of the answer sheet.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionDefinition {
    /// Region name; for answer regions this is the subject name used by the key.
    pub name: String,
    /// Location in normalized rectified-sheet coordinates.
    pub rect: NormRect,
    /// Number of rows (questions, or symbols of a single column).
    pub rows: usize,
    /// Number of columns (options); `1` for a single column.
    pub cols: usize,
    /// Interpretation of the marks.
    pub kind: RegionKind,
}

impl RegionDefinition {
    /// Construct and validate a region.
    pub fn new(
        name: impl Into<String>,
        rect: NormRect,
        rows: usize,
        cols: usize,
        kind: RegionKind,
    ) -> Result<Self, ScanError> {
        let region = Self {
            name: name.into(),
            rect,
            rows,
            cols,
            kind,
        };
        region.validate()?;
        Ok(region)
    }

    /// Check the structural invariants of the region.
    ///
    /// Rectangles reaching past the sheet are accepted here and clipped when
    /// read; only rectangles that cannot describe any area are rejected.
    pub fn validate(&self) -> Result<(), ScanError> {
        let invalid = |reason: &str| ScanError::InvalidRegion {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        let r = self.rect;
        if ![r.x, r.y, r.w, r.h].iter().all(|v| v.is_finite()) {
            return Err(invalid("rectangle must be finite"));
        }
        if r.w <= 0.0 || r.h <= 0.0 {
            return Err(invalid("rectangle must have positive size"));
        }
        if !(0.0..1.0).contains(&r.x) || !(0.0..1.0).contains(&r.y) {
            return Err(invalid("rectangle origin must lie inside the unit square"));
        }
        if self.rows == 0 || self.cols == 0 {
            return Err(invalid("rows and columns must be positive"));
        }
        let (first, count) = match self.kind {
            RegionKind::Grid { first_option } => (first_option, self.cols),
            RegionKind::SingleColumn { first_symbol } => (first_symbol, self.rows),
        };
        let last = u32::try_from(count - 1).ok().and_then(|n| (first as u32).checked_add(n));
        if last.and_then(char::from_u32).is_none() {
            return Err(invalid("labels run past the valid character range"));
        }
        Ok(())
    }

    /// Rectangle clipped to the unit square.
    #[must_use]
    pub fn clipped_rect(&self) -> NormRect {
        let r = self.rect;
        let x1 = (r.x + r.w).min(1.0);
        let y1 = (r.y + r.h).min(1.0);
        NormRect::new(r.x, r.y, x1 - r.x, y1 - r.y)
    }
}

/// The full list of regions of one sheet template.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SheetLayout {
    /// Regions in reading order.
    pub regions: Vec<RegionDefinition>,
}

impl SheetLayout {
    /// Build a layout, validating every region and name uniqueness.
    pub fn new(regions: Vec<RegionDefinition>) -> Result<Self, ScanError> {
        let layout = Self { regions };
        layout.validate()?;
        Ok(layout)
    }

    /// Validate every region and reject duplicate names.
    pub fn validate(&self) -> Result<(), ScanError> {
        let mut seen = std::collections::HashSet::new();
        for region in &self.regions {
            region.validate()?;
            if !seen.insert(region.name.as_str()) {
                return Err(ScanError::DuplicateRegion(region.name.clone()));
            }
        }
        Ok(())
    }

    /// Look up a region by name.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<&RegionDefinition> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Load a layout from JSON and validate it.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let layout: Self = serde_json::from_str(json).map_err(|e| ScanError::Parse {
            what: "sheet layout",
            message: e.to_string(),
        })?;
        layout.validate()?;
        Ok(layout)
    }

    /// Serialize the layout to pretty-printed JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string_pretty(self).map_err(|e| ScanError::Parse {
            what: "sheet layout",
            message: e.to_string(),
        })
    }

    /// The reference sheet template: identity fields plus six 20-question subjects.
    ///
    /// The English column extends slightly past the right edge of the sheet
    /// and is clipped when read.
    #[must_use]
    pub fn standard() -> Self {
        let region = |name: &str, rect: [f64; 4], rows, cols, kind| RegionDefinition {
            name: name.to_string(),
            rect: NormRect::new(rect[0], rect[1], rect[2], rect[3]),
            rows,
            cols,
            kind,
        };
        Self {
            regions: vec![
                region("national_id", [0.000, 0.245, 0.273, 0.213], 11, 10, RegionKind::NUMERIC_GRID),
                region("student_number", [0.279, 0.245, 0.136, 0.210], 10, 10, RegionKind::NUMERIC_GRID),
                region("full_name", [0.000, 0.459, 0.507, 0.541], 30, 12, RegionKind::LETTERED),
                region("turkish", [0.53, 0.23, 0.12, 0.37], 20, 5, RegionKind::LETTERED),
                region("social_studies", [0.65, 0.23, 0.12, 0.37], 20, 5, RegionKind::LETTERED),
                region("religion", [0.77, 0.23, 0.12, 0.37], 20, 5, RegionKind::LETTERED),
                region("english", [0.89, 0.23, 0.12, 0.37], 20, 5, RegionKind::LETTERED),
                region("mathematics", [0.64, 0.62, 0.12, 0.36], 20, 5, RegionKind::LETTERED),
                region("science", [0.76, 0.62, 0.12, 0.36], 20, 5, RegionKind::LETTERED),
            ],
        }
    }
}
