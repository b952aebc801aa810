//! Core scanning logic for the Markscan answer-sheet reader.
//!
//! Markscan turns camera frames of a printed answer sheet into per-question
//! marks and scores.
//!
//! # Architecture Overview
//!
//! One frame flows through four stages:
//!
//! 1. **Paper location** ([`quad::locate_paper`]):
//!    - Gaussian blur, Canny edges, closing and dilation.
//!    - Union-Find labeling of the edge map, boundary tracing and polygon
//!      simplification; the largest convex quadrilateral wins.
//!
//! 2. **Rectification** ([`homography::rectify`]):
//!    - 4-point DLT homography onto a fixed-size sheet, bilinear warp.
//!
//! 3. **Marker tracking** ([`marker::MarkerTracker`]):
//!    - CLAHE, adaptive thresholding and ruling-line removal.
//!    - Per-corner blob scoring, top-marker recovery, cross-frame memory and
//!      parallelogram completion.
//!
//! 4. **Bubble reading** ([`bubble::read_regions`]):
//!    - Per-region binarization, fill ratios and the empty / selected / multi
//!      classification.
//!
//! Scoring against an answer key ([`scoring::AnswerScorer`]) is a separate,
//! image-free step.
//!
//! # Example
//!
//! ```
//! use markscan_core::{Scanner, config::{ScanConfig, SheetLayout}};
//! use markscan_core::error::FrameError;
//! use markscan_core::image::ImageView;
//! use markscan_core::marker::MarkerTracker;
//!
//! let config = ScanConfig::builder().fill_threshold(0.3).build();
//! let mut scanner = Scanner::new(config, SheetLayout::standard()).unwrap();
//! let mut tracker = MarkerTracker::from_config(scanner.config());
//!
//! // A featureless frame contains no sheet.
//! # let pixels = vec![128u8; 64 * 64];
//! # let frame = ImageView::new(&pixels, 64, 64, 64).unwrap();
//! let result = scanner.scan_frame(&frame, &mut tracker);
//! assert_eq!(result.unwrap_err(), FrameError::PaperNotFound);
//! ```

/// Bubble fill measurement and classification.
pub mod bubble;
/// Configuration types for the scanning pipeline.
pub mod config;
/// Error types.
pub mod error;
/// Blurring and local contrast equalization.
pub mod filter;
/// Gradient computation and edge detection.
pub mod gradient;
/// Homographies and perspective warping.
pub mod homography;
/// Image buffer abstractions.
pub mod image;
/// Corner marker detection and tracking.
pub mod marker;
/// Rectangular morphology.
pub mod morphology;
/// Quad extraction and geometric primitives.
pub mod quad;
/// Answer keys and scoring.
pub mod scoring;
/// Connected components labeling using Union-Find.
pub mod segmentation;
/// Utilities for testing and synthetic data generation.
pub mod test_utils;
/// Adaptive and global thresholding.
pub mod threshold;

pub use crate::bubble::{BubbleReading, MarkOutcome, RegionReading};
pub use crate::config::{RegionDefinition, RegionKind, ScanConfig, SheetLayout};
pub use crate::error::{FrameError, ScanError};
pub use crate::homography::Rectification;
pub use crate::image::{ImageBuf, ImageView};
pub use crate::marker::{MarkerReport, MarkerTracker};
pub use crate::quad::{Point, Quad};
pub use crate::scoring::{AnswerKey, AnswerScorer, ScoreReport};
use bumpalo::Bump;
use std::collections::BTreeMap;

/// Lowest fill threshold accepted at runtime.
pub const MIN_FILL_THRESHOLD: f64 = 0.05;
/// Highest fill threshold accepted at runtime.
pub const MAX_FILL_THRESHOLD: f64 = 1.0;

/// Timings and counters of one [`Scanner::scan_frame`] call.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    /// Time spent locating the paper in milliseconds.
    pub locate_ms: f64,
    /// Time spent computing the homography and warping in milliseconds.
    pub rectify_ms: f64,
    /// Time spent detecting and tracking markers in milliseconds.
    pub markers_ms: f64,
    /// Time spent reading bubble regions in milliseconds.
    pub read_ms: f64,
    /// Total pipeline time in milliseconds.
    pub total_ms: f64,
    /// Area of the located paper quad in frame pixels.
    pub paper_area: f64,
    /// Markers found in this frame (not remembered or completed).
    pub markers_detected: usize,
    /// Regions that produced readings.
    pub regions_read: usize,
}

/// Everything extracted from one frame.
#[derive(Clone, Debug)]
pub struct FrameResult {
    /// Paper outline in frame coordinates, TL, TR, BR, BL.
    pub quad: Quad,
    /// Rectified sheet and the homographies in both directions.
    pub rectification: Rectification,
    /// Corner markers after memory and completion.
    pub markers: MarkerReport,
    /// Region readings in layout order; regions without pixels are omitted.
    pub regions: Vec<RegionReading>,
    /// Pipeline statistics.
    pub stats: PipelineStats,
}

impl FrameResult {
    /// Reading of one region.
    #[must_use]
    pub fn region(&self, name: &str) -> Option<&RegionReading> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Mark strings keyed by region name.
    #[must_use]
    pub fn mark_strings(&self) -> BTreeMap<String, String> {
        self.regions
            .iter()
            .map(|r| (r.name.clone(), r.mark_string()))
            .collect()
    }
}

/// The main entry point for scanning answer sheets.
///
/// The scanner holds the configuration, the sheet layout and a scratch arena
/// reused across frames. Marker memory lives in a caller-owned
/// [`MarkerTracker`], one per camera stream.
pub struct Scanner {
    arena: Bump,
    config: ScanConfig,
    layout: SheetLayout,
}

impl Default for Scanner {
    fn default() -> Self {
        Self {
            arena: Bump::new(),
            config: ScanConfig::default(),
            layout: SheetLayout::standard(),
        }
    }
}

impl Scanner {
    /// Create a scanner, validating the layout.
    pub fn new(config: ScanConfig, layout: SheetLayout) -> Result<Self, ScanError> {
        layout.validate()?;
        Ok(Self {
            arena: Bump::new(),
            config: config.normalized(),
            layout,
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Sheet layout being read.
    #[must_use]
    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    /// Adjust the fill threshold, clamped to
    /// [`MIN_FILL_THRESHOLD`]..=[`MAX_FILL_THRESHOLD`]. NaN is ignored.
    pub fn set_fill_threshold(&mut self, threshold: f64) {
        if threshold.is_nan() {
            return;
        }
        self.config.fill_threshold = threshold.clamp(MIN_FILL_THRESHOLD, MAX_FILL_THRESHOLD);
    }

    /// Read the layout's regions from an already rectified sheet.
    #[must_use]
    pub fn read_sheet(&self, rectified: &ImageView) -> Vec<RegionReading> {
        bubble::read_regions(rectified, &self.layout, &self.config)
    }

    /// Run the full pipeline on one frame.
    ///
    /// The tracker is only updated when the paper is found. Marker problems
    /// never fail the frame; they show up in [`FrameResult::markers`].
    pub fn scan_frame(&mut self, frame: &ImageView, tracker: &mut MarkerTracker) -> Result<FrameResult, FrameError> {
        let mut stats = PipelineStats::default();
        let start_total = std::time::Instant::now();
        if frame.is_empty() {
            return Err(FrameError::EmptyFrame);
        }
        self.arena.reset();

        let start = std::time::Instant::now();
        let paper = {
            let _span = tracing::info_span!("locate_paper").entered();
            quad::locate_paper(&self.arena, frame, &self.config)
        };
        stats.locate_ms = start.elapsed().as_secs_f64() * 1000.0;
        let Some(paper) = paper else {
            tracing::debug!(width = frame.width, height = frame.height, "paper not found");
            return Err(FrameError::PaperNotFound);
        };
        stats.paper_area = paper.area;

        let start = std::time::Instant::now();
        let rectification = {
            let _span = tracing::info_span!("rectify").entered();
            homography::rectify(frame, &paper.quad, self.config.warp_width, self.config.warp_height)?
        };
        stats.rectify_ms = start.elapsed().as_secs_f64() * 1000.0;

        let start = std::time::Instant::now();
        let markers = {
            let _span = tracing::info_span!("track_markers").entered();
            tracker.track(&rectification.image.view(), &self.config, &rectification.sheet_to_frame)
        };
        stats.markers_ms = start.elapsed().as_secs_f64() * 1000.0;
        stats.markers_detected = markers.detected_count();

        let start = std::time::Instant::now();
        let regions = {
            let _span = tracing::info_span!("read_regions", regions = self.layout.regions.len()).entered();
            self.read_sheet(&rectification.image.view())
        };
        stats.read_ms = start.elapsed().as_secs_f64() * 1000.0;
        stats.regions_read = regions.len();

        stats.total_ms = start_total.elapsed().as_secs_f64() * 1000.0;
        Ok(FrameResult {
            quad: paper.quad,
            rectification,
            markers,
            regions,
            stats,
        })
    }
}
