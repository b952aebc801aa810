//! Bubble grid reading.
//!
//! Each region of the layout is cropped from the rectified sheet, binarized
//! so that pen and pencil marks become foreground, and split into equal
//! cells. A cell's *fill ratio* is its foreground fraction after trimming a
//! margin on every side, which keeps printed outlines and small alignment
//! errors out of the measurement.

use crate::config::{RegionDefinition, RegionKind, ScanConfig, SheetLayout};
use crate::image::{ImageBuf, ImageView};
use crate::threshold::AdaptiveThreshold;
use crate::{filter, morphology};
use rayon::prelude::*;

/// Classification of one question row (or a whole single-column region).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MarkOutcome {
    /// Exactly one clearly dominant mark.
    Selected(char),
    /// No mark reached the fill threshold.
    Empty,
    /// More than one mark, or no clear winner.
    Multi,
}

impl MarkOutcome {
    /// Character used in mark strings: the option, `-` for empty, `X` for multi.
    #[must_use]
    pub fn symbol(self) -> char {
        match self {
            MarkOutcome::Selected(c) => c,
            MarkOutcome::Empty => '-',
            MarkOutcome::Multi => 'X',
        }
    }

    /// Inverse of [`Self::symbol`].
    #[must_use]
    pub fn from_symbol(c: char) -> Self {
        match c {
            '-' => MarkOutcome::Empty,
            'X' => MarkOutcome::Multi,
            other => MarkOutcome::Selected(other),
        }
    }

    /// The selected option, if any.
    #[must_use]
    pub fn selected(self) -> Option<char> {
        match self {
            MarkOutcome::Selected(c) => Some(c),
            _ => None,
        }
    }
}

/// One classified row.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BubbleReading {
    /// Zero-based question index within the region.
    pub index: usize,
    /// Classification.
    pub outcome: MarkOutcome,
    /// Highest fill ratio, in [0, 1].
    pub confidence: f64,
    /// Second-highest fill ratio (0 when there is none).
    pub runner_up: f64,
    /// Fill ratio of every cell that took part.
    pub fill_ratios: Vec<f64>,
}

/// All readings of one region.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionReading {
    /// Region name.
    pub name: String,
    /// Region kind.
    pub kind: RegionKind,
    /// One reading per question (grids) or exactly one (single columns).
    pub readings: Vec<BubbleReading>,
}

impl RegionReading {
    /// Outcomes in question order.
    #[must_use]
    pub fn marks(&self) -> Vec<MarkOutcome> {
        self.readings.iter().map(|r| r.outcome).collect()
    }

    /// Comma-separated marks, e.g. `"A,C,-,X"`.
    #[must_use]
    pub fn mark_string(&self) -> String {
        format_marks(&self.marks())
    }
}

/// Render outcomes as a comma-separated mark string.
#[must_use]
pub fn format_marks(marks: &[MarkOutcome]) -> String {
    let mut out = String::with_capacity(marks.len() * 2);
    for (i, m) in marks.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push(m.symbol());
    }
    out
}

/// Parse a comma-separated mark string. Blank items count as empty.
#[must_use]
pub fn parse_marks(s: &str) -> Vec<MarkOutcome> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    s.split(',')
        .map(|item| item.trim().chars().next().map_or(MarkOutcome::Empty, MarkOutcome::from_symbol))
        .collect()
}

/// Thresholds of the classification policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillPolicy {
    /// Fill ratio at or above which a cell counts as marked.
    pub fill_threshold: f64,
    /// Minimum best minus runner-up gap for a grid selection.
    pub min_separation: f64,
}

impl FillPolicy {
    /// Policy from the scan configuration.
    #[must_use]
    pub fn from_config(config: &ScanConfig) -> Self {
        Self {
            fill_threshold: config.fill_threshold,
            min_separation: config.min_separation,
        }
    }
}

/// Classify one set of fill ratios.
///
/// For grids, the cells are the options of a question:
/// - best below the threshold is `Empty`;
/// - a gap to the runner-up below the minimum separation, or more than one
///   cell at or above the threshold, is `Multi`;
/// - otherwise the best column's option is selected.
///
/// For single columns, the cells are the rows: the best row at or above the
/// threshold is selected, anything else is `Empty`.
///
/// Returns the outcome with the best and runner-up fill ratios.
#[must_use]
pub fn classify(fills: &[f64], kind: RegionKind, policy: &FillPolicy) -> (MarkOutcome, f64, f64) {
    let mut best_idx = 0usize;
    let mut best = -1.0f64;
    let mut second = -1.0f64;
    let mut above = 0usize;
    for (i, &f) in fills.iter().enumerate() {
        if f > best {
            second = best;
            best = f;
            best_idx = i;
        } else if f > second {
            second = f;
        }
        if f >= policy.fill_threshold {
            above += 1;
        }
    }
    let confidence = best.max(0.0);
    let runner_up = second.max(0.0);

    if best < policy.fill_threshold {
        return (MarkOutcome::Empty, confidence, runner_up);
    }
    let outcome = match kind {
        RegionKind::Grid { first_option } => {
            if best - runner_up < policy.min_separation || above > 1 {
                MarkOutcome::Multi
            } else {
                offset_label(first_option, best_idx)
            }
        }
        RegionKind::SingleColumn { first_symbol } => offset_label(first_symbol, best_idx),
    };
    (outcome, confidence, runner_up)
}

#[allow(clippy::cast_possible_truncation)]
fn offset_label(first: char, offset: usize) -> MarkOutcome {
    char::from_u32(first as u32 + offset as u32).map_or(MarkOutcome::Multi, MarkOutcome::Selected)
}

/// Foreground fraction of a cell after trimming `margin` of its size on every side.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn fill_ratio(binary: &ImageView, x: usize, y: usize, width: usize, height: usize, margin: f64) -> f64 {
    if width == 0 || height == 0 {
        return 0.0;
    }
    let mx = ((width as f64 * margin) as usize).max(1);
    let my = ((height as f64 * margin) as usize).max(1);
    let iw = width.saturating_sub(2 * mx).max(1);
    let ih = height.saturating_sub(2 * my).max(1);
    let x0 = (x + mx).min(binary.width.saturating_sub(1));
    let y0 = (y + my).min(binary.height.saturating_sub(1));
    let x1 = (x0 + iw).min(binary.width);
    let y1 = (y0 + ih).min(binary.height);
    if x1 <= x0 || y1 <= y0 {
        return 0.0;
    }
    let mut on = 0usize;
    for yy in y0..y1 {
        on += binary.get_row(yy)[x0..x1].iter().filter(|&&p| p != 0).count();
    }
    on as f64 / ((x1 - x0) * (y1 - y0)) as f64
}

/// Binarize a cropped region: median 3x3, Gaussian 3x3, inverse adaptive
/// mean threshold, then a 3x3 opening and closing.
#[must_use]
pub fn binarize_region(region: &ImageView, config: &ScanConfig) -> ImageBuf {
    let denoised = filter::median_blur_3x3(region);
    let smoothed = filter::gaussian_blur(&denoised.view(), 3, 0.0);
    let binary = AdaptiveThreshold::for_bubbles(config).apply(&smoothed.view());
    let opened = morphology::open(&binary.view(), 3, 3);
    morphology::close(&opened.view(), 3, 3)
}

/// Read one region of the rectified sheet.
///
/// Returns `None`, with a warning, when the definition is invalid or the
/// region clipped to the image has fewer pixels than grid cells.
#[must_use]
pub fn read_region(sheet: &ImageView, region: &RegionDefinition, config: &ScanConfig) -> Option<RegionReading> {
    if let Err(err) = region.validate() {
        tracing::warn!(region = %region.name, %err, "invalid region skipped");
        return None;
    }
    let Some(rect) = region.clipped_rect().to_pixels(sheet.width, sheet.height) else {
        tracing::warn!(region = %region.name, "region covers no pixels of the sheet, skipped");
        return None;
    };
    let min_width = match region.kind {
        RegionKind::Grid { .. } => region.cols,
        RegionKind::SingleColumn { .. } => 1,
    };
    if rect.width < min_width || rect.height < region.rows {
        tracing::warn!(
            region = %region.name,
            width = rect.width,
            height = rect.height,
            "region has fewer pixels than cells, skipped"
        );
        return None;
    }
    let crop = sheet.sub_view(rect.x, rect.y, rect.width, rect.height);
    let binary = binarize_region(&crop, config);
    let bin = binary.view();
    let policy = FillPolicy::from_config(config);
    let margin = config.bubble_cell_margin;

    let rows = region.rows;
    let cell_h = rect.height / rows;

    let readings = match region.kind {
        RegionKind::Grid { .. } => {
            let cols = region.cols;
            let cell_w = rect.width / cols;
            (0..rows)
                .map(|r| {
                    let fills: Vec<f64> = (0..cols)
                        .map(|c| fill_ratio(&bin, c * cell_w, r * cell_h, cell_w, cell_h, margin))
                        .collect();
                    let (outcome, confidence, runner_up) = classify(&fills, region.kind, &policy);
                    BubbleReading {
                        index: r,
                        outcome,
                        confidence,
                        runner_up,
                        fill_ratios: fills,
                    }
                })
                .collect()
        }
        RegionKind::SingleColumn { .. } => {
            let fills: Vec<f64> = (0..rows)
                .map(|r| fill_ratio(&bin, 0, r * cell_h, rect.width, cell_h, margin))
                .collect();
            let (outcome, confidence, runner_up) = classify(&fills, region.kind, &policy);
            vec![BubbleReading {
                index: 0,
                outcome,
                confidence,
                runner_up,
                fill_ratios: fills,
            }]
        }
    };

    Some(RegionReading {
        name: region.name.clone(),
        kind: region.kind,
        readings,
    })
}

/// Read every region of a layout in layout order. Regions that
/// [`read_region`] rejects are left out.
#[must_use]
pub fn read_regions(sheet: &ImageView, layout: &SheetLayout, config: &ScanConfig) -> Vec<RegionReading> {
    layout
        .regions
        .par_iter()
        .filter_map(|region| read_region(sheet, region, config))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::NormRect;
    use crate::test_utils::{SheetSpec, render_sheet};

    const GRID: RegionKind = RegionKind::LETTERED;

    fn policy() -> FillPolicy {
        FillPolicy::from_config(&ScanConfig::default())
    }

    #[test]
    fn test_clear_single_mark() {
        let (outcome, conf, second) = classify(&[0.05, 0.62, 0.04, 0.0], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Selected('B'));
        assert!((conf - 0.62).abs() < 1e-12);
        assert!((second - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_two_marks_are_multi() {
        let (outcome, _, _) = classify(&[0.55, 0.5, 0.0, 0.0], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Multi);
        // Far apart but both above threshold: still multi
        let (outcome, _, _) = classify(&[0.9, 0.3, 0.0, 0.0], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Multi);
    }

    #[test]
    fn test_close_runner_up_below_threshold_is_multi() {
        let (outcome, _, _) = classify(&[0.3, 0.25, 0.0], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Multi);
    }

    #[test]
    fn test_all_empty_row() {
        let (outcome, conf, second) = classify(&[0.0; 5], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Empty);
        assert_eq!((conf, second), (0.0, 0.0));
        let (outcome, _, _) = classify(&[], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Empty);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let (outcome, _, _) = classify(&[0.28, 0.0], GRID, &policy());
        assert_eq!(outcome, MarkOutcome::Selected('A'));
    }

    #[test]
    fn test_single_column_ignores_separation() {
        let digits = RegionKind::DIGIT;
        let (outcome, _, _) = classify(&[0.0, 0.0, 0.0, 0.5, 0.45], digits, &policy());
        assert_eq!(outcome, MarkOutcome::Selected('3'));
        let (outcome, _, _) = classify(&[0.1, 0.2], digits, &policy());
        assert_eq!(outcome, MarkOutcome::Empty);
    }

    #[test]
    fn test_mark_strings() {
        let marks = vec![MarkOutcome::Selected('A'), MarkOutcome::Empty, MarkOutcome::Multi];
        assert_eq!(format_marks(&marks), "A,-,X");
        assert_eq!(parse_marks("A,-,X"), marks);
        assert_eq!(parse_marks(" B , ,C"), vec![MarkOutcome::Selected('B'), MarkOutcome::Empty, MarkOutcome::Selected('C')]);
        assert!(parse_marks("").is_empty());
    }

    #[test]
    fn test_fill_ratio_margin() {
        // 10x10 cell whose outer 2-pixel border is ink and interior is paper
        let mut buf = ImageBuf::filled(10, 10, 0);
        for y in 0..10 {
            for x in 0..10 {
                if x < 2 || x >= 8 || y < 2 || y >= 8 {
                    buf.row_mut(y)[x] = 255;
                }
            }
        }
        assert_eq!(fill_ratio(&buf.view(), 0, 0, 10, 10, 0.2), 0.0);
        // A zero margin still trims one pixel, leaving an 8x8 window with a 1px ink ring
        assert!((fill_ratio(&buf.view(), 0, 0, 10, 10, 0.0) - 28.0 / 64.0).abs() < 1e-12);
        assert_eq!(fill_ratio(&buf.view(), 0, 0, 0, 10, 0.2), 0.0);
    }

    #[test]
    fn test_read_rendered_regions() {
        let spec = SheetSpec::default();
        let answers = spec.sample_answers();
        let sheet = render_sheet(&spec, &answers);
        let config = spec.config();
        let readings = read_regions(&sheet.view(), &spec.layout(), &config);
        assert_eq!(readings.len(), spec.layout().regions.len());
        for (reading, expected) in readings.iter().zip(spec.expected_mark_strings(&answers)) {
            assert_eq!(reading.mark_string(), expected, "region {}", reading.name);
        }
    }

    #[test]
    fn test_region_without_pixels_is_skipped() {
        let sheet = ImageBuf::filled(100, 100, 235);
        let region = RegionDefinition {
            name: "sliver".into(),
            rect: NormRect::new(0.5, 0.5, 0.001, 0.2),
            rows: 2,
            cols: 2,
            kind: GRID,
        };
        assert!(read_region(&sheet.view(), &region, &ScanConfig::default()).is_none());
        let layout = SheetLayout { regions: vec![region] };
        assert!(read_regions(&sheet.view(), &layout, &ScanConfig::default()).is_empty());
    }

    #[test]
    fn test_unvalidated_zero_rows_is_skipped() {
        let sheet = ImageBuf::filled(100, 100, 235);
        let region = RegionDefinition {
            name: "no_rows".into(),
            rect: NormRect::new(0.1, 0.1, 0.5, 0.5),
            rows: 0,
            cols: 4,
            kind: GRID,
        };
        assert!(read_region(&sheet.view(), &region, &ScanConfig::default()).is_none());
        let no_cols = RegionDefinition { cols: 0, rows: 3, ..region.clone() };
        let layout = SheetLayout { regions: vec![region, no_cols] };
        assert!(read_regions(&sheet.view(), &layout, &ScanConfig::default()).is_empty());
    }

    #[test]
    fn test_region_smaller_than_its_grid_is_skipped() {
        // 4 px wide but 5 options, 10 px tall but 20 questions.
        let sheet = ImageBuf::filled(100, 100, 235);
        let narrow = RegionDefinition::new("narrow", NormRect::new(0.2, 0.2, 0.04, 0.5), 4, 5, GRID).unwrap();
        let short = RegionDefinition::new("short", NormRect::new(0.2, 0.2, 0.5, 0.1), 20, 4, GRID).unwrap();
        let digit = RegionDefinition::new("digit", NormRect::new(0.2, 0.2, 0.02, 0.5), 10, 1, RegionKind::DIGIT).unwrap();
        for region in [&narrow, &short] {
            assert!(read_region(&sheet.view(), region, &ScanConfig::default()).is_none());
        }
        // A single column needs no width per option.
        assert!(read_region(&sheet.view(), &digit, &ScanConfig::default()).is_some());
    }

    #[test]
    fn test_blank_region_reads_empty() {
        let sheet = ImageBuf::filled(200, 200, 235);
        let region = RegionDefinition::new("blank", NormRect::new(0.1, 0.1, 0.5, 0.5), 4, 5, GRID).unwrap();
        let reading = read_region(&sheet.view(), &region, &ScanConfig::default()).unwrap();
        assert_eq!(reading.mark_string(), "-,-,-,-");
    }
}
