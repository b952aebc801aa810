//! Binarization: adaptive (local mean or Gaussian) and global Otsu thresholds.
//!
//! All thresholds here are *inverse*: dark ink becomes foreground (255) and
//! paper becomes background (0).

use crate::config::ScanConfig;
use crate::filter;
use crate::image::{ImageBuf, ImageView};
use multiversion::multiversion;
use rayon::prelude::*;

/// Summed-area table with a zero row and column in front.
pub struct IntegralImage {
    sums: Vec<u32>,
    width: usize,
    height: usize,
}

impl IntegralImage {
    /// Build the table for an image.
    #[must_use]
    pub fn new(img: &ImageView) -> Self {
        let w = img.width;
        let h = img.height;
        let stride = w + 1;
        let mut sums = vec![0u32; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0u32;
            let src = img.get_row(y);
            for x in 0..w {
                row_sum += u32::from(src[x]);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self {
            sums,
            width: w,
            height: h,
        }
    }

    /// Sum over the half-open rectangle `[x0, x1) x [y0, y1)`, clipped to the image.
    #[must_use]
    pub fn rect_sum(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u32 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return 0;
        }
        let s = self.width + 1;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1]
            - self.sums[y1 * s + x0]
    }
}

/// How the local reference level is computed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdaptiveMethod {
    /// Box mean over the block.
    Mean,
    /// Gaussian-weighted mean over the block.
    Gaussian,
}

/// Inverse adaptive thresholding engine.
///
/// A pixel is foreground when `pixel <= local_level - constant`.
#[derive(Clone, Copy, Debug)]
pub struct AdaptiveThreshold {
    /// Side of the square neighborhood (odd).
    pub block_size: usize,
    /// Offset subtracted from the local level.
    pub constant: i16,
    /// Local level estimator.
    pub method: AdaptiveMethod,
}

impl AdaptiveThreshold {
    /// Engine used for registration markers.
    #[must_use]
    pub fn for_markers(config: &ScanConfig) -> Self {
        Self {
            block_size: config.marker_block_size,
            constant: config.marker_threshold_constant,
            method: AdaptiveMethod::Gaussian,
        }
    }

    /// Engine used for bubble cells.
    #[must_use]
    pub fn for_bubbles(config: &ScanConfig) -> Self {
        Self {
            block_size: config.bubble_block_size,
            constant: config.bubble_threshold_constant,
            method: AdaptiveMethod::Mean,
        }
    }

    /// Compute the local reference level of every pixel.
    #[must_use]
    pub fn local_levels(&self, img: &ImageView) -> ImageBuf {
        match self.method {
            AdaptiveMethod::Gaussian => filter::gaussian_blur(img, self.block_size, 0.0),
            AdaptiveMethod::Mean => box_mean(img, self.block_size),
        }
    }

    /// Binarize the image.
    #[must_use]
    pub fn apply(&self, img: &ImageView) -> ImageBuf {
        let w = img.width;
        let mut out = ImageBuf::filled(w, img.height, 0);
        if img.is_empty() {
            return out;
        }
        let levels = self.local_levels(img);
        let constant = self.constant;
        out.data.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
            threshold_row_inv(img.get_row(y), &levels.data[y * w..(y + 1) * w], constant, dst);
        });
        out
    }
}

/// Box mean over a `block x block` window clipped to the image.
#[allow(clippy::cast_possible_truncation)]
fn box_mean(img: &ImageView, block: usize) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let integral = IntegralImage::new(img);
    let r = block / 2;
    let mut out = ImageBuf::filled(w, h, 0);
    out.data.par_chunks_mut(w.max(1)).enumerate().for_each(|(y, dst)| {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(h);
        for (x, d) in dst.iter_mut().enumerate() {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(w);
            let count = ((x1 - x0) * (y1 - y0)) as u32;
            let sum = integral.rect_sum(x0, y0, x1, y1);
            *d = ((sum + count / 2) / count) as u8;
        }
    });
    out
}

/// Inverse threshold for a full row against per-pixel levels.
#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn threshold_row_inv(src: &[u8], levels: &[u8], constant: i16, dst: &mut [u8]) {
    for i in 0..src.len() {
        let t = i16::from(levels[i]) - constant;
        // Branchless: 0xFF when dark enough, 0x00 otherwise
        dst[i] = u8::from(i16::from(src[i]) <= t).wrapping_neg();
    }
}

/// Otsu's global threshold: the level maximizing between-class variance.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn otsu_level(img: &ImageView) -> u8 {
    let mut hist = [0u64; 256];
    for y in 0..img.height {
        for &p in img.get_row(y) {
            hist[p as usize] += 1;
        }
    }
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum_all: f64 = hist.iter().enumerate().map(|(v, &c)| v as f64 * c as f64).sum();

    let mut best = 0u8;
    let mut best_var = -1.0f64;
    let mut w0 = 0.0f64;
    let mut sum0 = 0.0f64;
    for (t, &count) in hist.iter().enumerate() {
        w0 += count as f64;
        if w0 == 0.0 {
            continue;
        }
        let w1 = total as f64 - w0;
        if w1 == 0.0 {
            break;
        }
        sum0 += t as f64 * count as f64;
        let m0 = sum0 / w0;
        let m1 = (sum_all - sum0) / w1;
        let var = w0 * w1 * (m0 - m1) * (m0 - m1);
        if var > best_var {
            best_var = var;
            best = t as u8;
        }
    }
    best
}

/// Global inverse threshold: foreground where `pixel <= level`.
#[must_use]
pub fn threshold_inv(img: &ImageView, level: u8) -> ImageBuf {
    let w = img.width;
    let mut out = ImageBuf::filled(w, img.height, 0);
    for y in 0..img.height {
        for (d, &s) in out.row_mut(y).iter_mut().zip(img.get_row(y)) {
            *d = if s <= level { 255 } else { 0 };
        }
    }
    out
}

/// Otsu inverse binarization in one step.
#[must_use]
pub fn otsu_inv(img: &ImageView) -> ImageBuf {
    threshold_inv(img, otsu_level(img))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_binarization_invariants(
            src in prop::collection::vec(0..=255u8, 16),
            level in 0..=255u8,
            constant in -20i16..20,
        ) {
            let mut dst = vec![0u8; 16];
            threshold_row_inv(&src, &[level; 16], constant, &mut dst);
            for (i, &s) in src.iter().enumerate() {
                if i16::from(s) <= i16::from(level) - constant {
                    prop_assert_eq!(dst[i], 255);
                } else {
                    prop_assert_eq!(dst[i], 0);
                }
            }
        }

        #[test]
        fn test_integral_matches_naive(
            data in prop::collection::vec(0..=255u8, 48),
            x0 in 0usize..8, y0 in 0usize..6, dx in 0usize..9, dy in 0usize..7,
        ) {
            let img = ImageView::new(&data, 8, 6, 8).unwrap();
            let ii = IntegralImage::new(&img);
            let x1 = (x0 + dx).min(8);
            let y1 = (y0 + dy).min(6);
            let mut naive = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    naive += u32::from(data[y * 8 + x]);
                }
            }
            prop_assert_eq!(ii.rect_sum(x0, y0, x1, y1), naive);
        }
    }

    fn dark_square_on_paper() -> ImageBuf {
        let mut buf = ImageBuf::filled(48, 48, 220);
        for y in 20..28 {
            for x in 20..28 {
                buf.row_mut(y)[x] = 40;
            }
        }
        buf
    }

    #[test]
    fn test_adaptive_mean_marks_ink() {
        let buf = dark_square_on_paper();
        let engine = AdaptiveThreshold {
            block_size: 21,
            constant: 7,
            method: AdaptiveMethod::Mean,
        };
        let out = engine.apply(&buf.view());
        assert_eq!(out.data[24 * 48 + 24], 255);
        assert_eq!(out.data[2 * 48 + 2], 0);
        assert_eq!(out.data[24 * 48 + 40], 0);
    }

    #[test]
    fn test_adaptive_gaussian_marks_ink() {
        let buf = dark_square_on_paper();
        let engine = AdaptiveThreshold {
            block_size: 41,
            constant: 8,
            method: AdaptiveMethod::Gaussian,
        };
        let out = engine.apply(&buf.view());
        assert_eq!(out.data[24 * 48 + 24], 255);
        assert_eq!(out.data[5 * 48 + 5], 0);
    }

    #[test]
    fn test_uniform_has_no_foreground() {
        let buf = ImageBuf::filled(30, 30, 150);
        let out = AdaptiveThreshold::for_bubbles(&ScanConfig::default()).apply(&buf.view());
        assert!(out.data.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_otsu_bimodal() {
        let mut buf = ImageBuf::filled(20, 20, 200);
        for y in 0..10 {
            for x in 0..20 {
                buf.row_mut(y)[x] = 30;
            }
        }
        let level = otsu_level(&buf.view());
        assert!((30..200).contains(&level));
        let bin = otsu_inv(&buf.view());
        assert_eq!(bin.data.iter().filter(|&&p| p == 255).count(), 200);
    }
}
