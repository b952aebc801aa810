//! Rectangular-kernel grayscale morphology.
//!
//! Pixels outside the image never take part in the min/max, so erosion does
//! not eat in from the border and dilation does not grow from it.

use crate::image::{ImageBuf, ImageView};
use multiversion::multiversion;
use rayon::prelude::*;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Op {
    Min,
    Max,
}

impl Op {
    #[inline]
    fn apply(self, a: u8, b: u8) -> u8 {
        match self {
            Op::Min => a.min(b),
            Op::Max => a.max(b),
        }
    }

    fn identity(self) -> u8 {
        match self {
            Op::Min => u8::MAX,
            Op::Max => 0,
        }
    }
}

fn rank_filter(img: &ImageView, kw: usize, kh: usize, op: Op) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let mut out = ImageBuf::filled(w, h, 0);
    if img.is_empty() {
        return out;
    }
    let (rx, ry) = (kw.max(1) / 2, kh.max(1) / 2);
    let (kw, kh) = (kw.max(1), kh.max(1));

    // Horizontal pass
    let mut temp = vec![0u8; w * h];
    temp.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let src = img.get_row(y);
        for (x, d) in dst.iter_mut().enumerate() {
            let x0 = x.saturating_sub(rx);
            let x1 = (x + kw - rx).min(w);
            *d = src[x0..x1].iter().fold(op.identity(), |acc, &p| op.apply(acc, p));
        }
    });

    // Vertical pass
    out.data.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let y0 = y.saturating_sub(ry);
        let y1 = (y + kh - ry).min(h);
        dst.fill(op.identity());
        for sy in y0..y1 {
            combine_row(dst, &temp[sy * w..(sy + 1) * w], op);
        }
    });
    out
}

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn combine_row(acc: &mut [u8], src: &[u8], op: Op) {
    match op {
        Op::Min => {
            for (a, &s) in acc.iter_mut().zip(src) {
                *a = (*a).min(s);
            }
        }
        Op::Max => {
            for (a, &s) in acc.iter_mut().zip(src) {
                *a = (*a).max(s);
            }
        }
    }
}

/// Erode with a `kw x kh` rectangle.
#[must_use]
pub fn erode(img: &ImageView, kw: usize, kh: usize) -> ImageBuf {
    rank_filter(img, kw, kh, Op::Min)
}

/// Dilate with a `kw x kh` rectangle.
#[must_use]
pub fn dilate(img: &ImageView, kw: usize, kh: usize) -> ImageBuf {
    rank_filter(img, kw, kh, Op::Max)
}

/// Erosion followed by dilation; removes features smaller than the kernel.
#[must_use]
pub fn open(img: &ImageView, kw: usize, kh: usize) -> ImageBuf {
    dilate(&erode(img, kw, kh).view(), kw, kh)
}

/// Dilation followed by erosion; fills gaps smaller than the kernel.
#[must_use]
pub fn close(img: &ImageView, kw: usize, kh: usize) -> ImageBuf {
    erode(&dilate(img, kw, kh).view(), kw, kh)
}

/// `a = a - b`, saturating at zero.
pub fn subtract_in_place(a: &mut ImageBuf, b: &ImageBuf) {
    debug_assert_eq!(a.data.len(), b.data.len());
    for (x, &y) in a.data.iter_mut().zip(&b.data) {
        *x = x.saturating_sub(y);
    }
}
