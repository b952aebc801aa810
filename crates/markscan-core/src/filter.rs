//! Smoothing and contrast filters.
//!
//! All filters replicate the border pixel and return a freshly allocated,
//! tightly packed [`ImageBuf`]. Row passes run in parallel with `rayon`; the
//! inner row kernels are compiled for several SIMD targets.

use crate::image::{ImageBuf, ImageView};
use multiversion::multiversion;
use rayon::prelude::*;

/// Build a normalized 1D Gaussian kernel.
///
/// A non-positive `sigma` is derived from the kernel size the way most vision
/// libraries do: `0.3 * ((ksize - 1) / 2 - 1) + 0.8`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_kernel(ksize: usize, sigma: f32) -> Vec<f32> {
    let ksize = ksize.max(1) | 1;
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        0.3 * ((ksize as f32 - 1.0) * 0.5 - 1.0) + 0.8
    };
    let radius = (ksize / 2) as f32;
    let mut kernel: Vec<f32> = (0..ksize)
        .map(|i| {
            let d = i as f32 - radius;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with a square `ksize x ksize` kernel.
#[must_use]
pub fn gaussian_blur(img: &ImageView, ksize: usize, sigma: f32) -> ImageBuf {
    let kernel = gaussian_kernel(ksize, sigma);
    separable_filter(img, &kernel)
}

/// Convolve rows then columns with the same 1D kernel.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn separable_filter(img: &ImageView, kernel: &[f32]) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let mut out = ImageBuf::filled(w, h, 0);
    if img.is_empty() {
        return out;
    }
    let radius = kernel.len() / 2;

    // Pass 1: horizontal
    let mut temp = vec![0.0f32; w * h];
    temp.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        convolve_row(img.get_row(y), dst, kernel);
    });

    // Pass 2: vertical, one output row at a time
    out.data.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let mut acc = vec![0.0f32; w];
        for (k, &weight) in kernel.iter().enumerate() {
            let sy = (y + k).saturating_sub(radius).min(h - 1);
            accumulate_row(&mut acc, &temp[sy * w..(sy + 1) * w], weight);
        }
        for (d, a) in dst.iter_mut().zip(&acc) {
            *d = (a + 0.5).clamp(0.0, 255.0) as u8;
        }
    });
    out
}

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn convolve_row(src: &[u8], dst: &mut [f32], kernel: &[f32]) {
    let w = src.len();
    let radius = kernel.len() / 2;
    for (x, d) in dst.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for (k, &weight) in kernel.iter().enumerate() {
            let sx = (x + k).saturating_sub(radius).min(w - 1);
            acc += f32::from(src[sx]) * weight;
        }
        *d = acc;
    }
}

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
fn accumulate_row(acc: &mut [f32], src: &[f32], weight: f32) {
    for (a, &s) in acc.iter_mut().zip(src) {
        *a += s * weight;
    }
}

/// 3x3 median filter.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn median_blur_3x3(img: &ImageView) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let mut out = ImageBuf::filled(w, h, 0);
    if img.is_empty() {
        return out;
    }
    out.data.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let mut window = [0u8; 9];
        for (x, d) in dst.iter_mut().enumerate() {
            let mut i = 0;
            for dy in -1..=1isize {
                for dx in -1..=1isize {
                    window[i] = img.get_pixel_clamped(x as isize + dx, y as isize + dy);
                    i += 1;
                }
            }
            window.sort_unstable();
            *d = window[4];
        }
    });
    out
}

/// Contrast-limited adaptive histogram equalization.
///
/// The image is split into `tiles x tiles` regions. Each region's histogram is
/// clipped at `clip_limit` times the mean bin height, the excess spread over
/// all bins, and the resulting equalization curves are bilinearly
/// interpolated between tile centers.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn clahe(img: &ImageView, clip_limit: f32, tiles: usize) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let mut out = ImageBuf::filled(w, h, 0);
    if img.is_empty() {
        return out;
    }
    let tiles_x = tiles.clamp(1, w);
    let tiles_y = tiles.clamp(1, h);

    let bounds = |i: usize, n: usize, len: usize| (i * len / n, (i + 1) * len / n);

    let luts: Vec<[u8; 256]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|t| {
            let (tx, ty) = (t % tiles_x, t / tiles_x);
            let (x0, x1) = bounds(tx, tiles_x, w);
            let (y0, y1) = bounds(ty, tiles_y, h);
            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &p in &img.get_row(y)[x0..x1] {
                    hist[p as usize] += 1;
                }
            }
            let area = ((x1 - x0) * (y1 - y0)) as u32;
            clip_histogram(&mut hist, clip_limit, area);
            let scale = 255.0 / area as f32;
            let mut lut = [0u8; 256];
            let mut cdf = 0u32;
            for (v, &count) in hist.iter().enumerate() {
                cdf += count;
                lut[v] = (cdf as f32 * scale + 0.5).min(255.0) as u8;
            }
            lut
        })
        .collect();

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;
    let locate = |pos: usize, size: f32, n: usize| {
        let f = ((pos as f32 + 0.5) / size - 0.5).max(0.0);
        let i1 = (f as usize).min(n - 1);
        let i2 = (i1 + 1).min(n - 1);
        (i1, i2, (f - i1 as f32).min(1.0))
    };

    out.data.par_chunks_mut(w).enumerate().for_each(|(y, dst)| {
        let (ty1, ty2, ay) = locate(y, tile_h, tiles_y);
        let src = img.get_row(y);
        for (x, d) in dst.iter_mut().enumerate() {
            let (tx1, tx2, ax) = locate(x, tile_w, tiles_x);
            let v = src[x] as usize;
            let p11 = f32::from(luts[ty1 * tiles_x + tx1][v]);
            let p12 = f32::from(luts[ty1 * tiles_x + tx2][v]);
            let p21 = f32::from(luts[ty2 * tiles_x + tx1][v]);
            let p22 = f32::from(luts[ty2 * tiles_x + tx2][v]);
            let top = p11 + (p12 - p11) * ax;
            let bottom = p21 + (p22 - p21) * ax;
            *d = (top + (bottom - top) * ay + 0.5).clamp(0.0, 255.0) as u8;
        }
    });
    out
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clip_histogram(hist: &mut [u32; 256], clip_limit: f32, area: u32) {
    if clip_limit <= 0.0 {
        return;
    }
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let batch = excess / 256;
    let residual = excess % 256;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (256 / residual).max(1) as usize;
        for bin in hist.iter_mut().step_by(step).take(residual as usize) {
            *bin += 1;
        }
    }
}
