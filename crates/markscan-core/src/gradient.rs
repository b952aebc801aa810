//! Gradient computation for edge-based paper detection.

#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::image::{ImageBuf, ImageView};
use rayon::prelude::*;

/// Gradient data for a single pixel.
#[derive(Clone, Copy, Default, Debug)]
pub struct Gradient {
    /// Gradient in x-direction.
    pub gx: i16,
    /// Gradient in y-direction.
    pub gy: i16,
    /// L1 gradient magnitude `|gx| + |gy|`.
    pub mag: u16,
}

/// Compute Sobel gradients for the entire image with replicated borders.
/// Returns a flat array of Gradient structs.
#[must_use]
pub fn compute_sobel(img: &ImageView) -> Vec<Gradient> {
    let w = img.width;
    let h = img.height;
    let mut grads = vec![Gradient::default(); w * h];
    if img.is_empty() {
        return grads;
    }

    // Sobel kernels:
    // Gx: [-1 0 1; -2 0 2; -1 0 1]
    // Gy: [-1 -2 -1; 0 0 0; 1 2 1]
    grads.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        let y = y as isize;
        let px = |x: isize, y: isize| i16::from(img.get_pixel_clamped(x, y));
        for (x, g) in row.iter_mut().enumerate() {
            let x = x as isize;
            let p00 = px(x - 1, y - 1);
            let p10 = px(x, y - 1);
            let p20 = px(x + 1, y - 1);
            let p01 = px(x - 1, y);
            let p21 = px(x + 1, y);
            let p02 = px(x - 1, y + 1);
            let p12 = px(x, y + 1);
            let p22 = px(x + 1, y + 1);

            let gx = -p00 + p20 - 2 * p01 + 2 * p21 - p02 + p22;
            let gy = -p00 - 2 * p10 - p20 + p02 + 2 * p12 + p22;
            let mag = (gx.abs() + gy.abs()) as u16;

            *g = Gradient { gx, gy, mag };
        }
    });

    grads
}

/// Canny edge detector on the L1 Sobel magnitude.
///
/// Non-maximum suppression quantizes the gradient direction into four
/// sectors; hysteresis keeps weak pixels (`> low`) only when 8-connected to a
/// strong one (`> high`). The result holds 255 on edges, 0 elsewhere.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn canny(img: &ImageView, low: f32, high: f32) -> ImageBuf {
    let w = img.width;
    let h = img.height;
    let mut edges = ImageBuf::filled(w, h, 0);
    if img.is_empty() {
        return edges;
    }
    let (low, high) = if low > high { (high, low) } else { (low, high) };
    let grads = compute_sobel(img);
    let mag = |x: usize, y: usize| f32::from(grads[y * w + x].mag);

    // tan(22.5°) and tan(67.5°) in 15-bit fixed point
    const TAN22: i32 = 13573;
    const SHIFT: i32 = 15;

    // 0 = suppressed, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    class.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
        for (x, c) in row.iter_mut().enumerate() {
            let g = grads[y * w + x];
            let m = f32::from(g.mag);
            if m <= low {
                continue;
            }
            let ax = i32::from(g.gx).abs();
            let ay = i32::from(g.gy).abs() << SHIFT;
            let tg22 = ax * TAN22;
            let tg67 = tg22 + (ax << (SHIFT + 1));

            let neighbor = |dx: isize, dy: isize| {
                let nx = x as isize + dx;
                let ny = y as isize + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    0.0
                } else {
                    mag(nx as usize, ny as usize)
                }
            };

            let is_max = if ay < tg22 {
                m > neighbor(-1, 0) && m >= neighbor(1, 0)
            } else if ay > tg67 {
                m > neighbor(0, -1) && m >= neighbor(0, 1)
            } else {
                let s: isize = if (g.gx < 0) != (g.gy < 0) { -1 } else { 1 };
                m > neighbor(-s, -1) && m >= neighbor(s, 1)
            };
            if is_max {
                *c = if m > high { 2 } else { 1 };
            }
        }
    });

    // Hysteresis from strong seeds
    let mut stack: Vec<usize> = class
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| (c == 2).then_some(i))
        .collect();
    for &i in &stack {
        edges.data[i] = 255;
    }
    while let Some(i) = stack.pop() {
        let x = (i % w) as isize;
        let y = (i / w) as isize;
        for dy in -1..=1isize {
            for dx in -1..=1isize {
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                    continue;
                }
                let ni = ny as usize * w + nx as usize;
                if class[ni] == 1 && edges.data[ni] == 0 {
                    edges.data[ni] = 255;
                    stack.push(ni);
                }
            }
        }
    }

    edges
}
