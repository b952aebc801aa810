//! Stride-aware grayscale views and owned buffers.

use crate::error::ScanError;

/// A view into an 8-bit grayscale buffer with explicit stride support.
///
/// Camera drivers frequently hand out rows padded to an alignment boundary,
/// so the view never assumes `stride == width`.
#[derive(Clone, Copy, Debug)]
pub struct ImageView<'a> {
    /// Raw pixel bytes, row-major.
    pub data: &'a [u8],
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Distance in bytes between the starts of two consecutive rows.
    pub stride: usize,
}

impl<'a> ImageView<'a> {
    /// Create a new view after validating that the buffer covers the dimensions and stride.
    pub fn new(data: &'a [u8], width: usize, height: usize, stride: usize) -> Result<Self, String> {
        if stride < width {
            return Err(format!("Stride ({stride}) cannot be less than width ({width})"));
        }
        let required_size = if height > 0 {
            (height - 1) * stride + width
        } else {
            0
        };
        if data.len() < required_size {
            return Err(format!(
                "Buffer size ({}) is too small for {width}x{height} image with stride {stride} (required: {required_size})",
                data.len(),
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            stride,
        })
    }

    /// True when the view has no pixels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Safe accessor for a specific row.
    #[inline(always)]
    #[must_use]
    pub fn get_row(&self, y: usize) -> &'a [u8] {
        assert!(y < self.height, "Row index {y} out of bounds");
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    /// Safe accessor for a specific pixel.
    #[inline(always)]
    #[must_use]
    pub fn get_pixel(&self, x: usize, y: usize) -> u8 {
        assert!(x < self.width, "Column index {x} out of bounds");
        self.get_row(y)[x]
    }

    /// Pixel accessor that clamps coordinates to the image (replicated border).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub fn get_pixel_clamped(&self, x: isize, y: isize) -> u8 {
        let cx = x.clamp(0, self.width as isize - 1) as usize;
        let cy = y.clamp(0, self.height as isize - 1) as usize;
        self.data[cy * self.stride + cx]
    }

    /// Bilinear sample at a subpixel location with replicated borders.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let ix = x0 as isize;
        let iy = y0 as isize;

        let p00 = f64::from(self.get_pixel_clamped(ix, iy));
        let p10 = f64::from(self.get_pixel_clamped(ix + 1, iy));
        let p01 = f64::from(self.get_pixel_clamped(ix, iy + 1));
        let p11 = f64::from(self.get_pixel_clamped(ix + 1, iy + 1));

        let top = p00 + (p10 - p00) * fx;
        let bottom = p01 + (p11 - p01) * fx;
        top + (bottom - top) * fy
    }

    /// Copy a rectangular window into a tightly packed buffer.
    ///
    /// The rectangle must lie inside the view.
    #[must_use]
    pub fn crop(&self, x: usize, y: usize, width: usize, height: usize) -> ImageBuf {
        assert!(x + width <= self.width && y + height <= self.height, "crop out of bounds");
        let mut data = Vec::with_capacity(width * height);
        for row in y..y + height {
            data.extend_from_slice(&self.get_row(row)[x..x + width]);
        }
        ImageBuf {
            data,
            width,
            height,
        }
    }

    /// Borrow a rectangular window without copying.
    ///
    /// The rectangle must lie inside the view.
    #[must_use]
    pub fn sub_view(&self, x: usize, y: usize, width: usize, height: usize) -> ImageView<'a> {
        assert!(x + width <= self.width && y + height <= self.height, "sub-view out of bounds");
        let start = y * self.stride + x;
        ImageView {
            data: &self.data[start..],
            width,
            height,
            stride: self.stride,
        }
    }

    /// Sum of intensities over `[x0, x1) x [y0, y1)`, clipped to the view.
    #[must_use]
    pub fn sum_in_rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return 0;
        }
        (y0..y1)
            .map(|y| self.get_row(y)[x0..x1].iter().map(|&p| u64::from(p)).sum::<u64>())
            .sum()
    }

    /// Mean intensity over a rectangle (clipped to the view).
    #[must_use]
    pub fn mean_in_rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> f64 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return 0.0;
        }
        self.sum_in_rect(x0, y0, x1, y1) as f64 / ((x1 - x0) * (y1 - y0)) as f64
    }
}

/// An owned, tightly packed 8-bit grayscale image.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageBuf {
    /// Pixel bytes, row-major with `stride == width`.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
}

impl ImageBuf {
    /// Allocate a buffer filled with `value`.
    #[must_use]
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            data: vec![value; width * height],
            width,
            height,
        }
    }

    /// Wrap an existing packed buffer.
    pub fn from_vec(data: Vec<u8>, width: usize, height: usize) -> Result<Self, ScanError> {
        if data.len() != width * height {
            return Err(ScanError::InvalidImage(format!(
                "expected {} bytes for {width}x{height}, got {}",
                width * height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Convert an interleaved 8-bit buffer with 1, 3 (RGB) or 4 (RGBA) channels to gray.
    ///
    /// Uses the ITU-R BT.601 luma weights, in fixed point.
    pub fn from_interleaved(
        data: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Self, ScanError> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(ScanError::InvalidImage(format!(
                "unsupported channel count {channels}"
            )));
        }
        if data.len() < width * height * channels {
            return Err(ScanError::InvalidImage(format!(
                "buffer of {} bytes is too small for {width}x{height}x{channels}",
                data.len()
            )));
        }
        if channels == 1 {
            return Self::from_vec(data[..width * height].to_vec(), width, height);
        }
        let gray = data
            .chunks_exact(channels)
            .take(width * height)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect();
        Self::from_vec(gray, width, height)
    }

    /// Convert any decoded [`image::DynamicImage`] into a grayscale buffer.
    #[must_use]
    pub fn from_dynamic(img: &image::DynamicImage) -> Self {
        let luma = img.to_luma8();
        let (w, h) = luma.dimensions();
        Self {
            data: luma.into_raw(),
            width: w as usize,
            height: h as usize,
        }
    }

    /// Borrow the buffer as a view.
    #[must_use]
    pub fn view(&self) -> ImageView<'_> {
        ImageView {
            data: &self.data,
            width: self.width,
            height: self.height,
            stride: self.width,
        }
    }

    /// Mutable row accessor.
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.width;
        &mut self.data[start..start + self.width]
    }

    /// Write a pixel, ignoring out-of-bounds coordinates.
    pub fn put(&mut self, x: isize, y: isize, value: u8) {
        if x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height {
            self.data[y as usize * self.width + x as usize] = value;
        }
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    // 0.299, 0.587, 0.114 scaled by 2^14
    let y = 4899 * u32::from(r) + 9617 * u32::from(g) + 1868 * u32::from(b);
    ((y + (1 << 13)) >> 14) as u8
}
