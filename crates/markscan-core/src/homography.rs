//! Planar homographies and perspective rectification.

use crate::error::FrameError;
use crate::image::{ImageBuf, ImageView};
use crate::quad::{Point, Quad};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;

/// A 3x3 Homography matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    /// The 3x3 homography matrix, normalized so that `h[(2, 2)] == 1` when built from pairs.
    pub h: Matrix3<f64>,
}

impl Homography {
    /// The identity mapping.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            h: Matrix3::identity(),
        }
    }

    /// Compute homography from 4 source points to 4 destination points using DLT.
    ///
    /// Returns `None` when the correspondences are degenerate (collinear
    /// points or a singular system).
    #[must_use]
    pub fn from_pairs(src: &[Point; 4], dst: &[Point; 4]) -> Option<Self> {
        if has_collinear_triple(src) || has_collinear_triple(dst) {
            return None;
        }
        // With h[8] fixed to 1 the 8 equations form a square system
        let mut m = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let (sx, sy) = (src[i].x, src[i].y);
            let (dx, dy) = (dst[i].x, dst[i].y);

            m[(i * 2, 0)] = -sx;
            m[(i * 2, 1)] = -sy;
            m[(i * 2, 2)] = -1.0;
            m[(i * 2, 6)] = sx * dx;
            m[(i * 2, 7)] = sy * dx;
            b[i * 2] = -dx;

            m[(i * 2 + 1, 3)] = -sx;
            m[(i * 2 + 1, 4)] = -sy;
            m[(i * 2 + 1, 5)] = -1.0;
            m[(i * 2 + 1, 6)] = sx * dy;
            m[(i * 2 + 1, 7)] = sy * dy;
            b[i * 2 + 1] = -dy;
        }

        let h_vec = m.lu().solve(&b)?;
        let h = Matrix3::new(
            h_vec[0], h_vec[1], h_vec[2], //
            h_vec[3], h_vec[4], h_vec[5], //
            h_vec[6], h_vec[7], 1.0,
        );
        let homography = Self { h };
        homography.is_well_conditioned().then_some(homography)
    }

    fn is_well_conditioned(&self) -> bool {
        self.h.iter().all(|v| v.is_finite()) && self.h.determinant().abs() > 1e-12
    }

    /// The reverse mapping.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let inv = self.h.try_inverse()?;
        let homography = Self { h: inv };
        homography.is_well_conditioned().then_some(homography)
    }

    /// Project a point using the homography.
    ///
    /// Points mapped to infinity come back non-finite; see [`Self::try_project`].
    #[must_use]
    pub fn project(&self, p: Point) -> Point {
        let res = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = res[2];
        Point::new(res[0] / w, res[1] / w)
    }

    /// Project a point, returning `None` if it lands on the line at infinity.
    #[must_use]
    pub fn try_project(&self, p: Point) -> Option<Point> {
        let res = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = res[2];
        (w.abs() > 1e-12).then(|| Point::new(res[0] / w, res[1] / w))
    }
}

fn has_collinear_triple(pts: &[Point; 4]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(i, j, k)| {
        let (a, b, c) = (pts[i], pts[j], pts[k]);
        ((b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)).abs() < 1e-9
    })
}

/// Resample `img` into a `width x height` image.
///
/// `dst_to_src` maps output pixel coordinates back into the source; samples
/// are bilinear with replicated borders.
#[must_use]
pub fn warp_perspective(img: &ImageView, dst_to_src: &Homography, width: usize, height: usize) -> ImageBuf {
    let mut out = ImageBuf::filled(width, height, 0);
    if img.is_empty() || width == 0 {
        return out;
    }
    let h = dst_to_src.h;
    out.data.par_chunks_mut(width).enumerate().for_each(|(y, row)| {
        #[allow(clippy::cast_precision_loss)]
        let fy = y as f64;
        for (x, d) in row.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let fx = x as f64;
            let w = h[(2, 0)] * fx + h[(2, 1)] * fy + h[(2, 2)];
            if w.abs() < 1e-12 {
                continue;
            }
            let sx = (h[(0, 0)] * fx + h[(0, 1)] * fy + h[(0, 2)]) / w;
            let sy = (h[(1, 0)] * fx + h[(1, 1)] * fy + h[(1, 2)]) / w;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                *d = (img.sample_bilinear(sx, sy) + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

/// A frame mapped onto the canonical sheet rectangle.
#[derive(Clone, Debug)]
pub struct Rectification {
    /// Frame to sheet mapping.
    pub frame_to_sheet: Homography,
    /// Sheet to frame mapping.
    pub sheet_to_frame: Homography,
    /// The rectified sheet image.
    pub image: ImageBuf,
}

/// Target corners of a `width x height` rectified sheet, in TL, TR, BR, BL order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sheet_corners(width: usize, height: usize) -> [Point; 4] {
    let w = width.saturating_sub(1) as f64;
    let h = height.saturating_sub(1) as f64;
    [
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ]
}

/// Map the quadrilateral of `img` onto a `width x height` rectangle.
pub fn rectify(img: &ImageView, quad: &Quad, width: usize, height: usize) -> Result<Rectification, FrameError> {
    let frame_to_sheet = Homography::from_pairs(&quad.corners, &sheet_corners(width, height))
        .ok_or(FrameError::DegenerateTransform)?;
    let sheet_to_frame = frame_to_sheet.inverse().ok_or(FrameError::DegenerateTransform)?;
    let image = warp_perspective(img, &sheet_to_frame, width, height);
    Ok(Rectification {
        frame_to_sheet,
        sheet_to_frame,
        image,
    })
}
