//! Contain-fit geometry: placing a source raster inside a destination box
//! while preserving aspect ratio, centered, with letterbox offsets.
//!
//! This is the single shared transform for the whole capture cycle — the
//! renderer and the landmark overlay both consume the same value, so the
//! captured pixels and the overlay can never drift apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum GeometryError {
    #[error("invalid dimensions: {src_w}x{src_h} into {dst_w}x{dst_h}")]
    InvalidDimensions {
        src_w: f32,
        src_h: f32,
        dst_w: f32,
        dst_h: f32,
    },
}

/// Placement of a source raster inside a destination box under contain fit.
///
/// Invariants: `draw_width / draw_height == src_w / src_h`, the drawn
/// rectangle lies fully inside the destination box, and the same `scale`
/// applies to both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainTransform {
    pub scale: f32,
    pub draw_width: f32,
    pub draw_height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl ContainTransform {
    /// Map a point from source-pixel space to destination space.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale + self.offset_x, y * self.scale + self.offset_y)
    }

    /// Map a point from destination space back to source-pixel space.
    pub fn unproject(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.offset_x) / self.scale, (y - self.offset_y) / self.scale)
    }
}

/// Compute how a `src_w` x `src_h` raster fits inside a `dst_w` x `dst_h`
/// box with "object-fit: contain" semantics.
///
/// Scale is `min(dst_w / src_w, dst_h / src_h)`; the drawn rectangle is
/// centered on both axes. When the aspect ratios are equal the fit is exact
/// with zero offsets.
///
/// Fails fast on zero or non-finite inputs instead of propagating NaN
/// geometry — camera switches can briefly report 0x0 video dimensions, and
/// the caller is expected to skip that cycle and retry on the next frame.
pub fn compute_contain(
    src_w: f32,
    src_h: f32,
    dst_w: f32,
    dst_h: f32,
) -> Result<ContainTransform, GeometryError> {
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !valid(src_w) || !valid(src_h) || !valid(dst_w) || !valid(dst_h) {
        return Err(GeometryError::InvalidDimensions {
            src_w,
            src_h,
            dst_w,
            dst_h,
        });
    }

    let scale = (dst_w / src_w).min(dst_h / src_h);
    let draw_width = src_w * scale;
    let draw_height = src_h * scale;

    Ok(ContainTransform {
        scale,
        draw_width,
        draw_height,
        offset_x: (dst_w - draw_width) / 2.0,
        offset_y: (dst_h - draw_height) / 2.0,
    })
}
