//! The capture surface: the one mutable canvas of the pipeline.
//!
//! Rendering and encoding both target this buffer, and the two must never
//! interleave — a render pass is opened, drawn, and finished before the
//! surface may be encoded. The pass guard makes that ordering explicit
//! instead of relying on call-site discipline around a shared canvas.

use crate::source::Frame;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use snapfit_core::geometry::ContainTransform;
use snapfit_core::landmarks::{Feature, LandmarkSet};
use thiserror::Error;

/// Opaque background fill — letterbox bars are white, never transparent or
/// stale pixels from a previous frame.
const BACKGROUND: [u8; 3] = [255, 255, 255];

/// Capture-time JPEG quality, before budget compression.
pub const CAPTURE_QUALITY: f32 = 0.95;

const BOX_COLOR: [u8; 3] = [255, 0, 0];
const BOX_STROKE: u32 = 2;

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("render context unavailable: {0}")]
    ContextUnavailable(String),
    #[error("render in flight; surface cannot be encoded")]
    RenderInFlight,
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("encode failed: {0}")]
    EncodeFailed(String),
}

/// Fixed-size RGB canvas that frames are rendered into and encoded from.
pub struct CaptureSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    render_open: bool,
}

impl CaptureSurface {
    /// Create a surface. Zero dimensions mean no drawable context exists;
    /// the capture attempt must fail rather than encode a blank canvas.
    pub fn new(width: u32, height: u32) -> Result<Self, SurfaceError> {
        if width == 0 || height == 0 {
            return Err(SurfaceError::ContextUnavailable(format!(
                "{width}x{height} surface"
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize * 3],
            render_open: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGB value at (x, y), for inspection.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }

    /// Open a render pass. An earlier pass abandoned without `finish` is
    /// discarded; the new pass starts from a clean slate.
    pub fn begin_render(&mut self) -> RenderPass<'_> {
        self.render_open = true;
        RenderPass { surface: self }
    }

    /// Encode the surface as JPEG at the given quality.
    ///
    /// Refuses while a render pass is open or was abandoned mid-draw — the
    /// buffer contents are not a completed capture.
    pub fn to_jpeg(&self, quality: f32) -> Result<Vec<u8>, SurfaceError> {
        if self.render_open {
            return Err(SurfaceError::RenderInFlight);
        }
        let mut buffer = Vec::new();
        let percent = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
        let encoder = JpegEncoder::new_with_quality(&mut buffer, percent);
        encoder
            .write_image(&self.pixels, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| SurfaceError::EncodeFailed(e.to_string()))?;
        Ok(buffer)
    }

    fn set_pixel(&mut self, x: i64, y: i64, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&color);
    }
}

/// Exclusive drawing pass over a [`CaptureSurface`].
///
/// Dropping a pass without calling [`finish`](RenderPass::finish) leaves the
/// surface flagged as mid-render, and encoding stays refused until the next
/// pass completes.
pub struct RenderPass<'a> {
    surface: &'a mut CaptureSurface,
}

impl RenderPass<'_> {
    /// Fill the background and draw the frame scaled and offset per the
    /// transform, sampling bilinearly.
    pub fn draw_frame(
        &mut self,
        frame: &Frame,
        transform: &ContainTransform,
    ) -> Result<(), SurfaceError> {
        let expected = frame.width as usize * frame.height as usize * 3;
        if frame.width == 0 || frame.height == 0 || frame.data.len() < expected {
            return Err(SurfaceError::InvalidFrame(format!(
                "{}x{} frame with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            )));
        }

        for px in self.surface.pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&BACKGROUND);
        }

        let dst_w = self.surface.width;
        let dst_h = self.surface.height;
        let x_start = transform.offset_x.floor().max(0.0) as u32;
        let y_start = transform.offset_y.floor().max(0.0) as u32;
        let x_end = ((transform.offset_x + transform.draw_width).ceil() as u32).min(dst_w);
        let y_end = ((transform.offset_y + transform.draw_height).ceil() as u32).min(dst_h);

        for dy in y_start..y_end {
            for dx in x_start..x_end {
                // Map the destination pixel center back into source space.
                let (sx, sy) = transform.unproject(dx as f32 + 0.5, dy as f32 + 0.5);
                let color = sample_bilinear(frame, sx - 0.5, sy - 0.5);
                let i = (dy as usize * dst_w as usize + dx as usize) * 3;
                self.surface.pixels[i..i + 3].copy_from_slice(&color);
            }
        }
        Ok(())
    }

    /// Draw a landmark overlay already projected into destination space.
    /// An empty set draws nothing.
    pub fn draw_overlay(&mut self, landmarks: &LandmarkSet) {
        if landmarks.is_empty() {
            return;
        }

        if let Some(b) = landmarks.bounds {
            self.stroke_rect(b.x, b.y, b.width, b.height);
        }

        // Groups iterate jaw-first so the finer features draw on top.
        for (feature, points) in landmarks.groups() {
            let (color, radius) = feature_style(feature);
            for p in points {
                self.fill_circle(p.x, p.y, radius, color);
            }
        }
    }

    /// Complete the pass; the surface becomes encodable again.
    pub fn finish(self) {
        self.surface.render_open = false;
    }

    fn stroke_rect(&mut self, x: f32, y: f32, w: f32, h: f32) {
        let x0 = x.round() as i64;
        let y0 = y.round() as i64;
        let x1 = (x + w).round() as i64;
        let y1 = (y + h).round() as i64;
        let t = BOX_STROKE as i64;

        for band in 0..t {
            for px in x0..=x1 {
                self.surface.set_pixel(px, y0 + band, BOX_COLOR);
                self.surface.set_pixel(px, y1 - band, BOX_COLOR);
            }
            for py in y0..=y1 {
                self.surface.set_pixel(x0 + band, py, BOX_COLOR);
                self.surface.set_pixel(x1 - band, py, BOX_COLOR);
            }
        }
    }

    fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: [u8; 3]) {
        let r = radius.max(0.5);
        let x0 = (cx - r).floor() as i64;
        let x1 = (cx + r).ceil() as i64;
        let y0 = (cy - r).floor() as i64;
        let y1 = (cy + r).ceil() as i64;
        for py in y0..=y1 {
            for px in x0..=x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r * r {
                    self.surface.set_pixel(px, py, color);
                }
            }
        }
    }
}

/// Overlay color and dot radius per feature group. Cosmetic contract only.
fn feature_style(feature: Feature) -> ([u8; 3], f32) {
    match feature {
        Feature::Jaw => ([255, 165, 0], 1.0),
        Feature::LeftEye | Feature::RightEye => ([0, 0, 255], 1.5),
        Feature::LeftBrow | Feature::RightBrow => ([128, 0, 128], 1.5),
        Feature::Nose => ([0, 128, 0], 1.5),
        Feature::Mouth => ([255, 0, 128], 1.5),
    }
}

/// Bilinear sample with edge clamping.
fn sample_bilinear(frame: &Frame, x: f32, y: f32) -> [u8; 3] {
    let max_x = frame.width as i64 - 1;
    let max_y = frame.height as i64 - 1;

    let x0 = (x.floor() as i64).clamp(0, max_x);
    let y0 = (y.floor() as i64).clamp(0, max_y);
    let x1 = (x0 + 1).min(max_x);
    let y1 = (y0 + 1).min(max_y);
    let fx = (x - x.floor()).clamp(0.0, 1.0);
    let fy = (y - y.floor()).clamp(0.0, 1.0);

    let tl = frame.pixel(x0 as u32, y0 as u32);
    let tr = frame.pixel(x1 as u32, y0 as u32);
    let bl = frame.pixel(x0 as u32, y1 as u32);
    let br = frame.pixel(x1 as u32, y1 as u32);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bot = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}
