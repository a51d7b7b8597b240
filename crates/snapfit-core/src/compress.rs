//! Adaptive size-budget compression.
//!
//! Re-encodes an image as JPEG with geometrically decaying quality until the
//! output fits a byte budget. Geometric decay trades optimality for a small,
//! predictable number of re-encodes; a binary search would find a tighter
//! quality but costs more encode passes on the happy path.

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, RgbImage, RgbaImage};
use thiserror::Error;

/// Default upload budget in megabytes.
const DEFAULT_MAX_SIZE_MB: f64 = 5.0;

/// Hard bound on re-encode attempts.
const MAX_ATTEMPTS: u32 = 10;

/// Per-attempt quality multiplier. The decay runs unclamped through the
/// attempt ceiling.
const QUALITY_DECAY: f32 = 0.8;

/// Quality of the forced final encode once the attempt ceiling is hit.
const FLOOR_QUALITY: f32 = 0.5;

/// Oversized sources are downscaled to fit these caps before the quality
/// search, preserving aspect ratio.
const MAX_WIDTH: u32 = 1920;
const MAX_HEIGHT: u32 = 1080;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum CompressError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
    #[error("image dimensions are zero")]
    ZeroDimensions,
    #[error("quality must be within (0, 1], got {0}")]
    InvalidQuality(f32),
}

/// Result of a budget-targeted compression.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Encoded JPEG bytes.
    pub data: Vec<u8>,
    /// Quality factor of the final encode (1.0 when the input was returned
    /// unchanged).
    pub quality: f32,
    /// Size of `data` in megabytes.
    pub size_mb: f64,
    /// Number of encodes performed (0 when short-circuited; the forced
    /// final encode at the ceiling counts as one more attempt).
    pub attempts: u32,
    /// Whether the byte budget was met. `false` means the forced
    /// floor-quality encode is being returned still over budget.
    pub reached_budget: bool,
}

/// Budget-targeted JPEG compressor.
///
/// The input bytes are never mutated; every attempt produces a fresh encode.
#[derive(Debug, Clone)]
pub struct Compressor {
    max_size_mb: f64,
    initial_quality: Option<f32>,
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor {
    pub fn new() -> Self {
        Self {
            max_size_mb: DEFAULT_MAX_SIZE_MB,
            initial_quality: None,
        }
    }

    /// Set the size budget in megabytes (default: 5.0).
    pub fn max_size_mb(mut self, mb: f64) -> Self {
        self.max_size_mb = mb;
        self
    }

    /// Pin the starting quality instead of deriving it from the input size.
    pub fn initial_quality(mut self, quality: f32) -> Self {
        self.initial_quality = Some(quality);
        self
    }

    /// The configured size budget in megabytes.
    pub fn budget_mb(&self) -> f64 {
        self.max_size_mb
    }

    /// Compress encoded image bytes (JPEG, PNG, or WebP) to fit the budget.
    ///
    /// A JPEG input already within budget is returned byte-identical — no
    /// redundant re-encode, no generation loss, and therefore idempotent.
    pub fn compress(&self, input: &[u8]) -> Result<FitOutcome, CompressError> {
        if let Some(q) = self.initial_quality {
            if !(0.0..=1.0).contains(&q) || q == 0.0 {
                return Err(CompressError::InvalidQuality(q));
            }
        }

        let format =
            image::guess_format(input).map_err(|e| CompressError::Decode(e.to_string()))?;
        let input_mb = input.len() as f64 / BYTES_PER_MB;

        if format == ImageFormat::Jpeg && input_mb <= self.max_size_mb {
            tracing::debug!(size_mb = input_mb, "input already within budget, passing through");
            return Ok(FitOutcome {
                data: input.to_vec(),
                quality: 1.0,
                size_mb: input_mb,
                attempts: 0,
                reached_budget: true,
            });
        }

        let decoded =
            image::load_from_memory(input).map_err(|e| CompressError::Decode(e.to_string()))?;
        if decoded.width() == 0 || decoded.height() == 0 {
            return Err(CompressError::ZeroDimensions);
        }

        let bounded = downscale_to_cap(&decoded);
        let rgb = flatten_alpha(&bounded);

        let mut quality = self
            .initial_quality
            .unwrap_or_else(|| initial_quality_for(input_mb));

        for attempt in 1..=MAX_ATTEMPTS {
            let data = encode_jpeg(&rgb, quality)?;
            let size_mb = data.len() as f64 / BYTES_PER_MB;
            tracing::debug!(attempt, quality, size_mb, "encode attempt");

            if size_mb <= self.max_size_mb {
                return Ok(FitOutcome {
                    data,
                    quality,
                    size_mb,
                    attempts: attempt,
                    reached_budget: true,
                });
            }

            quality = next_quality(quality);
        }

        // Ceiling hit: one forced final encode at the floor quality,
        // shipped whether or not it fits.
        let data = encode_jpeg(&rgb, FLOOR_QUALITY)?;
        let size_mb = data.len() as f64 / BYTES_PER_MB;
        let reached_budget = size_mb <= self.max_size_mb;
        if !reached_budget {
            tracing::warn!(
                size_mb,
                budget_mb = self.max_size_mb,
                "budget unreachable, returning floor-quality result"
            );
        }
        Ok(FitOutcome {
            data,
            quality: FLOOR_QUALITY,
            size_mb,
            attempts: MAX_ATTEMPTS + 1,
            reached_budget,
        })
    }
}

/// Starting quality inversely scaled to the original size: larger originals
/// start lower to shorten convergence.
pub(crate) fn initial_quality_for(size_mb: f64) -> f32 {
    if size_mb > 10.0 {
        0.7
    } else if size_mb > 5.0 {
        0.8
    } else {
        0.9
    }
}

/// Next quality in the decay sequence. Unclamped: the search keeps probing
/// below the floor until the attempt ceiling.
pub(crate) fn next_quality(quality: f32) -> f32 {
    quality * QUALITY_DECAY
}

/// Downscale to fit within `MAX_WIDTH` x `MAX_HEIGHT`, preserving aspect.
/// Images already within the caps are returned as-is.
fn downscale_to_cap(image: &DynamicImage) -> DynamicImage {
    let (w, h) = (image.width(), image.height());
    if w <= MAX_WIDTH && h <= MAX_HEIGHT {
        return image.clone();
    }
    let resized = image.resize(MAX_WIDTH, MAX_HEIGHT, FilterType::Lanczos3);
    tracing::debug!(
        from_w = w,
        from_h = h,
        to_w = resized.width(),
        to_h = resized.height(),
        "downscaled oversized source"
    );
    resized
}

/// Flatten any alpha channel by compositing onto an opaque white background.
/// JPEG has no alpha; letterboxed captures must not turn black.
fn flatten_alpha(image: &DynamicImage) -> RgbImage {
    if image.color().has_alpha() {
        let rgba: RgbaImage = image.to_rgba8();
        let (width, height) = (rgba.width(), rgba.height());
        let mut rgb = RgbImage::new(width, height);
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let [r, g, b, a] = pixel.0;
            let alpha = a as f32 / 255.0;
            let inv = 1.0 - alpha;
            rgb.put_pixel(
                x,
                y,
                image::Rgb([
                    (r as f32 * alpha + 255.0 * inv).round() as u8,
                    (g as f32 * alpha + 255.0 * inv).round() as u8,
                    (b as f32 * alpha + 255.0 * inv).round() as u8,
                ]),
            );
        }
        rgb
    } else {
        image.to_rgb8()
    }
}

fn encode_jpeg(rgb: &RgbImage, quality: f32) -> Result<Vec<u8>, CompressError> {
    let mut buffer = Vec::new();
    let percent = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let encoder = JpegEncoder::new_with_quality(&mut buffer, percent);
    encoder
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CompressError::Encode(e.to_string()))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_rgb(width: u32, height: u32) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = image::Rgb([
                (x * 255 / width.max(1)) as u8,
                (y * 255 / height.max(1)) as u8,
                128,
            ]);
        }
        img
    }

    /// Poorly compressible noise via a small LCG, deterministic across runs.
    fn noise_rgb(width: u32, height: u32) -> RgbImage {
        let mut state = 0x2545_f491u32;
        let mut next = || {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        };
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = image::Rgb([next(), next(), next()]);
        }
        img
    }

    fn to_png(img: &RgbImage) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
        encoder
            .write_image(img.as_raw(), img.width(), img.height(), ExtendedColorType::Rgb8)
            .unwrap();
        buffer
    }

    fn to_jpeg(img: &RgbImage, quality: f32) -> Vec<u8> {
        encode_jpeg(img, quality).unwrap()
    }

    #[test]
    fn test_compliant_jpeg_passes_through_unchanged() {
        let jpeg = to_jpeg(&gradient_rgb(200, 150), 0.9);
        let out = Compressor::new().compress(&jpeg).unwrap();
        assert!(out.reached_budget);
        assert_eq!(out.attempts, 0);
        assert_eq!(out.data, jpeg);
    }

    #[test]
    fn test_idempotent_on_compliant_output() {
        let png = to_png(&gradient_rgb(300, 200));
        let first = Compressor::new().compress(&png).unwrap();
        let second = Compressor::new().compress(&first.data).unwrap();
        let third = Compressor::new().compress(&second.data).unwrap();
        assert_eq!(second.data, first.data);
        assert_eq!(third.data, second.data);
    }

    #[test]
    fn test_png_is_reencoded_to_jpeg() {
        let png = to_png(&gradient_rgb(300, 200));
        let out = Compressor::new().compress(&png).unwrap();
        assert!(out.reached_budget);
        assert!(out.attempts >= 1);
        assert_eq!(out.data[0], 0xFF);
        assert_eq!(out.data[1], 0xD8);
    }

    #[test]
    fn test_tight_budget_decays_quality() {
        // Noise resists JPEG compression, forcing multiple attempts.
        let png = to_png(&noise_rgb(256, 256));
        let budget_mb = 0.02;
        let out = Compressor::new().max_size_mb(budget_mb).compress(&png).unwrap();
        if out.reached_budget {
            assert!(out.attempts <= MAX_ATTEMPTS);
            assert!(out.size_mb <= budget_mb);
            assert!(out.quality < 0.9, "expected decay below start, got {}", out.quality);
        } else {
            assert_eq!(out.attempts, MAX_ATTEMPTS + 1);
            assert!((out.quality - FLOOR_QUALITY).abs() < 1e-6);
        }
    }

    #[test]
    fn test_budget_below_half_quality_is_reachable_within_ceiling() {
        // A budget halfway between the q=0.5 and q=0.3 encodes: the decay
        // must keep probing below 0.5 instead of stopping there.
        let img = noise_rgb(256, 256);
        let at_half = to_jpeg(&img, 0.5).len();
        let at_third = to_jpeg(&img, 0.3).len();
        let budget_mb = ((at_half + at_third) / 2) as f64 / BYTES_PER_MB;

        let png = to_png(&img);
        let out = Compressor::new().max_size_mb(budget_mb).compress(&png).unwrap();
        assert!(out.reached_budget);
        assert!(out.attempts <= MAX_ATTEMPTS);
        assert!(out.size_mb <= budget_mb);
        assert!(out.quality < 0.5, "expected decay below 0.5, got {}", out.quality);
    }

    #[test]
    fn test_impossible_budget_returns_floor_result() {
        let png = to_png(&noise_rgb(200, 200));
        let out = Compressor::new().max_size_mb(1e-6).compress(&png).unwrap();
        assert!(!out.reached_budget);
        assert!((out.quality - FLOOR_QUALITY).abs() < 1e-6);
        assert_eq!(out.attempts, MAX_ATTEMPTS + 1);
        assert!(!out.data.is_empty());
    }

    #[test]
    fn test_quality_decay_is_unclamped() {
        let mut q = 0.9f32;
        for _ in 0..9 {
            let next = next_quality(q);
            assert!(next < q);
            q = next;
        }
        // Nine decays from 0.9 land well below 0.5.
        assert!(q < 0.15);
        assert!(next_quality(0.5) < 0.5);
    }

    #[test]
    fn test_initial_quality_banding() {
        assert_eq!(initial_quality_for(1.0), 0.9);
        assert_eq!(initial_quality_for(5.0), 0.9);
        assert_eq!(initial_quality_for(7.5), 0.8);
        assert_eq!(initial_quality_for(10.0), 0.8);
        assert_eq!(initial_quality_for(12.0), 0.7);
    }

    #[test]
    fn test_explicit_initial_quality_is_used() {
        let png = to_png(&gradient_rgb(100, 100));
        let out = Compressor::new().initial_quality(0.6).compress(&png).unwrap();
        assert!((out.quality - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_initial_quality_rejected() {
        let png = to_png(&gradient_rgb(10, 10));
        assert!(Compressor::new().initial_quality(0.0).compress(&png).is_err());
        assert!(Compressor::new().initial_quality(1.5).compress(&png).is_err());
        assert!(Compressor::new().initial_quality(-0.2).compress(&png).is_err());
    }

    #[test]
    fn test_garbage_input_is_a_decode_error() {
        let err = Compressor::new().compress(b"not an image").unwrap_err();
        assert!(matches!(err, CompressError::Decode(_)));
    }

    #[test]
    fn test_oversized_source_is_downscaled() {
        let png = to_png(&gradient_rgb(2400, 600));
        let out = Compressor::new().compress(&png).unwrap();
        let decoded = image::load_from_memory(&out.data).unwrap();
        assert!(decoded.width() <= MAX_WIDTH);
        assert!(decoded.height() <= MAX_HEIGHT);
        // Aspect preserved: 4:1
        let ratio = decoded.width() as f32 / decoded.height() as f32;
        assert!((ratio - 4.0).abs() < 0.05);
    }

    #[test]
    fn test_alpha_flattens_onto_white() {
        let mut rgba = RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([255, 0, 0, 0]));
        let rgb = flatten_alpha(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([255, 255, 255]));
    }

    #[test]
    fn test_opaque_pixels_survive_flatten() {
        let mut rgba = RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([40, 80, 120, 255]));
        let rgb = flatten_alpha(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([40, 80, 120]));
    }

    #[test]
    fn test_input_is_not_mutated() {
        let png = to_png(&gradient_rgb(120, 90));
        let copy = png.clone();
        let _ = Compressor::new().compress(&png).unwrap();
        assert_eq!(png, copy);
    }
}
