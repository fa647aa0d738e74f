//! Cross-platform screenshot capture using xcap, plus the coordinate
//! arithmetic that keeps OCR-space, window-space and screen-space points
//! consistent on HiDPI displays.

use std::sync::Mutex;

use image::RgbaImage;
use xcap::Monitor;

use crate::error::{Result, ResolveError};
use crate::types::Rect;

/// Source of screen pixels. The resolver only talks to this trait so tests
/// can substitute synthetic frames for a live display.
pub trait ScreenSource: Send + Sync {
    /// Physical-to-logical pixel ratio (Retina = 2.0, normal = 1.0).
    fn scale_factor(&self) -> f64;

    /// Logical screen size as the window manager reports it.
    fn logical_size(&self) -> Result<(u32, u32)>;

    /// Full-screen capture at native (physical) resolution.
    fn capture(&self) -> Result<RgbaImage>;

    /// Capture a region given in logical screen coordinates; scaled to
    /// framebuffer coordinates internally.
    fn capture_region(&self, region: Rect) -> Result<RgbaImage>;
}

/// Live capture backed by the primary monitor.
pub struct ScreenCapture {
    // Detected once per session on first use; comparing a raw capture's
    // pixel width against the reported logical width.
    scale: Mutex<Option<f64>>,
}

impl ScreenCapture {
    pub fn new() -> Self {
        Self {
            scale: Mutex::new(None),
        }
    }

    fn primary() -> Result<Monitor> {
        let monitors = Monitor::all()
            .map_err(|e| ResolveError::CaptureFailed(format!("failed to list monitors: {e}")))?;
        monitors
            .into_iter()
            .find(|m| m.is_primary())
            .ok_or_else(|| ResolveError::CaptureFailed("no primary monitor".into()))
    }

    fn detect_scale(&self) -> Result<f64> {
        if let Some(scale) = *self.scale.lock().unwrap() {
            return Ok(scale);
        }

        let monitor = Self::primary()?;
        let logical_width = monitor.width().max(1);
        let frame = monitor
            .capture_image()
            .map_err(|e| ResolveError::CaptureFailed(format!("probe capture failed: {e}")))?;

        let scale = compute_scale(frame.width(), logical_width);
        *self.scale.lock().unwrap() = Some(scale);
        tracing::debug!(scale, "display scale factor detected");
        Ok(scale)
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSource for ScreenCapture {
    fn scale_factor(&self) -> f64 {
        self.detect_scale().unwrap_or(1.0)
    }

    fn logical_size(&self) -> Result<(u32, u32)> {
        let monitor = Self::primary()?;
        Ok((monitor.width(), monitor.height()))
    }

    fn capture(&self) -> Result<RgbaImage> {
        let monitor = Self::primary()?;
        monitor
            .capture_image()
            .map_err(|e| ResolveError::CaptureFailed(format!("screen capture failed: {e}")))
    }

    fn capture_region(&self, region: Rect) -> Result<RgbaImage> {
        if region.is_degenerate() {
            return Err(ResolveError::CaptureFailed(format!(
                "degenerate capture region {region:?}"
            )));
        }

        let scale = self.detect_scale()?;
        let frame = self.capture()?;
        Ok(crop_scaled(&frame, region, scale))
    }
}

/// Physical / logical width ratio; >1 implies HiDPI.
pub fn compute_scale(frame_width: u32, logical_width: u32) -> f64 {
    if frame_width > logical_width {
        frame_width as f64 / logical_width as f64
    } else {
        1.0
    }
}

/// Crop a logical-coordinate region out of a physical-resolution frame.
pub fn crop_scaled(frame: &RgbaImage, region: Rect, scale: f64) -> RgbaImage {
    let x = ((region.x.max(0) as f64) * scale) as u32;
    let y = ((region.y.max(0) as f64) * scale) as u32;
    let w = ((region.w as f64) * scale) as u32;
    let h = ((region.h as f64) * scale) as u32;

    let x = x.min(frame.width().saturating_sub(1));
    let y = y.min(frame.height().saturating_sub(1));
    let w = w.min(frame.width() - x).max(1);
    let h = h.min(frame.height() - y).max(1);

    image::imageops::crop_imm(frame, x, y, w, h).to_image()
}

/// Convert a point relative to a captured window's origin into absolute
/// screen coordinates.
pub fn window_to_screen(window_origin: (i32, i32), x: i32, y: i32) -> (i32, i32) {
    (window_origin.0 + x, window_origin.1 + y)
}

/// Inverse of [`window_to_screen`].
pub fn screen_to_window(window_origin: (i32, i32), x: i32, y: i32) -> (i32, i32) {
    (x - window_origin.0, y - window_origin.1)
}

/// Map an OCR-space point (framebuffer pixels of a possibly-cropped
/// capture) to absolute logical screen coordinates: divide by the display
/// scale, then offset by the crop origin.
pub fn ocr_to_screen(x: i32, y: i32, scale: f64, crop_origin: (i32, i32)) -> (i32, i32) {
    (
        (x as f64 / scale) as i32 + crop_origin.0,
        (y as f64 / scale) as i32 + crop_origin.1,
    )
}

/// Encode a capture as base64 PNG for callers that ship frames elsewhere.
pub fn image_to_base64(image: &RgbaImage) -> Result<String> {
    use base64::Engine;
    use image::ImageEncoder;
    use std::io::Cursor;

    let mut buffer = Cursor::new(Vec::new());
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| ResolveError::CaptureFailed(format!("failed to encode PNG: {e}")))?;

    Ok(base64::engine::general_purpose::STANDARD.encode(buffer.into_inner()))
}
