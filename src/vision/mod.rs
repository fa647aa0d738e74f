//! Vision fallback tier.
//!
//! Activated only when accessibility is unavailable, reports no usable
//! elements, or none match the requested label confidently. Works on a
//! screenshot (optionally cropped to the target window) and returns at
//! most one scored detection with screen-absolute coordinates.

pub mod color;
pub mod matcher;
pub mod ocr;

use image::RgbaImage;

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::screenshot::ocr_to_screen;
use crate::types::{DetectedElement, Rect};

pub use ocr::{NativeOcr, OcrEngine, OcrSpan};

/// The vision tier: OCR text matching with fuzzy scoring and spatial
/// filtering, plus color-region matching for appearance-described targets.
pub struct VisionTier {
    ocr: Box<dyn OcrEngine>,
}

impl VisionTier {
    pub fn new(ocr: Box<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    /// Raw OCR spans for read-only screen inspection.
    pub fn read_spans(&self, image: &RgbaImage) -> Result<Vec<OcrSpan>> {
        self.ocr.recognize(image)
    }

    /// Locate `target` in `image`.
    ///
    /// `scale` is the display scale factor of the capture and
    /// `crop_origin` the logical screen position of the capture's top-left
    /// corner; detections come back in screen-absolute logical pixels.
    pub fn locate(
        &self,
        image: &RgbaImage,
        target: &str,
        hint: Option<&str>,
        scale: f64,
        crop_origin: (i32, i32),
        cfg: &ResolverConfig,
    ) -> Result<Option<DetectedElement>> {
        let spans = self.ocr.recognize(image)?;
        tracing::debug!(count = spans.len(), "OCR produced spans");

        if let Some(matched) =
            matcher::best_text_match(spans, target, hint, image.width(), image.height(), cfg)
        {
            if matched.span.confidence >= cfg.min_ocr_confidence {
                let mut detection = matcher::to_detection(matched);
                detection = corrected(detection, scale, crop_origin);
                return Ok(Some(detection));
            }
            tracing::debug!(
                confidence = matched.span.confidence,
                "text match below confidence floor"
            );
        }

        // Appearance-described targets: try the hint first, then the
        // target text itself ("red icon").
        let ranges = hint
            .map(color::parse_color_hint)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| color::parse_color_hint(target));

        if !ranges.is_empty() {
            if let Some(region) =
                color::find_color_region(image, &ranges, cfg.min_color_region_area)
            {
                return Ok(Some(corrected(region, scale, crop_origin)));
            }
        }

        Ok(None)
    }
}

/// Map a detection from capture-pixel space to screen-absolute logical
/// pixels: divide by the display scale, then offset by the crop origin.
fn corrected(mut detection: DetectedElement, scale: f64, crop_origin: (i32, i32)) -> DetectedElement {
    let (x, y) = ocr_to_screen(detection.bounds.x, detection.bounds.y, scale, crop_origin);
    detection.bounds = Rect::new(
        x,
        y,
        (detection.bounds.w as f64 / scale) as i32,
        (detection.bounds.h as f64 / scale) as i32,
    );
    detection.center = detection.bounds.center();
    detection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectedKind, DetectionMethod};

    struct FixedOcr(Vec<OcrSpan>);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _image: &RgbaImage) -> Result<Vec<OcrSpan>> {
            Ok(self.0.clone())
        }
    }

    fn span(text: &str, x: i32, y: i32, confidence: f32) -> OcrSpan {
        OcrSpan {
            text: text.into(),
            bounds: Rect::new(x, y, 40, 20),
            confidence,
        }
    }

    #[test]
    fn retina_coordinates_corrected_to_screen_space() {
        // Text at OCR-space (240, 680) on a 2.0-scale capture must click at
        // logical (130, 350): (240/2 + 10 = 130 for the bounds origin).
        let tier = VisionTier::new(Box::new(FixedOcr(vec![span("OK", 240, 680, 0.9)])));
        let image = RgbaImage::new(800, 800);

        let found = tier
            .locate(&image, "OK", None, 2.0, (0, 0), &ResolverConfig::default())
            .unwrap()
            .unwrap();

        assert_eq!(found.bounds, Rect::new(120, 340, 20, 10));
        assert_eq!(found.center, (130, 345));
        assert_eq!(found.method, DetectionMethod::Ocr);
    }

    #[test]
    fn crop_origin_offsets_detection() {
        let tier = VisionTier::new(Box::new(FixedOcr(vec![span("OK", 100, 60, 0.9)])));
        let image = RgbaImage::new(400, 300);

        let found = tier
            .locate(&image, "OK", None, 1.0, (300, 150), &ResolverConfig::default())
            .unwrap()
            .unwrap();
        assert_eq!(found.bounds.x, 400);
        assert_eq!(found.bounds.y, 210);
    }

    #[test]
    fn low_confidence_match_suppressed() {
        let tier = VisionTier::new(Box::new(FixedOcr(vec![span("OK", 10, 10, 0.3)])));
        let image = RgbaImage::new(400, 300);

        let found = tier
            .locate(&image, "OK", None, 1.0, (0, 0), &ResolverConfig::default())
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn color_fallback_when_no_text_matches() {
        let mut image = RgbaImage::from_pixel(200, 100, image::Rgba([240, 240, 240, 255]));
        for y in 30..60 {
            for x in 120..170 {
                image.put_pixel(x, y, image::Rgba([220, 30, 30, 255]));
            }
        }

        let tier = VisionTier::new(Box::new(FixedOcr(vec![])));
        let found = tier
            .locate(
                &image,
                "record button",
                Some("red icon"),
                1.0,
                (0, 0),
                &ResolverConfig::default(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(found.kind, DetectedKind::Visual);
        assert_eq!(found.method, DetectionMethod::Template);
    }
}
