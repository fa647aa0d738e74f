//! Resolution orchestrator.
//!
//! State machine per click request:
//! `Start → AccessibilityLookup → (Matched | AccessibilityEmpty) →
//! [VisionFallback] → Dispatch → (Success | Exhausted)`.
//!
//! Tier misses fall through; only exhaustion of all tiers or a hard
//! precondition failure (app not found, no permissions) surfaces to the
//! caller. A successful dispatch always invalidates caches and advances
//! the registry epoch.

use std::sync::Arc;

use image::RgbaImage;

use crate::config::ResolverConfig;
use crate::error::{Result, ResolveError};
use crate::input::{EnigoDriver, InputDriver};
use crate::platform::{create_backend, AccessibilityBackend};
use crate::registry::InvalidationReason;
use crate::screenshot::{image_to_base64, ScreenCapture, ScreenSource};
use crate::serializer;
use crate::types::{
    ClickResult, ClickType, DetectedElement, DetectionMethod, ElementRecord, Rect, ResolveMethod,
    Tier,
};
use crate::vision::{NativeOcr, VisionTier};

const EMPTY_SPACE_KEYWORDS: &[&str] = &[
    "empty space",
    "blank area",
    "empty area",
    "blank space",
    "background",
];

/// Multi-tier element resolver: accessibility first, vision fallback.
pub struct Resolver {
    backend: Box<dyn AccessibilityBackend>,
    screen: Arc<dyn ScreenSource>,
    vision: Arc<VisionTier>,
    input: Arc<dyn InputDriver>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        backend: Box<dyn AccessibilityBackend>,
        screen: Arc<dyn ScreenSource>,
        vision: VisionTier,
        input: Arc<dyn InputDriver>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            backend,
            screen,
            vision: Arc::new(vision),
            input,
            config,
        }
    }

    /// Wire up the platform backend, live screen capture, native OCR and
    /// real input for this OS.
    pub fn with_platform_defaults(config: ResolverConfig) -> Result<Self> {
        let screen: Arc<dyn ScreenSource> = Arc::new(ScreenCapture::new());
        let (width, height) = screen.logical_size()?;
        let display = Rect::new(0, 0, width as i32, height as i32);

        let input: Arc<dyn InputDriver> = Arc::new(EnigoDriver::new()?);
        let backend = create_backend(display, Arc::clone(&input), &config)?;
        let vision = VisionTier::new(Box::new(NativeOcr::new()));

        Ok(Self::new(backend, screen, vision, input, config))
    }

    /// Resolve `label` inside `app` and click it.
    pub async fn resolve_and_click(
        &self,
        app: &str,
        label: &str,
        hint: Option<&str>,
        click: ClickType,
    ) -> Result<ClickResult> {
        let mut tiers: Vec<Tier> = Vec::new();
        let mut best_confidence = 0.0f32;

        let accessibility_up = self.backend.is_available().await;

        // App existence is a hard precondition whenever we can check it;
        // never fall back to "whatever is frontmost".
        if accessibility_up {
            self.backend.resolve_app(app).await?;
        }

        // Clicks on "empty space"/"background" target the window itself,
        // not an element.
        let label_lower = label.to_lowercase();
        if EMPTY_SPACE_KEYWORDS.iter().any(|k| label_lower.contains(k)) {
            if let Ok(bounds) = self.backend.get_window_bounds(app).await {
                let (x, y) = bounds.center();
                self.input.click_at(x, y, click)?;
                self.backend.invalidate(InvalidationReason::Interaction);
                return Ok(ClickResult {
                    success: true,
                    method: ResolveMethod::AccessibilityCoordinates,
                    coordinates: Some((x, y)),
                    matched_label: Some(label.to_string()),
                    confidence: 1.0,
                });
            }
        }

        // Tier 1: accessibility tree.
        if accessibility_up {
            tiers.push(Tier::Accessibility);
            match self.backend.get_elements(app, true).await {
                Ok(elements) => {
                    if let Some(target) = pick_match(&elements, label) {
                        tracing::debug!(id = %target.id, label = %target.label, "accessibility match");
                        match self.backend.click_by_id(&target.id, click).await {
                            Ok(outcome) => {
                                return Ok(ClickResult {
                                    success: true,
                                    method: outcome.method,
                                    coordinates: outcome.coordinates,
                                    matched_label: Some(outcome.label),
                                    confidence: 1.0,
                                });
                            }
                            Err(e) => {
                                tracing::warn!("accessibility dispatch failed, trying vision: {e}");
                            }
                        }
                    } else {
                        tracing::debug!(
                            count = elements.len(),
                            "no accessibility candidate for '{label}'"
                        );
                    }
                }
                Err(e) => tracing::warn!("accessibility traversal failed: {e}"),
            }
        }

        // Tier 2: vision on the current pixels.
        tiers.push(Tier::Vision);
        match self.vision_locate(app, label, hint, accessibility_up).await {
            Ok(Some(found)) => {
                best_confidence = best_confidence.max(found.confidence);
                if found.confidence >= self.config.min_ocr_confidence {
                    let (x, y) = found.center;
                    self.input.click_at(x, y, click)?;
                    self.backend.invalidate(InvalidationReason::Interaction);
                    return Ok(ClickResult {
                        success: true,
                        method: detection_method(found.method),
                        coordinates: Some((x, y)),
                        matched_label: found.label,
                        confidence: found.confidence,
                    });
                }
                // Below threshold is a miss, not a guess.
                tracing::debug!(
                    confidence = found.confidence,
                    "vision candidate below threshold"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("vision tier failed: {e}"),
        }

        Err(ResolveError::ElementNotFound {
            label: label.to_string(),
            tiers,
            best_confidence,
        })
    }

    /// Resolve `label` inside `app` and type into it: native value-set
    /// first, then focus-click plus keystrokes.
    pub async fn resolve_and_type(&self, app: &str, label: &str, text: &str) -> Result<ClickResult> {
        if self.backend.is_available().await {
            self.backend.resolve_app(app).await?;

            if let Ok(elements) = self.backend.get_elements(app, true).await {
                if let Some(target) = pick_match(&elements, label) {
                    if self.backend.set_value_by_id(&target.id, text).await.is_ok() {
                        return Ok(ClickResult {
                            success: true,
                            method: ResolveMethod::AccessibilityNative,
                            coordinates: None,
                            matched_label: Some(target.label.clone()),
                            confidence: 1.0,
                        });
                    }
                }
            }
        }

        // Fallback: click to focus the field, then synthesize keystrokes.
        let result = self
            .resolve_and_click(app, label, None, ClickType::Single)
            .await?;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.input.type_text(text)?;
        self.backend.invalidate(InvalidationReason::Interaction);
        Ok(result)
    }

    /// Enumerate elements without clicking, e.g. to build a planner prompt.
    pub async fn get_elements(
        &self,
        app: &str,
        interactive_only: bool,
    ) -> Result<Vec<ElementRecord>> {
        if !self.backend.is_available().await {
            return Err(ResolveError::AccessibilityUnavailable(
                self.backend.backend_name().to_string(),
            ));
        }
        self.backend.resolve_app(app).await?;
        self.backend.get_elements(app, interactive_only).await
    }

    /// Prompt-ready listing of the app's interactive elements.
    pub async fn describe_elements(&self, app: &str) -> Result<String> {
        let elements = self.get_elements(app, true).await?;
        Ok(serializer::format_for_prompt(app, &elements))
    }

    /// Full-screen or region capture, at native resolution.
    pub async fn capture_screenshot(&self, region: Option<Rect>) -> Result<RgbaImage> {
        let screen = Arc::clone(&self.screen);
        let task = tokio::task::spawn_blocking(move || match region {
            Some(rect) => screen.capture_region(rect),
            None => screen.capture(),
        });
        tokio::time::timeout(self.config.capture_timeout, task)
            .await
            .map_err(|_| ResolveError::Timeout(self.config.capture_timeout))?
            .map_err(|e| ResolveError::Internal(anyhow::anyhow!("task join error: {e}")))?
    }

    /// Capture encoded as base64 PNG.
    pub async fn screenshot_base64(&self, region: Option<Rect>) -> Result<String> {
        let image = self.capture_screenshot(region).await?;
        image_to_base64(&image)
    }

    /// All readable text in the application: accessibility labels when the
    /// tree is reachable, OCR of the window otherwise.
    pub async fn read_text(&self, app: &str) -> Result<Vec<String>> {
        if self.backend.is_available().await {
            self.backend.resolve_app(app).await?;
            match self.backend.read_text(app).await {
                Ok(texts) if !texts.is_empty() => return Ok(texts),
                Ok(_) => {}
                Err(e) => tracing::warn!("accessibility text read failed: {e}"),
            }
        }

        let (image, _) = self.capture_for_vision(app, self.backend.is_available().await).await?;
        let vision = Arc::clone(&self.vision);
        let task = tokio::task::spawn_blocking(move || vision.read_spans(&image));
        let spans = tokio::time::timeout(self.config.ocr_timeout, task)
            .await
            .map_err(|_| ResolveError::Timeout(self.config.ocr_timeout))?
            .map_err(|e| ResolveError::Internal(anyhow::anyhow!("task join error: {e}")))??;

        let mut seen = std::collections::HashSet::new();
        Ok(spans
            .into_iter()
            .filter_map(|s| {
                let text = s.text.trim().to_string();
                (!text.is_empty() && seen.insert(text.clone())).then_some(text)
            })
            .collect())
    }

    /// Press a key combination like "Ctrl+S" in whatever has focus.
    pub fn send_keys(&self, combo: &str) -> Result<()> {
        self.input.send_keys(combo)?;
        self.backend.invalidate(InvalidationReason::Interaction);
        Ok(())
    }

    /// Explicitly drop all cached state.
    pub fn invalidate_caches(&self) {
        self.backend.invalidate(InvalidationReason::Explicit);
    }

    /// Capture the target app's window (screen fallback) and return the
    /// image plus its crop origin in logical screen coordinates.
    async fn capture_for_vision(
        &self,
        app: &str,
        accessibility_up: bool,
    ) -> Result<(RgbaImage, (i32, i32))> {
        if accessibility_up {
            if let Ok(bounds) = self.backend.get_window_bounds(app).await {
                let screen = Arc::clone(&self.screen);
                let task =
                    tokio::task::spawn_blocking(move || screen.capture_region(bounds));
                let image = tokio::time::timeout(self.config.capture_timeout, task)
                    .await
                    .map_err(|_| ResolveError::Timeout(self.config.capture_timeout))?
                    .map_err(|e| ResolveError::Internal(anyhow::anyhow!("task join error: {e}")))?;
                match image {
                    Ok(image) => return Ok((image, (bounds.x, bounds.y))),
                    Err(e) => tracing::warn!("window capture failed, using full screen: {e}"),
                }
            }
        }

        let image = self.capture_screenshot(None).await?;
        Ok((image, (0, 0)))
    }

    async fn vision_locate(
        &self,
        app: &str,
        label: &str,
        hint: Option<&str>,
        accessibility_up: bool,
    ) -> Result<Option<DetectedElement>> {
        let (image, origin) = self.capture_for_vision(app, accessibility_up).await?;
        let scale = self.screen.scale_factor();

        let vision = Arc::clone(&self.vision);
        let config = self.config.clone();
        let target = label.to_string();
        let hint = hint.map(str::to_string);

        let task = tokio::task::spawn_blocking(move || {
            vision.locate(&image, &target, hint.as_deref(), scale, origin, &config)
        });
        tokio::time::timeout(self.config.ocr_timeout, task)
            .await
            .map_err(|_| ResolveError::Timeout(self.config.ocr_timeout))?
            .map_err(|e| ResolveError::Internal(anyhow::anyhow!("task join error: {e}")))?
    }
}

/// Exact label match preferred over partial; first match wins within a
/// class, since backends emit elements in traversal order.
fn pick_match<'a>(elements: &'a [ElementRecord], label: &str) -> Option<&'a ElementRecord> {
    elements
        .iter()
        .find(|e| e.matches_label(label, true))
        .or_else(|| elements.iter().find(|e| e.matches_label(label, false)))
}

fn detection_method(method: DetectionMethod) -> ResolveMethod {
    match method {
        DetectionMethod::Ocr => ResolveMethod::Ocr,
        DetectionMethod::Fuzzy => ResolveMethod::Fuzzy,
        DetectionMethod::Template => ResolveMethod::Template,
    }
}
