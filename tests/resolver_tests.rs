//! End-to-end resolution scenarios against fake backend, input and OCR.
//!
//! These cover the orchestrator's tier composition without touching a live
//! desktop: app-not-found preconditions, accessibility dispatch, vision
//! fallback with HiDPI correction, and spatial disambiguation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::RgbaImage;

use ui_resolver::platform::names_match;
use ui_resolver::registry::InvalidationReason;
use ui_resolver::vision::{OcrEngine, OcrSpan, VisionTier};
use ui_resolver::{
    AccessibilityBackend, Category, ClickOutcome, ClickResult, ClickType, ElementRecord,
    InputDriver, Rect, ResolveError, ResolveMethod, Resolver, ResolverConfig, Role, ScreenSource,
};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct RecordingDriver {
    clicks: Mutex<Vec<(i32, i32, ClickType)>>,
    typed: Mutex<Vec<String>>,
}

impl InputDriver for RecordingDriver {
    fn click_at(&self, x: i32, y: i32, click: ClickType) -> ui_resolver::Result<()> {
        self.clicks.lock().unwrap().push((x, y, click));
        Ok(())
    }

    fn type_text(&self, text: &str) -> ui_resolver::Result<()> {
        self.typed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn send_keys(&self, _combo: &str) -> ui_resolver::Result<()> {
        Ok(())
    }
}

struct FakeBackend {
    available: bool,
    apps: Vec<String>,
    elements: Vec<ElementRecord>,
    driver: Arc<RecordingDriver>,
    supports_set_value: bool,
    invalidations: AtomicUsize,
}

impl FakeBackend {
    fn new(available: bool, apps: &[&str], elements: Vec<ElementRecord>) -> Self {
        Self {
            available,
            apps: apps.iter().map(|s| s.to_string()).collect(),
            elements,
            driver: Arc::new(RecordingDriver::default()),
            supports_set_value: false,
            invalidations: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AccessibilityBackend for FakeBackend {
    fn backend_name(&self) -> &'static str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn resolve_app(&self, name: &str) -> ui_resolver::Result<String> {
        self.apps
            .iter()
            .find(|a| names_match(a, name))
            .cloned()
            .ok_or_else(|| ResolveError::AppNotFound(name.to_string()))
    }

    async fn get_elements(
        &self,
        _app: &str,
        interactive_only: bool,
    ) -> ui_resolver::Result<Vec<ElementRecord>> {
        Ok(self
            .elements
            .iter()
            .filter(|e| !interactive_only || e.category == Category::Interactive)
            .cloned()
            .collect())
    }

    async fn click_by_id(&self, id: &str, click: ClickType) -> ui_resolver::Result<ClickOutcome> {
        let element = self
            .elements
            .iter()
            .find(|e| e.id == id)
            .ok_or_else(|| ResolveError::StaleReference(id.to_string()))?;

        let (x, y) = element.center;
        self.driver.click_at(x, y, click)?;
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        Ok(ClickOutcome {
            method: ResolveMethod::AccessibilityCoordinates,
            coordinates: Some((x, y)),
            label: element.label.clone(),
        })
    }

    async fn set_value_by_id(&self, id: &str, _text: &str) -> ui_resolver::Result<()> {
        if self.supports_set_value && self.elements.iter().any(|e| e.id == id) {
            Ok(())
        } else {
            Err(ResolveError::DispatchFailed("no value pattern".into()))
        }
    }

    async fn get_window_bounds(&self, _app: &str) -> ui_resolver::Result<Rect> {
        Err(ResolveError::DispatchFailed("no window bounds".into()))
    }

    async fn get_frontmost_app(&self) -> ui_resolver::Result<Option<String>> {
        Ok(self.apps.first().cloned())
    }

    async fn list_running_apps(&self) -> ui_resolver::Result<Vec<String>> {
        Ok(self.apps.clone())
    }

    async fn read_text(&self, _app: &str) -> ui_resolver::Result<Vec<String>> {
        Ok(self.elements.iter().map(|e| e.label.clone()).collect())
    }

    fn invalidate(&self, _reason: InvalidationReason) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fixed-size synthetic display.
struct StaticScreen {
    scale: f64,
    width: u32,
    height: u32,
}

impl ScreenSource for StaticScreen {
    fn scale_factor(&self) -> f64 {
        self.scale
    }

    fn logical_size(&self) -> ui_resolver::Result<(u32, u32)> {
        Ok((self.width, self.height))
    }

    fn capture(&self) -> ui_resolver::Result<RgbaImage> {
        let w = (self.width as f64 * self.scale) as u32;
        let h = (self.height as f64 * self.scale) as u32;
        Ok(RgbaImage::new(w, h))
    }

    fn capture_region(&self, region: Rect) -> ui_resolver::Result<RgbaImage> {
        Ok(RgbaImage::new(
            (region.w as f64 * self.scale) as u32,
            (region.h as f64 * self.scale) as u32,
        ))
    }
}

struct FixedOcr(Vec<OcrSpan>);

impl OcrEngine for FixedOcr {
    fn recognize(&self, _image: &RgbaImage) -> ui_resolver::Result<Vec<OcrSpan>> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Opt-in log output: `RUST_LOG=debug cargo test -- --nocapture`.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn element(id: &str, label: &str, bounds: Rect) -> ElementRecord {
    ElementRecord {
        id: id.into(),
        native_id: None,
        role: Role::Button,
        label: label.into(),
        bounds,
        center: bounds.center(),
        category: Category::Interactive,
        enabled: true,
        has_actions: true,
        epoch: 0,
    }
}

fn span(text: &str, bounds: Rect, confidence: f32) -> OcrSpan {
    OcrSpan {
        text: text.into(),
        bounds,
        confidence,
    }
}

fn resolver_with(
    backend: FakeBackend,
    scale: f64,
    spans: Vec<OcrSpan>,
) -> (Resolver, Arc<RecordingDriver>) {
    let driver = Arc::clone(&backend.driver);
    let screen = Arc::new(StaticScreen {
        scale,
        width: 800,
        height: 600,
    });
    let resolver = Resolver::new(
        Box::new(backend),
        screen,
        VisionTier::new(Box::new(FixedOcr(spans))),
        driver.clone(),
        ResolverConfig::default(),
    );
    (resolver, driver)
}

fn assert_no_clicks(driver: &RecordingDriver) {
    assert!(
        driver.clicks.lock().unwrap().is_empty(),
        "no click should have been dispatched"
    );
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn app_not_running_is_a_hard_failure() {
    init_logging();
    let backend = FakeBackend::new(true, &["Terminal", "Finder"], vec![]);
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    let err = resolver
        .resolve_and_click("Calculator", "7", None, ClickType::Single)
        .await
        .unwrap_err();

    assert!(matches!(err, ResolveError::AppNotFound(ref app) if app == "Calculator"));
    assert_no_clicks(&driver);
}

#[tokio::test]
async fn accessibility_match_dispatches_at_reported_coordinates() {
    let backend = FakeBackend::new(
        true,
        &["Calculator"],
        vec![
            element("id-ok", "OK", Rect::new(100, 320, 40, 40)),
            element("id-cancel", "Cancel", Rect::new(200, 320, 60, 40)),
        ],
    );
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    let result: ClickResult = resolver
        .resolve_and_click("Calculator", "OK", None, ClickType::Single)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.method, ResolveMethod::AccessibilityCoordinates);
    assert_eq!(result.coordinates, Some((120, 340)));
    assert_eq!(result.matched_label.as_deref(), Some("OK"));

    let clicks = driver.clicks.lock().unwrap();
    assert_eq!(*clicks, vec![(120, 340, ClickType::Single)]);
}

#[tokio::test]
async fn exact_label_preferred_over_partial() {
    let backend = FakeBackend::new(
        true,
        &["Editor"],
        vec![
            element("id-saveas", "Save As", Rect::new(10, 10, 80, 30)),
            element("id-save", "Save", Rect::new(10, 50, 80, 30)),
        ],
    );
    let (resolver, _driver) = resolver_with(backend, 1.0, vec![]);

    let result = resolver
        .resolve_and_click("Editor", "Save", None, ClickType::Single)
        .await
        .unwrap();
    assert_eq!(result.matched_label.as_deref(), Some("Save"));
}

#[tokio::test]
async fn vision_fallback_corrects_hidpi_coordinates() {
    // Accessibility is down; OCR sees "OK" centered at (240, 680) in a
    // 2.0-scale capture. The click must land at logical (120, 340).
    let backend = FakeBackend::new(false, &[], vec![]);
    let spans = vec![span("OK", Rect::new(220, 670, 40, 20), 0.9)];
    let (resolver, driver) = resolver_with(backend, 2.0, spans);

    let result = resolver
        .resolve_and_click("Calculator", "OK", None, ClickType::Single)
        .await
        .unwrap();

    assert_eq!(result.method, ResolveMethod::Ocr);
    assert_eq!(result.coordinates, Some((120, 340)));

    let clicks = driver.clicks.lock().unwrap();
    assert_eq!(*clicks, vec![(120, 340, ClickType::Single)]);
}

#[tokio::test]
async fn duplicate_labels_disambiguated_by_spatial_hint() {
    // "Delete" appears twice; hint="bottom" must exclude the upper
    // candidate even though its OCR confidence is higher. Screen is
    // 800x600 at scale 1.0, so the lower 40% starts at y=360.
    let backend = FakeBackend::new(false, &[], vec![]);
    let spans = vec![
        span("Delete", Rect::new(100, 90, 60, 20), 0.99),
        span("Delete", Rect::new(100, 490, 60, 20), 0.70),
    ];
    let (resolver, driver) = resolver_with(backend, 1.0, spans);

    let result = resolver
        .resolve_and_click("Files", "Delete", Some("bottom"), ClickType::Single)
        .await
        .unwrap();

    let clicks = driver.clicks.lock().unwrap();
    assert_eq!(clicks.len(), 1);
    let (_, y, _) = clicks[0];
    assert!(y >= 360, "clicked upper duplicate at y={y}");
    assert!(result.confidence >= 0.6);
}

#[tokio::test]
async fn low_confidence_vision_candidate_is_not_clicked() {
    let backend = FakeBackend::new(false, &[], vec![]);
    let spans = vec![span("OK", Rect::new(100, 100, 40, 20), 0.3)];
    let (resolver, driver) = resolver_with(backend, 1.0, spans);

    let err = resolver
        .resolve_and_click("Calculator", "OK", None, ClickType::Single)
        .await
        .unwrap_err();

    match err {
        ResolveError::ElementNotFound { tiers, .. } => {
            assert_eq!(tiers, vec![ui_resolver::Tier::Vision]);
        }
        other => panic!("expected ElementNotFound, got {other:?}"),
    }
    assert_no_clicks(&driver);
}

#[tokio::test]
async fn exhaustion_reports_attempted_tiers() {
    // Accessibility reachable but the label matches nothing anywhere.
    let backend = FakeBackend::new(
        true,
        &["Editor"],
        vec![element("id-save", "Save", Rect::new(10, 10, 80, 30))],
    );
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    let err = resolver
        .resolve_and_click("Editor", "Purge", None, ClickType::Single)
        .await
        .unwrap_err();

    match err {
        ResolveError::ElementNotFound {
            label,
            tiers,
            best_confidence,
        } => {
            assert_eq!(label, "Purge");
            assert_eq!(
                tiers,
                vec![ui_resolver::Tier::Accessibility, ui_resolver::Tier::Vision]
            );
            assert_eq!(best_confidence, 0.0);
        }
        other => panic!("expected ElementNotFound, got {other:?}"),
    }
    assert_no_clicks(&driver);
}

#[tokio::test]
async fn right_click_passes_through_click_type() {
    let backend = FakeBackend::new(
        true,
        &["Files"],
        vec![element("id-doc", "report.txt", Rect::new(50, 50, 120, 20))],
    );
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    resolver
        .resolve_and_click("Files", "report.txt", None, ClickType::Right)
        .await
        .unwrap();

    let clicks = driver.clicks.lock().unwrap();
    assert_eq!(clicks[0].2, ClickType::Right);
}

#[tokio::test]
async fn type_falls_back_to_click_and_keystrokes() {
    let backend = FakeBackend::new(
        true,
        &["Editor"],
        vec![element("id-field", "Search", Rect::new(10, 10, 200, 24))],
    );
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    let result = resolver
        .resolve_and_type("Editor", "Search", "hello world")
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(driver.clicks.lock().unwrap().len(), 1);
    assert_eq!(*driver.typed.lock().unwrap(), vec!["hello world".to_string()]);
}

#[tokio::test]
async fn native_set_value_wins_over_keystrokes() {
    let mut backend = FakeBackend::new(
        true,
        &["Editor"],
        vec![element("id-field", "Search", Rect::new(10, 10, 200, 24))],
    );
    backend.supports_set_value = true;
    let (resolver, driver) = resolver_with(backend, 1.0, vec![]);

    let result = resolver
        .resolve_and_type("Editor", "Search", "hello")
        .await
        .unwrap();

    assert_eq!(result.method, ResolveMethod::AccessibilityNative);
    assert_no_clicks(&driver);
    assert!(driver.typed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn get_elements_requires_accessibility() {
    let backend = FakeBackend::new(false, &["Editor"], vec![]);
    let (resolver, _driver) = resolver_with(backend, 1.0, vec![]);

    let err = resolver.get_elements("Editor", true).await.unwrap_err();
    assert!(matches!(err, ResolveError::AccessibilityUnavailable(_)));
}

#[tokio::test]
async fn describe_elements_lists_interactive_controls() {
    let backend = FakeBackend::new(
        true,
        &["Calculator"],
        vec![
            element("id-7", "7", Rect::new(100, 320, 40, 40)),
            element("id-8", "8", Rect::new(150, 320, 40, 40)),
        ],
    );
    let (resolver, _driver) = resolver_with(backend, 1.0, vec![]);

    let listing = resolver.describe_elements("Calculator").await.unwrap();
    assert!(listing.contains("Application: Calculator"));
    assert!(listing.contains("[1] button \"7\""));
    assert!(listing.contains("[2] button \"8\""));
}

#[tokio::test]
async fn read_text_prefers_accessibility_labels() {
    let backend = FakeBackend::new(
        true,
        &["Editor"],
        vec![
            element("id-a", "File", Rect::new(0, 0, 40, 20)),
            element("id-b", "Edit", Rect::new(50, 0, 40, 20)),
        ],
    );
    let (resolver, _driver) = resolver_with(backend, 1.0, vec![]);

    let texts = resolver.read_text("Editor").await.unwrap();
    assert_eq!(texts, vec!["File".to_string(), "Edit".to_string()]);
}

#[tokio::test]
async fn read_text_falls_back_to_ocr() {
    let backend = FakeBackend::new(false, &[], vec![]);
    let spans = vec![
        span("Hello", Rect::new(10, 10, 50, 20), 0.9),
        span("World", Rect::new(70, 10, 50, 20), 0.9),
    ];
    let (resolver, _driver) = resolver_with(backend, 1.0, spans);

    let texts = resolver.read_text("anything").await.unwrap();
    assert_eq!(texts, vec!["Hello".to_string(), "World".to_string()]);
}
