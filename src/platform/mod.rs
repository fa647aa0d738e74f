//! Platform accessibility backends.
//!
//! Three structurally different native accessibility APIs (UI Automation,
//! the AX API, AT-SPI2) unified behind one trait. The implementation is
//! selected once at startup via platform detection; call sites never
//! branch on OS strings.

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::InvalidationReason;
use crate::types::{ClickType, ElementRecord, Rect, ResolveMethod};

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

/// What a backend click actually did, so the orchestrator can record the
/// dispatch method faithfully.
#[derive(Debug, Clone)]
pub struct ClickOutcome {
    pub method: ResolveMethod,
    /// Present when a synthetic coordinate click fired.
    pub coordinates: Option<(i32, i32)>,
    pub label: String,
}

/// Common interface over the native accessibility APIs.
///
/// Native handles never cross this boundary: callers address elements by
/// the opaque registry ids embedded in [`ElementRecord`]s, and stale ids
/// come back as `StaleReference` rather than silently re-resolving.
#[async_trait]
pub trait AccessibilityBackend: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Whether the native API is present and permitted.
    async fn is_available(&self) -> bool;

    /// Resolve an application by case-insensitive substring against the
    /// running-application list. Returns the canonical name; a miss is
    /// `AppNotFound` — never a silent frontmost fallback, which could act
    /// on the wrong target.
    async fn resolve_app(&self, name: &str) -> Result<String>;

    /// Traverse the application's UI tree and return normalized records,
    /// registering each one for later id-based interaction.
    async fn get_elements(&self, app: &str, interactive_only: bool) -> Result<Vec<ElementRecord>>;

    /// Click a registered element: native press action first, then the
    /// nearest ancestor exposing one, then a synthetic click at center.
    async fn click_by_id(&self, id: &str, click: ClickType) -> Result<ClickOutcome>;

    /// Set an editable element's value through the native API.
    async fn set_value_by_id(&self, id: &str, text: &str) -> Result<()>;

    /// Bounds of the application's main window, in logical screen pixels.
    async fn get_window_bounds(&self, app: &str) -> Result<Rect>;

    async fn get_frontmost_app(&self) -> Result<Option<String>>;

    async fn list_running_apps(&self) -> Result<Vec<String>>;

    /// All text content visible in the application, deduplicated in
    /// traversal order.
    async fn read_text(&self, app: &str) -> Result<Vec<String>>;

    /// Drop cached app handles and stale all outstanding element ids.
    fn invalidate(&self, reason: InvalidationReason);
}

/// Case-insensitive partial name match, in both directions: "calc" finds
/// "Calculator" and "Calculator.exe" finds "calc".
pub fn names_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

/// Create the backend for the current platform.
///
/// `display` bounds gate element registration: extraction discards any
/// element whose geometry falls outside them.
pub fn create_backend(
    display: Rect,
    input: std::sync::Arc<dyn crate::input::InputDriver>,
    config: &crate::config::ResolverConfig,
) -> Result<Box<dyn AccessibilityBackend>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(windows::WindowsBackend::new(display, input, config)))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(macos::MacBackend::new(display, input, config)))
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(linux::LinuxBackend::new(display, input, config)))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        let _ = (display, input, config);
        Err(crate::error::ResolveError::AccessibilityUnavailable(
            "unsupported platform".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matching_is_bidirectional_substring() {
        assert!(names_match("Calculator", "calc"));
        assert!(names_match("calc", "Calculator"));
        assert!(names_match("FIREFOX", "firefox"));
        assert!(!names_match("Calculator", "terminal"));
        assert!(!names_match("", "calc"));
    }
}
