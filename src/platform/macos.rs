#![cfg(target_os = "macos")]

//! macOS AX API backend.
//!
//! AX references stay valid considerably longer than UIA runtime ids, but
//! they are not `Send`; this backend therefore stores only a plain match
//! descriptor per registered element and re-derives a fresh `AXUIElement`
//! inside each blocking call.

use std::sync::Arc;

use accessibility::{AXAttribute, AXUIElement, AXUIElementAttributes};
use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use core_foundation::base::TCFType;
use core_foundation::boolean::CFBoolean;
use core_foundation::string::CFString;
use core_graphics_types::geometry::{CGPoint, CGSize};

use super::{names_match, AccessibilityBackend, ClickOutcome};
use crate::config::ResolverConfig;
use crate::error::{Result, ResolveError};
use crate::input::InputDriver;
use crate::registry::{AppCache, ElementRegistry, InvalidationReason, Lookup};
use crate::types::{
    Category, ClickType, ElementRecord, Rect, ResolveMethod, Role, TraversalContext,
};

/// Plain descriptor used to re-derive the AX node at interaction time:
/// the owning process plus enough identity to find the node again.
#[derive(Debug, Clone)]
struct MacHandle {
    pid: i32,
    native_role: String,
    label: String,
    bounds: Rect,
}

#[derive(Debug, Clone)]
struct MacApp {
    pid: i32,
    name: String,
}

pub struct MacBackend {
    display: Rect,
    input: Arc<dyn InputDriver>,
    registry: Arc<ElementRegistry<MacHandle>>,
    apps: AppCache<MacApp>,
    max_depth: u32,
    climb_limit: u32,
}

impl MacBackend {
    pub fn new(display: Rect, input: Arc<dyn InputDriver>, config: &ResolverConfig) -> Self {
        Self {
            display,
            input,
            registry: Arc::new(ElementRegistry::new(config.element_ttl)),
            apps: AppCache::new(config.cache_quiet_period),
            max_depth: config.max_traversal_depth,
            climb_limit: config.ancestor_climb_limit,
        }
    }

    async fn app_handle(&self, name: &str) -> Result<MacApp> {
        if let Some(app) = self.apps.get(name) {
            return Ok(app);
        }

        let target = name.to_string();
        let apps = running_apps().await?;
        let found = apps
            .into_iter()
            .find(|a| names_match(&a.name, &target))
            .ok_or_else(|| ResolveError::AppNotFound(target.clone()))?;

        self.apps.insert(&target, found.clone());
        Ok(found)
    }

    fn lookup(&self, id: &str) -> Result<(ElementRecord, MacHandle)> {
        match self.registry.get(id) {
            Lookup::Fresh { record, handle } => Ok((record, handle)),
            Lookup::Stale => Err(ResolveError::StaleReference(id.to_string())),
            Lookup::NotFound => Err(ResolveError::ElementNotFound {
                label: id.to_string(),
                tiers: vec![],
                best_confidence: 0.0,
            }),
        }
    }
}

#[async_trait]
impl AccessibilityBackend for MacBackend {
    fn backend_name(&self) -> &'static str {
        "macos-ax"
    }

    async fn is_available(&self) -> bool {
        tokio::task::spawn_blocking(|| unsafe { accessibility_sys::AXIsProcessTrusted() })
            .await
            .unwrap_or(false)
    }

    async fn resolve_app(&self, name: &str) -> Result<String> {
        Ok(self.app_handle(name).await?.name)
    }

    async fn get_elements(&self, app: &str, interactive_only: bool) -> Result<Vec<ElementRecord>> {
        let app = self.app_handle(app).await?;
        let display = self.display;
        let max_depth = self.max_depth;
        let registry = Arc::clone(&self.registry);

        tokio::task::spawn_blocking(move || -> AnyResult<Vec<ElementRecord>> {
            let root = AXUIElement::application(app.pid);
            let mut raw = Vec::new();

            // The menu bar hangs off the application element, not a window.
            if let Some(menu_bar) = element_attr(&root, "AXMenuBar") {
                traverse(&menu_bar, TraversalContext::MenuBar, 0, max_depth, &mut raw);
            }
            if let Ok(windows) = root.windows() {
                for window in windows.iter() {
                    traverse(&window, TraversalContext::Window, 0, max_depth, &mut raw);
                }
            }

            let mut records = Vec::new();
            for extracted in raw {
                if interactive_only && extracted.record.category != Category::Interactive {
                    continue;
                }
                if !extracted.record.bounds.within(display) {
                    continue;
                }
                let handle = MacHandle {
                    pid: app.pid,
                    native_role: extracted.native_role,
                    label: extracted.record.label.clone(),
                    bounds: extracted.record.bounds,
                };
                let mut record = extracted.record;
                if let Ok(id) = registry.register(record.clone(), handle) {
                    record.id = id;
                    record.epoch = registry.current_epoch();
                    records.push(record);
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?
        .map_err(ResolveError::Internal)
    }

    async fn click_by_id(&self, id: &str, click: ClickType) -> Result<ClickOutcome> {
        let (record, handle) = self.lookup(id)?;

        if click == ClickType::Single {
            let climb = self.climb_limit;
            let native = tokio::task::spawn_blocking(move || -> AnyResult<bool> {
                let node = rederive(&handle)
                    .ok_or_else(|| anyhow!("element vanished: {}", handle.label))?;
                Ok(press_with_ancestors(&node, climb))
            })
            .await
            .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?;

            match native {
                Ok(true) => {
                    self.invalidate(InvalidationReason::Interaction);
                    return Ok(ClickOutcome {
                        method: ResolveMethod::AccessibilityNative,
                        coordinates: None,
                        label: record.label,
                    });
                }
                Ok(false) => {}
                Err(e) => tracing::debug!("native press unavailable: {e}"),
            }
        }

        let (x, y) = record.center;
        self.input.click_at(x, y, click)?;
        self.invalidate(InvalidationReason::Interaction);
        Ok(ClickOutcome {
            method: ResolveMethod::AccessibilityCoordinates,
            coordinates: Some((x, y)),
            label: record.label,
        })
    }

    async fn set_value_by_id(&self, id: &str, text: &str) -> Result<()> {
        let (_, handle) = self.lookup(id)?;
        let value = text.to_string();

        tokio::task::spawn_blocking(move || -> AnyResult<()> {
            let node =
                rederive(&handle).ok_or_else(|| anyhow!("element vanished: {}", handle.label))?;
            node.set_attribute(&AXAttribute::value(), CFString::new(&value).as_CFType())
                .map_err(|e| anyhow!("failed to set AXValue: {e:?}"))
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?
        .map_err(|e| ResolveError::DispatchFailed(e.to_string()))?;

        self.invalidate(InvalidationReason::Interaction);
        Ok(())
    }

    async fn get_window_bounds(&self, app: &str) -> Result<Rect> {
        let app = self.app_handle(app).await?;

        tokio::task::spawn_blocking(move || -> AnyResult<Rect> {
            let root = AXUIElement::application(app.pid);
            let windows = root
                .windows()
                .map_err(|e| anyhow!("no windows for {}: {e:?}", app.name))?;
            let window = windows
                .iter()
                .next()
                .ok_or_else(|| anyhow!("no windows for {}", app.name))?;
            element_bounds(&window).ok_or_else(|| anyhow!("window has no geometry"))
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?
        .map_err(ResolveError::Internal)
    }

    async fn get_frontmost_app(&self) -> Result<Option<String>> {
        tokio::task::spawn_blocking(|| {
            let system = AXUIElement::system_wide();
            let focused = element_attr(&system, "AXFocusedApplication")?;
            focused.title().ok().map(|t| t.to_string())
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))
    }

    async fn list_running_apps(&self) -> Result<Vec<String>> {
        Ok(running_apps().await?.into_iter().map(|a| a.name).collect())
    }

    async fn read_text(&self, app: &str) -> Result<Vec<String>> {
        let elements = self.get_elements(app, false).await?;
        let mut seen = std::collections::HashSet::new();
        Ok(elements
            .into_iter()
            .filter_map(|e| {
                let label = e.label.trim().to_string();
                (!label.is_empty() && seen.insert(label.clone())).then_some(label)
            })
            .collect())
    }

    fn invalidate(&self, reason: InvalidationReason) {
        self.registry.advance_epoch(reason);
        self.apps.note_interaction();
        if reason == InvalidationReason::Explicit {
            self.apps.clear();
        }
    }
}

/// Visible windows grouped by owning process, via the window server.
async fn running_apps() -> Result<Vec<MacApp>> {
    tokio::task::spawn_blocking(|| {
        let windows = xcap::Window::all()
            .map_err(|e| ResolveError::AccessibilityUnavailable(format!("window list: {e}")))?;

        let mut seen = std::collections::HashSet::new();
        Ok(windows
            .into_iter()
            .filter(|w| !w.app_name().is_empty())
            .filter_map(|w| {
                let name = w.app_name().to_string();
                seen.insert(name.clone()).then(|| MacApp {
                    pid: w.pid() as i32,
                    name,
                })
            })
            .collect())
    })
    .await
    .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?
}

struct Extracted {
    record: ElementRecord,
    native_role: String,
}

fn traverse(
    node: &AXUIElement,
    context: TraversalContext,
    depth: u32,
    max_depth: u32,
    out: &mut Vec<Extracted>,
) {
    if depth > max_depth {
        return;
    }

    let native_role = node.role().map(|r| r.to_string()).unwrap_or_default();

    if let Some(extracted) = extract_element(node, &native_role, context) {
        out.push(extracted);
    }

    let child_context = match native_role.as_str() {
        "AXMenuBar" => TraversalContext::MenuBar,
        "AXMenu" | "AXMenuItem" | "AXMenuBarItem" => TraversalContext::MenuItems,
        _ => context,
    };

    if let Ok(children) = node.children() {
        for child in children.iter() {
            traverse(&child, child_context, depth + 1, max_depth, out);
        }
    }
}

fn extract_element(node: &AXUIElement, native_role: &str, context: TraversalContext) -> Option<Extracted> {
    let bounds = element_bounds(node)?;
    if bounds.is_degenerate() {
        return None;
    }

    let label = best_label(node);
    let native_id = string_attr(node, "AXIdentifier");
    let has_actions = node
        .action_names()
        .map(|names| names.len() > 0)
        .unwrap_or(false);
    let enabled = bool_attr(node, "AXEnabled").unwrap_or(false);

    if label.is_empty() && native_id.is_none() && !has_actions {
        return None;
    }

    let role = map_role(native_role);
    Some(Extracted {
        record: ElementRecord {
            id: String::new(),
            native_id,
            role,
            label,
            bounds,
            center: bounds.center(),
            category: Category::derive(role, context, has_actions, enabled),
            enabled,
            has_actions,
            epoch: 0,
        },
        native_role: native_role.to_string(),
    })
}

/// Best available human-readable text: title, then value, then description.
fn best_label(node: &AXUIElement) -> String {
    if let Ok(title) = node.title() {
        let title = title.to_string();
        if !title.is_empty() {
            return title;
        }
    }
    if let Some(value) = string_attr(node, "AXValue") {
        if !value.is_empty() {
            return value;
        }
    }
    string_attr(node, "AXDescription").unwrap_or_default()
}

fn map_role(native_role: &str) -> Role {
    match native_role {
        "AXButton" | "AXPopUpButton" => Role::Button,
        "AXCheckBox" => Role::Checkbox,
        "AXRadioButton" => Role::RadioButton,
        "AXComboBox" => Role::ComboBox,
        "AXTextField" | "AXTextArea" | "AXSearchField" => Role::TextField,
        "AXMenuBar" => Role::MenuBar,
        "AXMenu" => Role::Menu,
        "AXMenuItem" | "AXMenuBarItem" => Role::MenuItem,
        "AXLink" => Role::Link,
        "AXRow" | "AXCell" => Role::ListItem,
        "AXTabGroup" => Role::Container,
        "AXOutlineRow" => Role::TreeItem,
        "AXSlider" | "AXIncrementor" => Role::Slider,
        "AXStaticText" => Role::StaticText,
        "AXImage" => Role::Image,
        "AXGroup" | "AXScrollArea" | "AXSplitGroup" | "AXList" => Role::Container,
        "AXWindow" | "AXSheet" | "AXDrawer" => Role::Window,
        "AXScrollBar" => Role::ScrollBar,
        "AXToolbar" => Role::Toolbar,
        "AXTable" | "AXOutline" => Role::Table,
        _ => Role::Unknown,
    }
}

fn string_attr(node: &AXUIElement, name: &'static str) -> Option<String> {
    node.attribute(&AXAttribute::new(&CFString::from_static_string(name)))
        .ok()
        .and_then(|v| v.downcast_into::<CFString>())
        .map(|s| s.to_string())
}

fn bool_attr(node: &AXUIElement, name: &'static str) -> Option<bool> {
    node.attribute(&AXAttribute::new(&CFString::from_static_string(name)))
        .ok()
        .and_then(|v| v.downcast_into::<CFBoolean>())
        .map(Into::into)
}

fn element_attr(node: &AXUIElement, name: &'static str) -> Option<AXUIElement> {
    node.attribute(&AXAttribute::new(&CFString::from_static_string(name)))
        .ok()
        .and_then(|v| v.downcast_into::<AXUIElement>())
}

fn element_bounds(node: &AXUIElement) -> Option<Rect> {
    let position = node.position().ok()?.get_value::<CGPoint>().ok()?;
    let size = node.size().ok()?.get_value::<CGSize>().ok()?;
    Some(Rect::new(
        position.x as i32,
        position.y as i32,
        size.width as i32,
        size.height as i32,
    ))
}

/// Find the registered element again by walking the live tree and matching
/// role + label, preferring the geometrically closest candidate.
fn rederive(handle: &MacHandle) -> Option<AXUIElement> {
    fn search(
        node: &AXUIElement,
        handle: &MacHandle,
        depth: u32,
        best: &mut Option<(i64, AXUIElement)>,
    ) {
        if depth > 40 {
            return;
        }

        let role = node.role().map(|r| r.to_string()).unwrap_or_default();
        if role == handle.native_role {
            let label = best_label(node);
            if label == handle.label {
                if let Some(bounds) = element_bounds(node) {
                    let (cx, cy) = bounds.center();
                    let (hx, hy) = handle.bounds.center();
                    let distance =
                        (cx as i64 - hx as i64).pow(2) + (cy as i64 - hy as i64).pow(2);
                    if best.as_ref().map(|(d, _)| distance < *d).unwrap_or(true) {
                        *best = Some((distance, node.clone()));
                    }
                }
            }
        }

        if let Ok(children) = node.children() {
            for child in children.iter() {
                search(&child, handle, depth + 1, best);
            }
        }
    }

    let app = AXUIElement::application(handle.pid);
    let mut best = None;
    if let Some(menu_bar) = element_attr(&app, "AXMenuBar") {
        search(&menu_bar, handle, 0, &mut best);
    }
    if let Ok(windows) = app.windows() {
        for window in windows.iter() {
            search(&window, handle, 0, &mut best);
        }
    }
    best.map(|(_, node)| node)
}

/// AXPress on the node, else any press/click-flavored action it exposes,
/// else the same ladder on up to `climb_limit` ancestors.
fn press_with_ancestors(node: &AXUIElement, climb_limit: u32) -> bool {
    if try_press(node) {
        return true;
    }

    let mut current = node.clone();
    for _ in 0..climb_limit {
        let Some(parent) = element_attr(&current, "AXParent") else {
            return false;
        };
        if try_press(&parent) {
            return true;
        }
        current = parent;
    }
    false
}

fn try_press(node: &AXUIElement) -> bool {
    let press = CFString::from_static_string("AXPress");
    if node.perform_action(&press).is_ok() {
        return true;
    }

    if let Ok(actions) = node.action_names() {
        for action in actions.iter() {
            let name = action.to_string().to_lowercase();
            if name.contains("press") || name.contains("click") {
                if node.perform_action(&action).is_ok() {
                    return true;
                }
            }
        }
    }
    false
}
