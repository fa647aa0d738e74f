#![cfg(target_os = "windows")]

//! Windows UI Automation backend.
//!
//! COM objects are created fresh inside each blocking call so no
//! non-`Send` state crosses thread boundaries; the registry stores only
//! plain re-derivable data (HWND + runtime id).

use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;
use windows::{
    core::{Interface, BSTR},
    Win32::{
        Foundation::{BOOL, HWND, LPARAM, RECT},
        System::Com::{CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED},
        UI::{
            Accessibility::{
                CUIAutomation, IUIAutomation, IUIAutomationElement, IUIAutomationInvokePattern,
                IUIAutomationSelectionItemPattern, IUIAutomationTogglePattern,
                IUIAutomationValuePattern, TreeScope_Children, TreeScope_Subtree,
                UIA_ButtonControlTypeId, UIA_CheckBoxControlTypeId, UIA_ComboBoxControlTypeId,
                UIA_EditControlTypeId, UIA_ExpandCollapsePatternId, UIA_HyperlinkControlTypeId,
                UIA_ImageControlTypeId, UIA_InvokePatternId, UIA_ListControlTypeId,
                UIA_ListItemControlTypeId, UIA_MenuBarControlTypeId, UIA_MenuControlTypeId,
                UIA_MenuItemControlTypeId, UIA_PaneControlTypeId, UIA_RadioButtonControlTypeId,
                UIA_ScrollBarControlTypeId, UIA_SelectionItemPatternId, UIA_SliderControlTypeId,
                UIA_SpinnerControlTypeId, UIA_SplitButtonControlTypeId, UIA_TabControlTypeId,
                UIA_TabItemControlTypeId, UIA_TableControlTypeId, UIA_TextControlTypeId,
                UIA_TogglePatternId, UIA_ToolBarControlTypeId, UIA_TreeControlTypeId,
                UIA_TreeItemControlTypeId, UIA_ValuePatternId, UIA_WindowControlTypeId,
            },
            WindowsAndMessaging::{
                EnumWindows, GetForegroundWindow, GetWindowRect, GetWindowTextW, IsWindowVisible,
            },
        },
    },
};

use super::{names_match, AccessibilityBackend, ClickOutcome};
use crate::config::ResolverConfig;
use crate::error::{Result, ResolveError};
use crate::input::InputDriver;
use crate::registry::{AppCache, ElementRegistry, InvalidationReason, Lookup};
use crate::types::{
    Category, ClickType, ElementRecord, Rect, ResolveMethod, Role, TraversalContext,
};

/// Re-derivable address of a UIA element: the owning window plus the
/// framework-assigned runtime id. Runtime ids are short-lived, which is
/// why the registry epoch validates them before reuse.
#[derive(Debug, Clone)]
struct WinHandle {
    hwnd: isize,
    runtime_id: String,
}

#[derive(Debug, Clone)]
struct WinApp {
    hwnd: isize,
    title: String,
}

pub struct WindowsBackend {
    display: Rect,
    input: Arc<dyn InputDriver>,
    registry: Arc<ElementRegistry<WinHandle>>,
    apps: AppCache<WinApp>,
    max_depth: u32,
    climb_limit: u32,
}

impl WindowsBackend {
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

    async fn app_handle(&self, name: &str) -> Result<WinApp> {
        if let Some(app) = self.apps.get(name) {
            return Ok(app);
        }

        let target = name.to_string();
        let windows = list_top_level_windows().await?;
        let found = windows
            .into_iter()
            .find(|w| names_match(&w.title, &target))
            .ok_or_else(|| ResolveError::AppNotFound(target.clone()))?;

        self.apps.insert(&target, found.clone());
        Ok(found)
    }

    fn lookup(&self, id: &str) -> Result<(ElementRecord, WinHandle)> {
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
impl AccessibilityBackend for WindowsBackend {
    fn backend_name(&self) -> &'static str {
        "windows-uia"
    }

    async fn is_available(&self) -> bool {
        // UI Automation ships with the OS; creating the CUIAutomation
        // object is the only real probe.
        tokio::task::spawn_blocking(|| create_automation().is_ok())
            .await
            .unwrap_or(false)
    }

    async fn resolve_app(&self, name: &str) -> Result<String> {
        Ok(self.app_handle(name).await?.title)
    }

    async fn get_elements(&self, app: &str, interactive_only: bool) -> Result<Vec<ElementRecord>> {
        let app = self.app_handle(app).await?;
        let display = self.display;
        let max_depth = self.max_depth;
        let registry = Arc::clone(&self.registry);

        tokio::task::spawn_blocking(move || -> AnyResult<Vec<ElementRecord>> {
            let automation = create_automation()?;
            let root = unsafe { automation.ElementFromHandle(HWND(app.hwnd as *mut _)) }
                .map_err(|e| anyhow!("failed to open window {}: {e}", app.title))?;

            let mut raw = Vec::new();
            collect_elements(
                &automation,
                &root,
                TraversalContext::Window,
                0,
                max_depth,
                &mut raw,
            );

            let mut records = Vec::new();
            for extracted in raw {
                if interactive_only && extracted.record.category != Category::Interactive {
                    continue;
                }
                if !extracted.record.bounds.within(display) {
                    continue;
                }
                let handle = WinHandle {
                    hwnd: app.hwnd,
                    runtime_id: extracted.runtime_id,
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

        // Double/right clicks have no native UIA equivalent; those always
        // go through coordinate synthesis.
        if click == ClickType::Single {
            let climb = self.climb_limit;
            let native = tokio::task::spawn_blocking(move || -> AnyResult<bool> {
                let automation = create_automation()?;
                let element = find_by_runtime_id(&automation, handle.hwnd, &handle.runtime_id)?
                    .ok_or_else(|| anyhow!("element vanished: {}", handle.runtime_id))?;
                Ok(invoke_with_ancestors(&automation, &element, climb))
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
                Err(e) => tracing::debug!("native invoke unavailable: {e}"),
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
            let automation = create_automation()?;
            let element = find_by_runtime_id(&automation, handle.hwnd, &handle.runtime_id)?
                .ok_or_else(|| anyhow!("element vanished: {}", handle.runtime_id))?;

            unsafe {
                let pattern = element
                    .GetCurrentPattern(UIA_ValuePatternId)
                    .map_err(|_| anyhow!("element does not support ValuePattern"))?;
                let value_pattern = pattern
                    .cast::<IUIAutomationValuePattern>()
                    .map_err(|_| anyhow!("failed to cast to ValuePattern"))?;
                value_pattern
                    .SetValue(&BSTR::from(&value))
                    .map_err(|e| anyhow!("failed to set value: {e}"))?;
            }
            Ok(())
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
            let mut rect = RECT::default();
            unsafe { GetWindowRect(HWND(app.hwnd as *mut _), &mut rect) }
                .map_err(|e| anyhow!("GetWindowRect failed: {e}"))?;
            Ok(Rect::new(
                rect.left,
                rect.top,
                rect.right - rect.left,
                rect.bottom - rect.top,
            ))
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))?
        .map_err(ResolveError::Internal)
    }

    async fn get_frontmost_app(&self) -> Result<Option<String>> {
        tokio::task::spawn_blocking(|| unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.0 as usize == 0 {
                return None;
            }
            let mut buf = [0u16; 512];
            let len = GetWindowTextW(hwnd, &mut buf);
            (len > 0).then(|| String::from_utf16_lossy(&buf[..len as usize]))
        })
        .await
        .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))
    }

    async fn list_running_apps(&self) -> Result<Vec<String>> {
        Ok(list_top_level_windows()
            .await?
            .into_iter()
            .map(|w| w.title)
            .collect())
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

fn create_automation() -> AnyResult<IUIAutomation> {
    unsafe {
        let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
        CoCreateInstance(&CUIAutomation, None, CLSCTX_ALL)
            .map_err(|e| anyhow!("failed to create UIAutomation: {e}"))
    }
}

async fn list_top_level_windows() -> Result<Vec<WinApp>> {
    tokio::task::spawn_blocking(|| {
        let mut windows: Vec<WinApp> = Vec::new();

        unsafe {
            unsafe extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
                let windows = &mut *(lparam.0 as *mut Vec<WinApp>);

                if !IsWindowVisible(hwnd).as_bool() {
                    return BOOL(1);
                }
                let mut buf = [0u16; 512];
                let len = GetWindowTextW(hwnd, &mut buf);
                if len == 0 {
                    return BOOL(1);
                }
                let title = String::from_utf16_lossy(&buf[..len as usize]);
                if title.trim().is_empty() {
                    return BOOL(1);
                }

                windows.push(WinApp {
                    hwnd: hwnd.0 as isize,
                    title,
                });
                BOOL(1)
            }

            let ptr = LPARAM(&mut windows as *mut Vec<WinApp> as isize);
            let _ = EnumWindows(Some(enum_callback), ptr);
        }

        windows
    })
    .await
    .map_err(|e| ResolveError::Internal(anyhow!("task join error: {e}")))
}

/// Normalized role for a UIA control type id.
fn map_role(control_type_id: i32) -> Role {
    match control_type_id {
        x if x == UIA_ButtonControlTypeId.0 => Role::Button,
        x if x == UIA_SplitButtonControlTypeId.0 => Role::Button,
        x if x == UIA_CheckBoxControlTypeId.0 => Role::Checkbox,
        x if x == UIA_RadioButtonControlTypeId.0 => Role::RadioButton,
        x if x == UIA_ComboBoxControlTypeId.0 => Role::ComboBox,
        x if x == UIA_EditControlTypeId.0 => Role::TextField,
        x if x == UIA_HyperlinkControlTypeId.0 => Role::Link,
        x if x == UIA_ListControlTypeId.0 => Role::Container,
        x if x == UIA_ListItemControlTypeId.0 => Role::ListItem,
        x if x == UIA_MenuControlTypeId.0 => Role::Menu,
        x if x == UIA_MenuBarControlTypeId.0 => Role::MenuBar,
        x if x == UIA_MenuItemControlTypeId.0 => Role::MenuItem,
        x if x == UIA_PaneControlTypeId.0 => Role::Container,
        x if x == UIA_ScrollBarControlTypeId.0 => Role::ScrollBar,
        x if x == UIA_SliderControlTypeId.0 => Role::Slider,
        x if x == UIA_SpinnerControlTypeId.0 => Role::Slider,
        x if x == UIA_TabControlTypeId.0 => Role::Container,
        x if x == UIA_TabItemControlTypeId.0 => Role::Tab,
        x if x == UIA_TableControlTypeId.0 => Role::Table,
        x if x == UIA_TextControlTypeId.0 => Role::StaticText,
        x if x == UIA_ImageControlTypeId.0 => Role::Image,
        x if x == UIA_ToolBarControlTypeId.0 => Role::Toolbar,
        x if x == UIA_TreeControlTypeId.0 => Role::Container,
        x if x == UIA_TreeItemControlTypeId.0 => Role::TreeItem,
        x if x == UIA_WindowControlTypeId.0 => Role::Window,
        _ => Role::Unknown,
    }
}

struct Extracted {
    record: ElementRecord,
    runtime_id: String,
}

fn collect_elements(
    automation: &IUIAutomation,
    element: &IUIAutomationElement,
    context: TraversalContext,
    depth: u32,
    max_depth: u32,
    out: &mut Vec<Extracted>,
) {
    if depth > max_depth {
        return;
    }

    let role = unsafe {
        map_role(
            element
                .CurrentControlType()
                .map(|c| c.0)
                .unwrap_or_default(),
        )
    };

    if let Some(extracted) = extract_element(element, role, context) {
        out.push(extracted);
    }

    let child_context = match role {
        Role::MenuBar => TraversalContext::MenuBar,
        Role::Menu | Role::MenuItem => TraversalContext::MenuItems,
        _ => context,
    };

    unsafe {
        if let Ok(condition) = automation.CreateTrueCondition() {
            if let Ok(children) = element.FindAll(TreeScope_Children, &condition) {
                let count = children.Length().unwrap_or(0);
                for i in 0..count {
                    if let Ok(child) = children.GetElement(i) {
                        collect_elements(
                            automation,
                            &child,
                            child_context,
                            depth + 1,
                            max_depth,
                            out,
                        );
                    }
                }
            }
        }
    }
}

fn extract_element(
    element: &IUIAutomationElement,
    role: Role,
    context: TraversalContext,
) -> Option<Extracted> {
    unsafe {
        let rect = element.CurrentBoundingRectangle().ok()?;
        let bounds = Rect::new(
            rect.left,
            rect.top,
            rect.right - rect.left,
            rect.bottom - rect.top,
        );
        if bounds.is_degenerate() {
            return None;
        }

        let name = element
            .CurrentName()
            .ok()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty());
        let value = element
            .GetCurrentPattern(UIA_ValuePatternId)
            .ok()
            .and_then(|p| p.cast::<IUIAutomationValuePattern>().ok())
            .and_then(|vp| vp.CurrentValue().ok().map(|s| s.to_string()))
            .filter(|s| !s.is_empty());
        let automation_id = element
            .CurrentAutomationId()
            .ok()
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty());

        // Live-state interactivity: an invokable pattern on the element,
        // not a role allow-list.
        let has_actions = [
            UIA_InvokePatternId,
            UIA_TogglePatternId,
            UIA_SelectionItemPatternId,
            UIA_ExpandCollapsePatternId,
        ]
        .iter()
        .any(|p| element.GetCurrentPattern(*p).is_ok());

        let enabled = element
            .CurrentIsEnabled()
            .map(|b| b.as_bool())
            .unwrap_or(true);

        let label = name.or(value).unwrap_or_default();
        if label.is_empty() && automation_id.is_none() && !has_actions {
            return None;
        }

        let runtime_id = runtime_id_string(element)?;

        Some(Extracted {
            record: ElementRecord {
                id: String::new(),
                native_id: automation_id,
                role,
                label,
                bounds,
                center: bounds.center(),
                category: Category::derive(role, context, has_actions, enabled),
                enabled,
                has_actions,
                epoch: 0,
            },
            runtime_id,
        })
    }
}

/// UIA runtime id rendered as a dotted string, stable for the element's
/// lifetime within its window.
fn runtime_id_string(element: &IUIAutomationElement) -> Option<String> {
    unsafe {
        let arr = element.GetRuntimeId().ok()?;
        let bounds = (*arr).rgsabound[0];
        let data = (*arr).pvData as *const i32;
        let mut parts = Vec::new();
        for i in 0..bounds.cElements.min(10) {
            parts.push((*data.add(i as usize)).to_string());
        }
        (!parts.is_empty()).then(|| parts.join("."))
    }
}

fn find_by_runtime_id(
    automation: &IUIAutomation,
    hwnd: isize,
    runtime_id: &str,
) -> AnyResult<Option<IUIAutomationElement>> {
    unsafe {
        let root = automation
            .ElementFromHandle(HWND(hwnd as *mut _))
            .map_err(|e| anyhow!("window is gone: {e}"))?;
        let condition = automation.CreateTrueCondition()?;
        let elements = root.FindAll(TreeScope_Subtree, &condition)?;

        let count = elements.Length().unwrap_or(0);
        for i in 0..count {
            if let Ok(element) = elements.GetElement(i) {
                if runtime_id_string(&element).as_deref() == Some(runtime_id) {
                    return Ok(Some(element));
                }
            }
        }
        Ok(None)
    }
}

/// Try the native invoke ladder on the element, then on up to
/// `climb_limit` ancestors — many frameworks only expose actions on a
/// container, not the leaf.
fn invoke_with_ancestors(
    automation: &IUIAutomation,
    element: &IUIAutomationElement,
    climb_limit: u32,
) -> bool {
    if try_invoke(element) {
        return true;
    }

    unsafe {
        let Ok(walker) = automation.ControlViewWalker() else {
            return false;
        };
        let mut current = element.clone();
        for _ in 0..climb_limit {
            match walker.GetParentElement(&current) {
                Ok(parent) => {
                    if try_invoke(&parent) {
                        return true;
                    }
                    current = parent;
                }
                Err(_) => break,
            }
        }
    }
    false
}

fn try_invoke(element: &IUIAutomationElement) -> bool {
    unsafe {
        if let Ok(pattern) = element.GetCurrentPattern(UIA_InvokePatternId) {
            if let Ok(invoke) = pattern.cast::<IUIAutomationInvokePattern>() {
                return invoke.Invoke().is_ok();
            }
        }
        if let Ok(pattern) = element.GetCurrentPattern(UIA_TogglePatternId) {
            if let Ok(toggle) = pattern.cast::<IUIAutomationTogglePattern>() {
                return toggle.Toggle().is_ok();
            }
        }
        if let Ok(pattern) = element.GetCurrentPattern(UIA_SelectionItemPatternId) {
            if let Ok(selection) = pattern.cast::<IUIAutomationSelectionItemPattern>() {
                return selection.Select().is_ok();
            }
        }
    }
    false
}

// Holds no COM state; automation instances are created per blocking call.
unsafe impl Send for WindowsBackend {}
unsafe impl Sync for WindowsBackend {}
