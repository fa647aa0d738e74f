#![cfg(target_os = "linux")]

//! Linux AT-SPI2 backend.
//!
//! Talks to the accessibility bus directly over D-Bus: the session bus
//! hands out the a11y bus address (`org.a11y.Bus.GetAddress`), and every
//! accessible is addressed by its `(bus name, object path)` pair. Those
//! pairs are exactly what the registry stores per element — they are
//! short-lived, which is why ids are epoch-validated before reuse.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use zbus::zvariant::{OwnedObjectPath, Value};

use super::{names_match, AccessibilityBackend, ClickOutcome};
use crate::config::ResolverConfig;
use crate::error::{Result, ResolveError};
use crate::input::InputDriver;
use crate::registry::{AppCache, ElementRegistry, InvalidationReason, Lookup};
use crate::types::{
    Category, ClickType, ElementRecord, Rect, ResolveMethod, Role, TraversalContext,
};

const REGISTRY_DEST: &str = "org.a11y.atspi.Registry";
const ROOT_PATH: &str = "/org/a11y/atspi/accessible/root";
const IFACE_ACCESSIBLE: &str = "org.a11y.atspi.Accessible";
const IFACE_COMPONENT: &str = "org.a11y.atspi.Component";
const IFACE_ACTION: &str = "org.a11y.atspi.Action";
const IFACE_PROPS: &str = "org.freedesktop.DBus.Properties";

// AT-SPI state bit indices (AtspiStateType).
const STATE_ACTIVE: u64 = 1;
const STATE_ENABLED: u64 = 8;

/// D-Bus address of one accessible object.
#[derive(Debug, Clone)]
struct NodeRef {
    dest: String,
    path: String,
}

#[derive(Debug, Clone)]
struct AtspiApp {
    node: NodeRef,
    name: String,
}

pub struct LinuxBackend {
    display: Rect,
    input: Arc<dyn InputDriver>,
    registry: Arc<ElementRegistry<NodeRef>>,
    apps: AppCache<AtspiApp>,
    conn: tokio::sync::OnceCell<zbus::Connection>,
    max_depth: u32,
    climb_limit: u32,
}

impl LinuxBackend {
    pub fn new(display: Rect, input: Arc<dyn InputDriver>, config: &ResolverConfig) -> Self {
        Self {
            display,
            input,
            registry: Arc::new(ElementRegistry::new(config.element_ttl)),
            apps: AppCache::new(config.cache_quiet_period),
            conn: tokio::sync::OnceCell::new(),
            max_depth: config.max_traversal_depth,
            climb_limit: config.ancestor_climb_limit,
        }
    }

    /// Connect to the accessibility bus, whose address the session bus
    /// hands out.
    async fn connection(&self) -> Result<&zbus::Connection> {
        self.conn
            .get_or_try_init(|| async {
                let session = zbus::Connection::session().await?;
                let reply = session
                    .call_method(
                        Some("org.a11y.Bus"),
                        "/org/a11y/bus",
                        Some("org.a11y.Bus"),
                        "GetAddress",
                        &(),
                    )
                    .await?;
                let address: String = reply.body().deserialize()?;
                zbus::connection::Builder::address(address.as_str())?
                    .build()
                    .await
            })
            .await
            .map_err(|e: zbus::Error| {
                ResolveError::AccessibilityUnavailable(format!("AT-SPI bus unavailable: {e}"))
            })
    }

    async fn app_handle(&self, name: &str) -> Result<AtspiApp> {
        if let Some(app) = self.apps.get(name) {
            return Ok(app);
        }

        let conn = self.connection().await?;
        let root = NodeRef {
            dest: REGISTRY_DEST.into(),
            path: ROOT_PATH.into(),
        };

        for child in children(conn, &root).await.unwrap_or_default() {
            let app_name = accessible_name(conn, &child).await.unwrap_or_default();
            if names_match(&app_name, name) {
                let app = AtspiApp {
                    node: child,
                    name: app_name,
                };
                self.apps.insert(name, app.clone());
                return Ok(app);
            }
        }
        Err(ResolveError::AppNotFound(name.to_string()))
    }

    fn lookup(&self, id: &str) -> Result<(ElementRecord, NodeRef)> {
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

    /// Iterative depth-first traversal; the explicit stack keeps the
    /// depth bound enforceable and avoids async recursion.
    async fn traverse_app(&self, app: &AtspiApp) -> Result<Vec<(ElementRecord, NodeRef)>> {
        let conn = self.connection().await?;
        let mut out = Vec::new();
        let mut stack: Vec<(NodeRef, TraversalContext, u32)> =
            vec![(app.node.clone(), TraversalContext::Window, 0)];

        while let Some((node, context, depth)) = stack.pop() {
            if depth > self.max_depth {
                continue;
            }

            let role_str = role_name(conn, &node).await.unwrap_or_default();

            if depth > 0 {
                if let Some(record) = extract_element(conn, &node, &role_str, context).await {
                    out.push((record, node.clone()));
                }
            }

            let child_context = match role_str.as_str() {
                "menu bar" => TraversalContext::MenuBar,
                "menu" | "menu item" => TraversalContext::MenuItems,
                _ => context,
            };

            for child in children(conn, &node).await.unwrap_or_default() {
                stack.push((child, child_context, depth + 1));
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl AccessibilityBackend for LinuxBackend {
    fn backend_name(&self) -> &'static str {
        "linux-atspi"
    }

    async fn is_available(&self) -> bool {
        self.connection().await.is_ok()
    }

    async fn resolve_app(&self, name: &str) -> Result<String> {
        Ok(self.app_handle(name).await?.name)
    }

    async fn get_elements(&self, app: &str, interactive_only: bool) -> Result<Vec<ElementRecord>> {
        let app = self.app_handle(app).await?;
        let extracted = self.traverse_app(&app).await?;

        let mut records = Vec::new();
        for (mut record, node) in extracted {
            if interactive_only && record.category != Category::Interactive {
                continue;
            }
            if !record.bounds.within(self.display) {
                continue;
            }
            if let Ok(id) = self.registry.register(record.clone(), node) {
                record.id = id;
                record.epoch = self.registry.current_epoch();
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn click_by_id(&self, id: &str, click: ClickType) -> Result<ClickOutcome> {
        let (record, handle) = self.lookup(id)?;

        if click == ClickType::Single {
            let conn = self.connection().await?;

            let mut node = handle.clone();
            for step in 0..=self.climb_limit {
                if n_actions(conn, &node).await > 0 && do_action(conn, &node, 0).await {
                    self.invalidate(InvalidationReason::Interaction);
                    return Ok(ClickOutcome {
                        method: ResolveMethod::AccessibilityNative,
                        coordinates: None,
                        label: record.label,
                    });
                }
                match parent(conn, &node).await {
                    Some(p) if step < self.climb_limit => node = p,
                    _ => break,
                }
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
        let conn = self.connection().await?;

        // EditableText.SetTextContents is the AT-SPI way to replace a
        // field's content wholesale.
        conn.call_method(
            Some(handle.dest.as_str()),
            handle.path.as_str(),
            Some("org.a11y.atspi.EditableText"),
            "SetTextContents",
            &(text,),
        )
        .await
        .map_err(|e| ResolveError::DispatchFailed(format!("SetTextContents failed: {e}")))?;

        self.invalidate(InvalidationReason::Interaction);
        Ok(())
    }

    async fn get_window_bounds(&self, app: &str) -> Result<Rect> {
        let app = self.app_handle(app).await?;
        let conn = self.connection().await?;

        for child in children(conn, &app.node).await.unwrap_or_default() {
            if let Some(bounds) = extents(conn, &child).await {
                if !bounds.is_degenerate() {
                    return Ok(bounds);
                }
            }
        }
        Err(ResolveError::Internal(anyhow!(
            "no window geometry for {}",
            app.name
        )))
    }

    async fn get_frontmost_app(&self) -> Result<Option<String>> {
        let conn = self.connection().await?;
        let root = NodeRef {
            dest: REGISTRY_DEST.into(),
            path: ROOT_PATH.into(),
        };

        for app in children(conn, &root).await.unwrap_or_default() {
            for window in children(conn, &app).await.unwrap_or_default() {
                if states(conn, &window).await & (1 << STATE_ACTIVE) != 0 {
                    return Ok(accessible_name(conn, &app).await);
                }
            }
        }
        Ok(None)
    }

    async fn list_running_apps(&self) -> Result<Vec<String>> {
        let conn = self.connection().await?;
        let root = NodeRef {
            dest: REGISTRY_DEST.into(),
            path: ROOT_PATH.into(),
        };

        let mut names = Vec::new();
        for child in children(conn, &root).await.unwrap_or_default() {
            if let Some(name) = accessible_name(conn, &child).await {
                if !name.trim().is_empty() {
                    names.push(name);
                }
            }
        }
        Ok(names)
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

async fn extract_element(
    conn: &zbus::Connection,
    node: &NodeRef,
    role_name: &str,
    context: TraversalContext,
) -> Option<ElementRecord> {
    let bounds = extents(conn, node).await?;
    if bounds.is_degenerate() {
        return None;
    }

    let name = accessible_name(conn, node).await.unwrap_or_default();
    let desc = description(conn, node).await.unwrap_or_default();
    let label = if !name.is_empty() { name } else { desc };

    let actions = n_actions(conn, node).await;
    let has_actions = actions > 0;
    let enabled = states(conn, node).await & (1 << STATE_ENABLED) != 0;

    if label.is_empty() && !has_actions {
        return None;
    }

    let role = map_role(role_name);
    Some(ElementRecord {
        id: String::new(),
        native_id: None,
        role,
        label,
        bounds,
        center: bounds.center(),
        category: Category::derive(role, context, has_actions, enabled),
        enabled,
        has_actions,
        epoch: 0,
    })
}

/// AT-SPI role names are lowercase with spaces ("push button").
fn map_role(role_name: &str) -> Role {
    match role_name {
        "push button" | "button" | "toggle button" => Role::Button,
        "check box" | "check menu item" => Role::Checkbox,
        "radio button" | "radio menu item" => Role::RadioButton,
        "combo box" => Role::ComboBox,
        "text" | "entry" | "password text" | "editbar" => Role::TextField,
        "menu bar" => Role::MenuBar,
        "menu" => Role::Menu,
        "menu item" => Role::MenuItem,
        "link" => Role::Link,
        "list item" => Role::ListItem,
        "page tab" => Role::Tab,
        "tree item" => Role::TreeItem,
        "slider" | "spin button" => Role::Slider,
        "label" | "static" | "heading" | "paragraph" => Role::StaticText,
        "image" | "icon" => Role::Image,
        "panel" | "filler" | "scroll pane" | "split pane" | "list" | "page tab list" => {
            Role::Container
        }
        "frame" | "window" | "dialog" => Role::Window,
        "scroll bar" => Role::ScrollBar,
        "tool bar" => Role::Toolbar,
        "table" | "tree" | "tree table" => Role::Table,
        _ => Role::Unknown,
    }
}

async fn children(conn: &zbus::Connection, node: &NodeRef) -> Option<Vec<NodeRef>> {
    let reply = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_ACCESSIBLE),
            "GetChildren",
            &(),
        )
        .await
        .ok()?;
    let refs: Vec<(String, OwnedObjectPath)> = reply.body().deserialize().ok()?;

    Some(
        refs.into_iter()
            .map(|(dest, path)| NodeRef {
                dest,
                path: path.to_string(),
            })
            .filter(|n| !n.path.ends_with("/null"))
            .collect(),
    )
}

async fn string_property(
    conn: &zbus::Connection,
    node: &NodeRef,
    property: &str,
) -> Option<String> {
    let reply = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_PROPS),
            "Get",
            &(IFACE_ACCESSIBLE, property),
        )
        .await
        .ok()?;
    let body = reply.body();
    match body.deserialize::<Value>().ok()? {
        Value::Str(s) => Some(s.to_string()),
        _ => None,
    }
}

async fn accessible_name(conn: &zbus::Connection, node: &NodeRef) -> Option<String> {
    string_property(conn, node, "Name").await
}

async fn description(conn: &zbus::Connection, node: &NodeRef) -> Option<String> {
    string_property(conn, node, "Description").await
}

async fn role_name(conn: &zbus::Connection, node: &NodeRef) -> Option<String> {
    let reply = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_ACCESSIBLE),
            "GetRoleName",
            &(),
        )
        .await
        .ok()?;
    reply.body().deserialize::<String>().ok()
}

/// Screen-coordinate extents via the Component interface (coord type 0 =
/// screen).
async fn extents(conn: &zbus::Connection, node: &NodeRef) -> Option<Rect> {
    let reply = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_COMPONENT),
            "GetExtents",
            &(0u32,),
        )
        .await
        .ok()?;
    let (x, y, w, h): (i32, i32, i32, i32) = reply.body().deserialize().ok()?;
    Some(Rect::new(x, y, w, h))
}

/// Both state words folded into one u64 bitfield.
async fn states(conn: &zbus::Connection, node: &NodeRef) -> u64 {
    let Ok(reply) = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_ACCESSIBLE),
            "GetState",
            &(),
        )
        .await
    else {
        return 0;
    };
    let Ok(words) = reply.body().deserialize::<Vec<u32>>() else {
        return 0;
    };
    let low = words.first().copied().unwrap_or(0) as u64;
    let high = words.get(1).copied().unwrap_or(0) as u64;
    low | (high << 32)
}

async fn n_actions(conn: &zbus::Connection, node: &NodeRef) -> i32 {
    let Ok(reply) = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_PROPS),
            "Get",
            &(IFACE_ACTION, "NActions"),
        )
        .await
    else {
        return 0;
    };
    let body = reply.body();
    match body.deserialize::<Value>() {
        Ok(Value::I32(n)) => n,
        _ => 0,
    }
}

async fn do_action(conn: &zbus::Connection, node: &NodeRef, index: i32) -> bool {
    let Ok(reply) = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_ACTION),
            "DoAction",
            &(index,),
        )
        .await
    else {
        return false;
    };
    reply.body().deserialize::<bool>().unwrap_or(false)
}

async fn parent(conn: &zbus::Connection, node: &NodeRef) -> Option<NodeRef> {
    let reply = conn
        .call_method(
            Some(node.dest.as_str()),
            node.path.as_str(),
            Some(IFACE_PROPS),
            "Get",
            &(IFACE_ACCESSIBLE, "Parent"),
        )
        .await
        .ok()?;

    let body = reply.body();
    let Value::Structure(s) = body.deserialize::<Value>().ok()? else {
        return None;
    };
    let fields = s.fields();
    let dest = match fields.first()? {
        Value::Str(s) => s.to_string(),
        _ => return None,
    };
    let path = match fields.get(1)? {
        Value::ObjectPath(p) => p.to_string(),
        _ => return None,
    };
    if path.ends_with("/null") || dest.is_empty() {
        return None;
    }
    Some(NodeRef { dest, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_table_covers_common_toolkit_roles() {
        assert_eq!(map_role("push button"), Role::Button);
        assert_eq!(map_role("menu bar"), Role::MenuBar);
        assert_eq!(map_role("entry"), Role::TextField);
        assert_eq!(map_role("label"), Role::StaticText);
        assert_eq!(map_role("scroll pane"), Role::Container);
        assert_eq!(map_role("martian widget"), Role::Unknown);
    }

    #[test]
    fn state_word_folding() {
        let enabled = 1u64 << STATE_ENABLED;
        assert_eq!(enabled, 0x100);
        // Second word occupies the high bits.
        let folded = (0u64) | ((1u64) << 32);
        assert_eq!(folded & 0xFFFF_FFFF, 0);
    }
}
