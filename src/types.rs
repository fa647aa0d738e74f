use serde::{Deserialize, Serialize};

/// Opaque registry-assigned element identifier.
///
/// Not the OS's own ID: backends register extracted elements and hand out
/// these identifiers so callers never hold native references directly.
pub type ElementId = String;

/// Bounding rectangle in physical screen pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x <= self.x + self.w && y >= self.y && y <= self.y + self.h
    }

    /// Zero or negative extent. Such rects are discarded at extraction time
    /// and rejected by the registry.
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Whether this rect lies entirely within `display` (both given in
    /// physical screen pixels).
    pub fn within(&self, display: Rect) -> bool {
        self.x >= display.x
            && self.y >= display.y
            && self.x + self.w <= display.x + display.w
            && self.y + self.h <= display.y + display.h
    }
}

/// Normalized semantic role, mapped from each OS's own role vocabulary.
///
/// Closed set: every backend owns an exhaustive table from its native role
/// strings/ids into this enum, so call sites never branch on OS strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Button,
    TextField,
    Checkbox,
    RadioButton,
    ComboBox,
    MenuBar,
    Menu,
    MenuItem,
    Link,
    ListItem,
    Tab,
    TreeItem,
    Slider,
    StaticText,
    Image,
    Container,
    Window,
    ScrollBar,
    Toolbar,
    Table,
    Unknown,
}

impl Role {
    /// Roles that are only ever informational, regardless of OS state.
    pub fn is_static(&self) -> bool {
        matches!(self, Role::StaticText | Role::Image)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Button => "button",
            Role::TextField => "text_field",
            Role::Checkbox => "checkbox",
            Role::RadioButton => "radio_button",
            Role::ComboBox => "combo_box",
            Role::MenuBar => "menu_bar",
            Role::Menu => "menu",
            Role::MenuItem => "menu_item",
            Role::Link => "link",
            Role::ListItem => "list_item",
            Role::Tab => "tab",
            Role::TreeItem => "tree_item",
            Role::Slider => "slider",
            Role::StaticText => "static_text",
            Role::Image => "image",
            Role::Container => "container",
            Role::Window => "window",
            Role::ScrollBar => "scroll_bar",
            Role::Toolbar => "toolbar",
            Role::Table => "table",
            Role::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element category derived from role plus traversal context.
///
/// Context matters: a plain item inside a menu-bar subtree is `MenuItem`
/// even if its role alone would read as static.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Interactive,
    MenuBar,
    MenuItem,
    Static,
    Structural,
}

/// Traversal context threaded through recursive descent so children of
/// menu bars/menus inherit the right category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalContext {
    Window,
    MenuBar,
    MenuItems,
}

impl Category {
    /// Derive a category from a normalized role, the subtree context, and
    /// the live interactivity signals reported by the OS.
    pub fn derive(role: Role, context: TraversalContext, has_actions: bool, enabled: bool) -> Self {
        match context {
            TraversalContext::MenuBar => return Category::MenuBar,
            TraversalContext::MenuItems => return Category::MenuItem,
            TraversalContext::Window => {}
        }

        match role {
            Role::MenuBar => Category::MenuBar,
            Role::Menu | Role::MenuItem => Category::MenuItem,
            _ if has_actions || (enabled && !role.is_static() && !is_structural_role(role)) => {
                Category::Interactive
            }
            Role::StaticText | Role::Image => Category::Static,
            _ => Category::Structural,
        }
    }
}

fn is_structural_role(role: Role) -> bool {
    matches!(
        role,
        Role::Container | Role::Window | Role::ScrollBar | Role::Toolbar | Role::Table
    )
}

/// Normalized description of one UI element, platform-independent.
///
/// The native handle that produced this record stays inside the backend's
/// registry; callers only ever see the opaque `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRecord {
    /// Registry-assigned opaque identifier.
    pub id: ElementId,
    /// OS automation identifier, when the toolkit exposes one.
    pub native_id: Option<String>,
    pub role: Role,
    /// Best available human-readable text (title, value, or description).
    pub label: String,
    pub bounds: Rect,
    /// Derived click point.
    pub center: (i32, i32),
    pub category: Category,
    pub enabled: bool,
    /// Whether the OS reports invokable actions on this element.
    pub has_actions: bool,
    /// Cache generation at which this record was captured.
    pub epoch: u64,
}

impl ElementRecord {
    /// Case-insensitive label/native-id match. Exact equality beats
    /// substring containment; the resolver relies on that ordering.
    pub fn matches_label(&self, target: &str, exact: bool) -> bool {
        let target = target.to_lowercase();
        let label = self.label.to_lowercase();
        let native = self
            .native_id
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default();

        if exact {
            label == target || native == target
        } else {
            label.contains(&target) || (!native.is_empty() && native.contains(&target))
        }
    }
}

/// How a detected element was found by the vision tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Ocr,
    Fuzzy,
    Template,
}

/// What kind of evidence backs a vision detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectedKind {
    Text,
    Visual,
}

/// Element located by the vision tier.
///
/// Ephemeral: produced and consumed within a single resolution call and
/// never cached, because pixel content changes continuously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedElement {
    pub kind: DetectedKind,
    pub label: Option<String>,
    /// Bounds in screen pixels (already scale-corrected and crop-offset).
    pub bounds: Rect,
    pub center: (i32, i32),
    /// Confidence in [0, 1].
    pub confidence: f32,
    pub method: DetectionMethod,
}

/// Requested click variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickType {
    #[default]
    Single,
    Double,
    Right,
}

/// Which tier produced the winning candidate for a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveMethod {
    /// Native press/invoke action on the element handle.
    AccessibilityNative,
    /// Synthetic click at accessibility-reported coordinates.
    AccessibilityCoordinates,
    Ocr,
    Fuzzy,
    Template,
}

/// Resolution tiers, recorded in failure reports so callers can see what
/// was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Accessibility,
    Vision,
}

/// Outcome of a resolve-and-dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickResult {
    pub success: bool,
    pub method: ResolveMethod,
    /// Screen coordinates the dispatch used, when a coordinate click fired.
    pub coordinates: Option<(i32, i32)>,
    /// The label text of whatever actually matched.
    pub matched_label: Option<String>,
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_center() {
        let rect = Rect::new(100, 200, 50, 30);
        assert_eq!(rect.center(), (125, 215));
    }

    #[test]
    fn rect_degenerate_and_bounds() {
        assert!(Rect::new(0, 0, 0, 10).is_degenerate());
        assert!(Rect::new(0, 0, 10, -1).is_degenerate());
        assert!(!Rect::new(0, 0, 1, 1).is_degenerate());

        let display = Rect::new(0, 0, 1920, 1080);
        assert!(Rect::new(10, 10, 100, 100).within(display));
        assert!(!Rect::new(1900, 10, 100, 100).within(display));
        assert!(!Rect::new(-5, 10, 100, 100).within(display));
    }

    #[test]
    fn label_matching_prefers_exactness() {
        let record = ElementRecord {
            id: "ab12cd34".into(),
            native_id: Some("saveButton".into()),
            role: Role::Button,
            label: "Save".into(),
            bounds: Rect::new(10, 10, 80, 30),
            center: (50, 25),
            category: Category::Interactive,
            enabled: true,
            has_actions: true,
            epoch: 0,
        };

        assert!(record.matches_label("save", true));
        assert!(record.matches_label("sav", false));
        assert!(!record.matches_label("sav", true));
        assert!(record.matches_label("savebutton", false));
    }

    #[test]
    fn menu_context_overrides_role() {
        let cat = Category::derive(Role::StaticText, TraversalContext::MenuBar, false, false);
        assert_eq!(cat, Category::MenuBar);

        let cat = Category::derive(Role::Button, TraversalContext::MenuItems, true, true);
        assert_eq!(cat, Category::MenuItem);
    }

    #[test]
    fn category_from_live_state() {
        // Enabled button with actions is interactive.
        let cat = Category::derive(Role::Button, TraversalContext::Window, true, true);
        assert_eq!(cat, Category::Interactive);

        // Static text without actions stays static even when "enabled".
        let cat = Category::derive(Role::StaticText, TraversalContext::Window, false, true);
        assert_eq!(cat, Category::Static);

        // A container without actions is structural.
        let cat = Category::derive(Role::Container, TraversalContext::Window, false, false);
        assert_eq!(cat, Category::Structural);
    }
}
