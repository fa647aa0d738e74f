//! Formatting element lists for prompt-building callers.
//!
//! Planners that enumerate available controls before deciding what to
//! click want a compact, human-readable listing rather than raw records.

use crate::types::ElementRecord;

/// Numbered listing of elements for a planner prompt.
///
/// Example output:
/// ```text
/// Application: Calculator
/// Interactive elements:
/// [1] button "7" at (120, 340)
/// [2] button "+" at (180, 340) [disabled]
/// ```
pub fn format_for_prompt(app_name: &str, elements: &[ElementRecord]) -> String {
    let mut lines = Vec::new();

    lines.push(format!("Application: {app_name}"));
    lines.push("Interactive elements:".to_string());

    for (i, element) in elements.iter().enumerate() {
        lines.push(format!("[{}] {}", i + 1, format_element(element)));
    }

    if elements.is_empty() {
        lines.push("  (no interactive elements found)".to_string());
    }

    lines.join("\n")
}

/// One element, compactly.
pub fn format_element(element: &ElementRecord) -> String {
    let mut parts = Vec::new();

    parts.push(element.role.to_string());

    if !element.label.is_empty() {
        parts.push(format!("\"{}\"", truncate_str(&element.label, 40)));
    } else if let Some(ref native) = element.native_id {
        parts.push(format!("#{}", truncate_str(native, 30)));
    }

    let (x, y) = element.center;
    parts.push(format!("at ({x}, {y})"));

    if !element.enabled {
        parts.push("[disabled]".to_string());
    }

    parts.join(" ")
}

fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Rect, Role};

    fn record(label: &str, enabled: bool) -> ElementRecord {
        ElementRecord {
            id: "ab12cd34".into(),
            native_id: None,
            role: Role::Button,
            label: label.into(),
            bounds: Rect::new(100, 320, 40, 40),
            center: (120, 340),
            category: Category::Interactive,
            enabled,
            has_actions: true,
            epoch: 0,
        }
    }

    #[test]
    fn formats_element_with_label_and_center() {
        let formatted = format_element(&record("OK", true));
        assert_eq!(formatted, "button \"OK\" at (120, 340)");

        let disabled = format_element(&record("OK", false));
        assert!(disabled.ends_with("[disabled]"));
    }

    #[test]
    fn prompt_listing_is_numbered() {
        let listing = format_for_prompt("Calculator", &[record("7", true), record("8", true)]);
        assert!(listing.contains("[1] button \"7\""));
        assert!(listing.contains("[2] button \"8\""));

        let empty = format_for_prompt("Calculator", &[]);
        assert!(empty.contains("no interactive elements"));
    }

    #[test]
    fn long_labels_truncated() {
        let long = "x".repeat(60);
        let formatted = format_element(&record(&long, true));
        assert!(formatted.contains("..."));
        assert!(formatted.len() < 80);
    }
}
