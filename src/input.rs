//! Synthetic mouse and keyboard input using enigo.
//!
//! Dispatch goes through the [`InputDriver`] trait so tests can record
//! clicks instead of moving the real cursor.

use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::error::{Result, ResolveError};
use crate::types::ClickType;

/// Sink for synthesized input events.
pub trait InputDriver: Send + Sync {
    /// Move to absolute screen coordinates and click.
    fn click_at(&self, x: i32, y: i32, click: ClickType) -> Result<()>;

    fn type_text(&self, text: &str) -> Result<()>;

    /// Press a combination like "Ctrl+S" or a single key like "Enter".
    fn send_keys(&self, combo: &str) -> Result<()>;
}

/// Real input via enigo. Enigo wants exclusive access, so the handle sits
/// behind a mutex; resolution is single-threaded per request anyway since
/// concurrent clicks would race over OS input focus.
pub struct EnigoDriver {
    enigo: Mutex<Enigo>,
}

impl EnigoDriver {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| ResolveError::DispatchFailed(format!("input init failed: {e:?}")))?;
        Ok(Self {
            enigo: Mutex::new(enigo),
        })
    }
}

impl InputDriver for EnigoDriver {
    fn click_at(&self, x: i32, y: i32, click: ClickType) -> Result<()> {
        let mut enigo = self.enigo.lock().unwrap();
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| ResolveError::DispatchFailed(format!("mouse move failed: {e:?}")))?;
        // Small settle delay before the press lands.
        thread::sleep(Duration::from_millis(50));

        let (button, presses) = match click {
            ClickType::Single => (Button::Left, 1),
            ClickType::Double => (Button::Left, 2),
            ClickType::Right => (Button::Right, 1),
        };

        for i in 0..presses {
            if i > 0 {
                thread::sleep(Duration::from_millis(50));
            }
            enigo
                .button(button, Direction::Click)
                .map_err(|e| ResolveError::DispatchFailed(format!("click failed: {e:?}")))?;
        }
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        self.enigo
            .lock()
            .unwrap()
            .text(text)
            .map_err(|e| ResolveError::DispatchFailed(format!("type failed: {e:?}")))
    }

    fn send_keys(&self, combo: &str) -> Result<()> {
        let (modifiers, key) = parse_combo(combo)
            .ok_or_else(|| ResolveError::DispatchFailed(format!("unknown key combo: {combo}")))?;

        let mut enigo = self.enigo.lock().unwrap();
        for m in &modifiers {
            enigo
                .key(*m, Direction::Press)
                .map_err(|e| ResolveError::DispatchFailed(format!("modifier press failed: {e:?}")))?;
        }
        thread::sleep(Duration::from_millis(20));

        let result = enigo
            .key(key, Direction::Click)
            .map_err(|e| ResolveError::DispatchFailed(format!("key press failed: {e:?}")));

        for m in modifiers.iter().rev() {
            let _ = enigo.key(*m, Direction::Release);
        }
        result
    }
}

/// Parse "Ctrl+Shift+S" into modifier keys plus the final key.
fn parse_combo(combo: &str) -> Option<(Vec<Key>, Key)> {
    let parts: Vec<&str> = combo.split('+').map(str::trim).collect();
    let (last, mods) = parts.split_last()?;

    let mut modifiers = Vec::new();
    for m in mods {
        modifiers.push(parse_modifier(m)?);
    }
    Some((modifiers, parse_key(last)?))
}

fn parse_modifier(s: &str) -> Option<Key> {
    match s.to_lowercase().as_str() {
        "ctrl" | "control" => Some(Key::Control),
        "alt" | "option" => Some(Key::Alt),
        "shift" => Some(Key::Shift),
        "meta" | "win" | "super" | "cmd" | "command" => Some(Key::Meta),
        _ => None,
    }
}

fn parse_key(s: &str) -> Option<Key> {
    let lower = s.to_lowercase();
    let key = match lower.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "meta" | "cmd" | "command" => Key::Meta,
        _ => {
            let mut chars = lower.chars();
            let c = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            Key::Unicode(c)
        }
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combo_parsing() {
        let (mods, key) = parse_combo("Ctrl+S").unwrap();
        assert_eq!(mods, vec![Key::Control]);
        assert_eq!(key, Key::Unicode('s'));

        let (mods, key) = parse_combo("Ctrl+Shift+Enter").unwrap();
        assert_eq!(mods, vec![Key::Control, Key::Shift]);
        assert_eq!(key, Key::Return);

        let (mods, key) = parse_combo("Enter").unwrap();
        assert!(mods.is_empty());
        assert_eq!(key, Key::Return);

        assert!(parse_combo("Hyper+Q").is_none());
    }
}
