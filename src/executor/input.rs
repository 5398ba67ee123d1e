use std::time::Duration;

use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};

use crate::codec::ClickKind;
use crate::errors::{PilotError, PilotResult};

const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(100);

/// Thin wrapper over the OS input backend. Not Send; lives on the main task.
pub struct InputDriver {
    enigo: Enigo,
}

impl InputDriver {
    pub fn new() -> PilotResult<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| PilotError::Executor(format!("input backend init failed: {e}")))?;
        Ok(Self { enigo })
    }

    pub fn move_mouse(&mut self, x: i32, y: i32) -> PilotResult<()> {
        self.enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(input_err)
    }

    pub fn click(&mut self, kind: ClickKind) -> PilotResult<()> {
        let button = match kind {
            ClickKind::Left | ClickKind::Double => Button::Left,
            ClickKind::Right => Button::Right,
            ClickKind::Middle => Button::Middle,
        };
        self.enigo.button(button, Direction::Click).map_err(input_err)?;
        if kind == ClickKind::Double {
            std::thread::sleep(DOUBLE_CLICK_GAP);
            self.enigo.button(button, Direction::Click).map_err(input_err)?;
        }
        Ok(())
    }

    /// Press at the current position, glide to the target, release.
    pub fn drag(&mut self, x: i32, y: i32) -> PilotResult<()> {
        self.enigo
            .button(Button::Left, Direction::Press)
            .map_err(input_err)?;
        let moved = self.enigo.move_mouse(x, y, Coordinate::Abs);
        // Always release, even when the move failed mid-drag.
        let released = self.enigo.button(Button::Left, Direction::Release);
        moved.map_err(input_err)?;
        released.map_err(input_err)
    }

    pub fn type_text(&mut self, text: &str) -> PilotResult<()> {
        self.enigo.text(text).map_err(input_err)
    }

    /// Key names come in as either a single key ("Return") or a
    /// modifier combo ("ctrl+shift+t"). Modifiers are held around the
    /// final key and released in reverse order.
    pub fn press_key(&mut self, sequence: &str) -> PilotResult<()> {
        let combo = parse_combo(sequence)
            .ok_or_else(|| PilotError::Executor(format!("unrecognized key sequence {sequence:?}")))?;

        for modifier in &combo.modifiers {
            self.enigo.key(*modifier, Direction::Press).map_err(input_err)?;
        }
        let pressed = self.enigo.key(combo.key, Direction::Click);
        for modifier in combo.modifiers.iter().rev() {
            self.enigo
                .key(*modifier, Direction::Release)
                .map_err(input_err)?;
        }
        pressed.map_err(input_err)
    }

    pub fn cursor_position(&mut self) -> PilotResult<(i32, i32)> {
        self.enigo.location().map_err(input_err)
    }
}

fn input_err(err: impl std::fmt::Display) -> PilotError {
    PilotError::Executor(err.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct KeyCombo {
    pub modifiers: Vec<Key>,
    pub key: Key,
}

pub(crate) fn parse_combo(sequence: &str) -> Option<KeyCombo> {
    let parts: Vec<&str> = sequence.split('+').map(str::trim).collect();
    let (last, modifiers) = parts.split_last()?;
    let key = parse_key(last)?;
    let modifiers = modifiers
        .iter()
        .map(|name| parse_key(name))
        .collect::<Option<Vec<Key>>>()?;
    Some(KeyCombo { modifiers, key })
}

fn parse_key(name: &str) -> Option<Key> {
    let key = match name.to_ascii_lowercase().as_str() {
        "return" | "enter" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "page_up" | "pageup" => Key::PageUp,
        "page_down" | "pagedown" => Key::PageDown,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        "shift" => Key::Shift,
        "super" | "cmd" | "meta" | "win" => Key::Meta,
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
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c),
                _ => return None,
            }
        }
    };
    Some(key)
}
