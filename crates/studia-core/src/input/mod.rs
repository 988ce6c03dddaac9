//! Keyboard shortcuts for a run.
//!
//! [`dispatch`] maps a key press to at most one [`Command`], honouring the
//! overlay priorities:
//!
//! 1. `Escape` closes the innermost overlay, or asks to exit.
//! 2. Strict overlays swallow everything except `?`.
//! 3. `i` and `?` toggle the itinerary and the shortcut help.
//! 4. The itinerary suppresses session keys.
//! 5. Session keys: play/pause, back, omit, complete.

use serde::{Deserialize, Serialize};

use crate::timer::{InterruptionTracker, Overlay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Escape,
    Space,
    Enter,
    ArrowLeft,
    ArrowRight,
    Char(char),
}

impl Key {
    /// Parse a terminal token such as `space`, `esc`, `left` or `n`.
    pub fn parse(token: &str) -> Option<Key> {
        let key = match token.to_ascii_lowercase().as_str() {
            "esc" | "escape" => Key::Escape,
            "space" | " " => Key::Space,
            "enter" | "return" => Key::Enter,
            "left" | "arrowleft" => Key::ArrowLeft,
            "right" | "arrowright" => Key::ArrowRight,
            _ => {
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Key::Char(c),
                    _ => return None,
                }
            }
        };
        Some(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "overlay", rename_all = "snake_case")]
pub enum Command {
    CloseOverlay(Overlay),
    OpenOverlay(Overlay),
    ToggleOverlay(Overlay),
    TogglePlayPause,
    Complete,
    Omit,
    Back,
}

/// What the dispatcher needs to know about the run.
#[derive(Debug, Clone, Copy)]
pub struct KeyContext<'a> {
    pub overlays: &'a InterruptionTracker,
    pub position: usize,
    pub len: usize,
    /// The current item is an advisory block.
    pub advisory: bool,
}

pub fn dispatch(key: Key, ctx: &KeyContext<'_>) -> Option<Command> {
    if key == Key::Escape {
        return Some(match ctx.overlays.escape_target() {
            Some(overlay) => Command::CloseOverlay(overlay),
            None => Command::OpenOverlay(Overlay::ExitConfirmation),
        });
    }

    let key = match key {
        Key::Char(c) => Key::Char(c.to_ascii_lowercase()),
        other => other,
    };

    if ctx.overlays.strict_open() {
        return (key == Key::Char('?')).then_some(Command::ToggleOverlay(Overlay::ShortcutHelp));
    }

    match key {
        Key::Char('i') => return Some(Command::ToggleOverlay(Overlay::Itinerary)),
        Key::Char('?') => return Some(Command::ToggleOverlay(Overlay::ShortcutHelp)),
        _ => {}
    }

    if ctx.overlays.is_open(Overlay::Itinerary) {
        return None;
    }

    match key {
        Key::Space if !ctx.advisory => Some(Command::TogglePlayPause),
        Key::ArrowLeft if ctx.position > 0 => Some(Command::Back),
        Key::Char('p') => Some(Command::Back),
        Key::ArrowRight if ctx.position + 1 < ctx.len => Some(Command::Omit),
        Key::Char('n') => Some(Command::Omit),
        Key::Enter | Key::Char('o') => Some(Command::Complete),
        _ => None,
    }
}
