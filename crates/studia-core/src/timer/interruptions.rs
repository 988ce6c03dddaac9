//! Overlay interruptions.
//!
//! The presentation layer publishes overlay open/close events here instead
//! of the timer inspecting overlay flags. The tracker keeps the set of open
//! overlays and reports when the first one opens or the last one closes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Overlays that can interrupt a run.
///
/// Declaration order is the order in which `Escape` closes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Overlay {
    Itinerary,
    ExitConfirmation,
    InstrumentPanel,
    ShortcutHelp,
    ErrorReport,
}

impl Overlay {
    /// Strict overlays swallow every shortcut except the help toggle.
    pub fn is_strict(&self) -> bool {
        !matches!(self, Overlay::Itinerary)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "overlay", rename_all = "snake_case")]
pub enum OverlayEvent {
    Opened(Overlay),
    Closed(Overlay),
}

/// Effect of an overlay event on the blocked/unblocked state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingChange {
    /// The first overlay opened.
    Blocked,
    /// The last overlay closed.
    Cleared,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptionTracker {
    open: BTreeSet<Overlay>,
}

impl InterruptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event. Re-opening an open overlay or closing a closed one
    /// is ignored.
    pub fn apply(&mut self, event: OverlayEvent) -> BlockingChange {
        let was_blocked = self.is_blocked();
        let changed = match event {
            OverlayEvent::Opened(overlay) => self.open.insert(overlay),
            OverlayEvent::Closed(overlay) => self.open.remove(&overlay),
        };
        match (changed, was_blocked, self.is_blocked()) {
            (true, false, true) => BlockingChange::Blocked,
            (true, true, false) => BlockingChange::Cleared,
            _ => BlockingChange::Unchanged,
        }
    }

    pub fn is_open(&self, overlay: Overlay) -> bool {
        self.open.contains(&overlay)
    }

    /// Any overlay is open.
    pub fn is_blocked(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn strict_open(&self) -> bool {
        self.open.iter().any(Overlay::is_strict)
    }

    /// Overlay closed by the next `Escape`, if any.
    pub fn escape_target(&self) -> Option<Overlay> {
        self.open.iter().next().copied()
    }

    pub fn open_overlays(&self) -> impl Iterator<Item = Overlay> + '_ {
        self.open.iter().copied()
    }
}
