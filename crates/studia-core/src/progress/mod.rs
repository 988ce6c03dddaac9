//! Backpack progress: per-student mastery of each exercise.
//!
//! Every completed block feeds a backpack entry keyed by the block's
//! backpack key. Entries gain score on completion and on reaching the
//! target tempo, and become mastered after two mastered weeks.

mod backpack;
mod tracker;

pub use backpack::{BackpackItem, BackpackRepository, BackpackStatus, MemoryBackpackRepository};
pub use tracker::{BackpackTracker, MASTERY_WINDOW_DAYS};
