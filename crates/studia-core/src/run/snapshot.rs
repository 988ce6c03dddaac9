use serde::{Deserialize, Serialize};

use super::controller::RunStatus;
use crate::sequence::ExecutionItem;
use crate::timer::{Overlay, PauseReason, TimerState};

/// Read-only view of a run for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    pub position: usize,
    pub len: usize,
    pub current: Option<ExecutionItem>,
    pub timer_state: TimerState,
    pub pause_reason: Option<PauseReason>,
    pub elapsed_secs: u64,
    pub session_elapsed_secs: u64,
    pub ceiling_secs: u64,
    pub completed: Vec<usize>,
    pub omitted: Vec<usize>,
    pub open_overlays: Vec<Overlay>,
}
