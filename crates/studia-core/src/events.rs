use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::{EndReason, OutcomeKind};
use crate::plan::{ExerciseKind, RoundId};
use crate::sequence::FlattenWarning;
use crate::timer::{Overlay, PauseReason};

/// Every state change of a run produces an Event.
/// The presentation layer polls for events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    RunStarted {
        assignment_id: String,
        session_name: String,
        items: usize,
        planned_duration_secs: u64,
        at: DateTime<Utc>,
    },
    /// A round referenced something the session could not provide.
    SequenceWarning {
        warning: FlattenWarning,
        at: DateTime<Utc>,
    },
    ItemEntered {
        position: usize,
        code: String,
        name: String,
        kind: ExerciseKind,
        round_id: Option<RoundId>,
        repetition: Option<u32>,
        at: DateTime<Utc>,
    },
    TimerStarted {
        position: usize,
        at: DateTime<Utc>,
    },
    TimerPaused {
        reason: PauseReason,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    TimerResumed {
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// Entered an item that is not timed.
    TimerIdle {
        position: usize,
        at: DateTime<Utc>,
    },
    OverlayOpened {
        overlay: Overlay,
        at: DateTime<Utc>,
    },
    OverlayClosed {
        overlay: Overlay,
        at: DateTime<Utc>,
    },
    OutcomeRecorded {
        position: usize,
        code: String,
        outcome: OutcomeKind,
        elapsed_secs: u64,
        at: DateTime<Utc>,
    },
    /// The session hit its time ceiling and was finished automatically.
    CeilingReached {
        session_elapsed_secs: u64,
        auto_saved: bool,
        at: DateTime<Utc>,
    },
    RunRestarted {
        at: DateTime<Utc>,
    },
    RunFinished {
        reason: EndReason,
        completed: usize,
        omitted: usize,
        at: DateTime<Utc>,
    },
    /// The run was abandoned without keeping its outcomes.
    RunDiscarded {
        at: DateTime<Utc>,
    },
}
