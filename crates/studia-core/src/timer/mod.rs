//! Timing state machine and its inputs.

mod clock;
mod engine;
mod interruptions;

pub use clock::{to_datetime, Clock, ManualClock, SystemClock};
pub use engine::{PauseReason, TimerEngine, TimerState, DEFAULT_CEILING_SECS};
pub use interruptions::{BlockingChange, InterruptionTracker, Overlay, OverlayEvent};
