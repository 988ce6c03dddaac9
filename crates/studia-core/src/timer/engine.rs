//! Timing state machine.
//!
//! Elapsed time is always recomputed from timestamps, never counted by
//! ticks. The engine does not use internal threads - the caller passes the
//! current time into every command and calls `tick()` about once a second.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running <-> Paused -> Idle
//!            \          /
//!             Finished
//! ```

use serde::{Deserialize, Serialize};

use super::clock::to_datetime;
use super::interruptions::{BlockingChange, InterruptionTracker, OverlayEvent};
use crate::events::Event;

/// Default hard ceiling for one session: five hours.
pub const DEFAULT_CEILING_SECS: u64 = 18_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    /// Current item is not timed.
    Idle,
    Running,
    Paused,
    /// Terminal.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    User,
    /// An overlay opened while running.
    Interruption,
    /// A timed item was entered while the application had no focus.
    Background,
}

#[derive(Debug, Clone)]
pub struct TimerEngine {
    state: TimerState,
    position: usize,
    /// Active time of the current item before the running interval.
    accumulated_ms: u64,
    /// Start of the running interval (epoch ms).
    run_started_at_ms: Option<u64>,
    /// Active time of items already left.
    banked_ms: u64,
    ceiling_ms: u64,
    ceiling_reported: bool,
    has_focus: bool,
    pause_reason: Option<PauseReason>,
    interruptions: InterruptionTracker,
}

impl TimerEngine {
    pub fn new(ceiling_secs: u64) -> Self {
        Self {
            state: TimerState::Idle,
            position: 0,
            accumulated_ms: 0,
            run_started_at_ms: None,
            banked_ms: 0,
            ceiling_ms: ceiling_secs.saturating_mul(1000),
            ceiling_reported: false,
            has_focus: true,
            pause_reason: None,
            interruptions: InterruptionTracker::new(),
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_finished(&self) -> bool {
        self.state == TimerState::Finished
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause_reason
    }

    pub fn has_focus(&self) -> bool {
        self.has_focus
    }

    pub fn interruptions(&self) -> &InterruptionTracker {
        &self.interruptions
    }

    pub fn ceiling_secs(&self) -> u64 {
        self.ceiling_ms / 1000
    }

    /// Active time on the current item.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        let running = self
            .run_started_at_ms
            .map(|start| now_ms.saturating_sub(start))
            .unwrap_or(0);
        self.accumulated_ms + running
    }

    pub fn elapsed_secs(&self, now_ms: u64) -> u64 {
        self.elapsed_ms(now_ms) / 1000
    }

    /// Active time across the whole session, current item included.
    pub fn session_elapsed_ms(&self, now_ms: u64) -> u64 {
        self.banked_ms + self.elapsed_ms(now_ms)
    }

    pub fn session_elapsed_secs(&self, now_ms: u64) -> u64 {
        self.session_elapsed_ms(now_ms) / 1000
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Arm the timer for a new item. Call [`TimerEngine::leave_item`] first
    /// to capture the time spent on the previous one.
    pub fn enter_item(&mut self, position: usize, timed: bool, now_ms: u64) -> Option<Event> {
        if self.is_finished() {
            return None;
        }
        self.position = position;
        self.accumulated_ms = 0;
        self.run_started_at_ms = None;
        self.pause_reason = None;

        if !timed {
            self.state = TimerState::Idle;
            return Some(Event::TimerIdle {
                position,
                at: to_datetime(now_ms),
            });
        }

        let reason = if self.interruptions.is_blocked() {
            Some(PauseReason::Interruption)
        } else if !self.has_focus {
            Some(PauseReason::Background)
        } else {
            None
        };

        match reason {
            Some(reason) => {
                self.state = TimerState::Paused;
                self.pause_reason = Some(reason);
                Some(Event::TimerPaused {
                    reason,
                    elapsed_secs: 0,
                    at: to_datetime(now_ms),
                })
            }
            None => {
                self.state = TimerState::Running;
                self.run_started_at_ms = Some(now_ms);
                Some(Event::TimerStarted {
                    position,
                    at: to_datetime(now_ms),
                })
            }
        }
    }

    /// Stop timing the current item, bank its time and return it.
    pub fn leave_item(&mut self, now_ms: u64) -> u64 {
        let elapsed = self.elapsed_ms(now_ms);
        self.banked_ms += elapsed;
        self.accumulated_ms = 0;
        self.run_started_at_ms = if self.is_running() { Some(now_ms) } else { None };
        elapsed
    }

    /// Play/pause from the user. Does nothing on untimed items, while an
    /// overlay is open or once finished.
    pub fn toggle(&mut self, now_ms: u64) -> Option<Event> {
        match self.state {
            TimerState::Running => self.pause(PauseReason::User, now_ms),
            TimerState::Paused if !self.interruptions.is_blocked() => self.resume(now_ms),
            _ => None,
        }
    }

    pub fn pause(&mut self, reason: PauseReason, now_ms: u64) -> Option<Event> {
        if self.state != TimerState::Running {
            return None;
        }
        self.flush_elapsed(now_ms);
        self.state = TimerState::Paused;
        self.pause_reason = Some(reason);
        tracing::debug!(position = self.position, ?reason, "timer paused");
        Some(Event::TimerPaused {
            reason,
            elapsed_secs: self.elapsed_secs(now_ms),
            at: to_datetime(now_ms),
        })
    }

    pub fn resume(&mut self, now_ms: u64) -> Option<Event> {
        if self.state != TimerState::Paused {
            return None;
        }
        self.state = TimerState::Running;
        self.run_started_at_ms = Some(now_ms);
        self.pause_reason = None;
        tracing::debug!(position = self.position, "timer resumed");
        Some(Event::TimerResumed {
            elapsed_secs: self.elapsed_secs(now_ms),
            at: to_datetime(now_ms),
        })
    }

    /// Feed an overlay event. Pauses on the first overlay while running and
    /// resumes on the last close unless the user paused.
    pub fn publish(&mut self, event: OverlayEvent, now_ms: u64) -> Option<Event> {
        match self.interruptions.apply(event) {
            BlockingChange::Blocked => self.pause(PauseReason::Interruption, now_ms),
            BlockingChange::Cleared
                if matches!(
                    self.pause_reason,
                    Some(PauseReason::Interruption | PauseReason::Background)
                ) =>
            {
                if self.has_focus {
                    self.resume(now_ms)
                } else {
                    self.pause_reason = Some(PauseReason::Background);
                    None
                }
            }
            _ => None,
        }
    }

    /// Record application focus. A timed item that was entered in the
    /// background starts once focus returns.
    pub fn set_focus(&mut self, has_focus: bool, now_ms: u64) -> Option<Event> {
        self.has_focus = has_focus;
        if has_focus
            && self.pause_reason == Some(PauseReason::Background)
            && !self.interruptions.is_blocked()
        {
            return self.resume(now_ms);
        }
        None
    }

    /// Check the session ceiling. Returns `CeilingReached` exactly once.
    pub fn tick(&mut self, now_ms: u64) -> Option<Event> {
        if self.ceiling_reported || self.is_finished() {
            return None;
        }
        let session_ms = self.session_elapsed_ms(now_ms);
        if session_ms < self.ceiling_ms {
            return None;
        }
        self.finish(now_ms);
        self.ceiling_reported = true;
        tracing::info!(session_secs = session_ms / 1000, "session ceiling reached");
        Some(Event::CeilingReached {
            session_elapsed_secs: session_ms / 1000,
            auto_saved: true,
            at: to_datetime(now_ms),
        })
    }

    /// Enter the terminal state, folding any running interval.
    pub fn finish(&mut self, now_ms: u64) {
        if self.is_running() {
            self.flush_elapsed(now_ms);
        }
        self.run_started_at_ms = None;
        self.pause_reason = None;
        self.state = TimerState::Finished;
    }

    /// Forget all timing, keeping focus and open overlays.
    pub fn reset(&mut self) {
        self.state = TimerState::Idle;
        self.position = 0;
        self.accumulated_ms = 0;
        self.run_started_at_ms = None;
        self.banked_ms = 0;
        self.ceiling_reported = false;
        self.pause_reason = None;
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn flush_elapsed(&mut self, now_ms: u64) {
        if let Some(start) = self.run_started_at_ms.take() {
            self.accumulated_ms += now_ms.saturating_sub(start);
        }
    }
}
