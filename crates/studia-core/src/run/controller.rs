use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::RunSnapshot;
use crate::error::{StructuralError, ValidationError};
use crate::events::Event;
use crate::input::{dispatch, Command, Key, KeyContext};
use crate::outcome::{
    BlockOutcome, EndReason, OutcomeKind, RunContext, SessionFeedback, SessionOutcome,
};
use crate::plan::{ExerciseKind, Focus, SessionDefinition};
use crate::sequence::{flatten, planned_duration_secs, seeded_rng, ExecutionItem, FlattenWarning};
use crate::timer::{Clock, OverlayEvent, TimerEngine, DEFAULT_CEILING_SECS};
use crate::variation::{resolve_sequence, Catalog};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub student_level: u32,
    pub ceiling_secs: u64,
    /// Seed for shuffles and random variations. Entropy when absent.
    pub seed: Option<u64>,
    pub has_focus: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            student_level: 1,
            ceiling_secs: DEFAULT_CEILING_SECS,
            seed: None,
            has_focus: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Finished(EndReason),
    Discarded,
}

/// Where a complete/omit left the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved(usize),
    Finished,
}

/// Outcomes of a finished run, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedRun {
    pub session: SessionOutcome,
    pub blocks: Vec<BlockOutcome>,
}

/// Drives one practice run.
///
/// The sequence is flattened and resolved once in [`RunController::start`]
/// and stays fixed until the run is dropped; positions are stable keys.
pub struct RunController<C: Clock> {
    clock: C,
    context: RunContext,
    session_name: String,
    focus: Focus,
    items: Vec<ExecutionItem>,
    warnings: Vec<FlattenWarning>,
    student_level: u32,
    position: usize,
    completed: BTreeSet<usize>,
    omitted: BTreeSet<usize>,
    outcomes: BTreeMap<usize, BlockOutcome>,
    timer: TimerEngine,
    status: RunStatus,
    started_at: DateTime<Utc>,
    item_started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    events: Vec<Event>,
}

impl<C: Clock> RunController<C> {
    pub fn start(
        context: RunContext,
        session: &SessionDefinition,
        catalog: &dyn Catalog,
        options: RunOptions,
        clock: C,
    ) -> Result<Self, StructuralError> {
        session.validate()?;

        let mut rng = seeded_rng(options.seed);
        let flattened = flatten(session, &mut rng);
        if flattened.items.is_empty() {
            return Err(StructuralError::EmptySequence {
                session: session.name.clone(),
            });
        }
        let items = resolve_sequence(flattened.items, catalog, options.student_level, &mut rng);

        let now_ms = clock.now_ms();
        let now = clock.now();
        let mut timer = TimerEngine::new(options.ceiling_secs);
        timer.set_focus(options.has_focus, now_ms);

        let mut run = Self {
            clock,
            context,
            session_name: session.name.clone(),
            focus: session.focus,
            items,
            warnings: flattened.warnings,
            student_level: options.student_level,
            position: 0,
            completed: BTreeSet::new(),
            omitted: BTreeSet::new(),
            outcomes: BTreeMap::new(),
            timer,
            status: RunStatus::Active,
            started_at: now,
            item_started_at: now,
            finished_at: None,
            events: Vec::new(),
        };

        tracing::info!(
            assignment = %run.context.assignment_id,
            session = %run.session_name,
            items = run.items.len(),
            "run started"
        );
        run.events.push(Event::RunStarted {
            assignment_id: run.context.assignment_id.clone(),
            session_name: run.session_name.clone(),
            items: run.items.len(),
            planned_duration_secs: planned_duration_secs(&run.items),
            at: now,
        });
        for warning in run.warnings.clone() {
            run.events.push(Event::SequenceWarning { warning, at: now });
        }
        run.enter_current();
        Ok(run)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn items(&self) -> &[ExecutionItem] {
        &self.items
    }

    pub fn warnings(&self) -> &[FlattenWarning] {
        &self.warnings
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn current(&self) -> Option<&ExecutionItem> {
        self.items.get(self.position)
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Active
    }

    pub fn completed(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn omitted(&self) -> &BTreeSet<usize> {
        &self.omitted
    }

    pub fn outcome_at(&self, position: usize) -> Option<&BlockOutcome> {
        self.outcomes.get(&position)
    }

    pub fn timer(&self) -> &TimerEngine {
        &self.timer
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let now_ms = self.clock.now_ms();
        RunSnapshot {
            status: self.status,
            position: self.position,
            len: self.items.len(),
            current: self.current().cloned(),
            timer_state: self.timer.state(),
            pause_reason: self.timer.pause_reason(),
            elapsed_secs: self.timer.elapsed_secs(now_ms),
            session_elapsed_secs: self.timer.session_elapsed_secs(now_ms),
            ceiling_secs: self.timer.ceiling_secs(),
            completed: self.completed.iter().copied().collect(),
            omitted: self.omitted.iter().copied().collect(),
            open_overlays: self.timer.interruptions().open_overlays().collect(),
        }
    }

    /// Take all events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Record the current item as completed and move on.
    pub fn advance_complete(&mut self, measured_bpm: Option<u32>) -> Result<Advance, ValidationError> {
        self.record(OutcomeKind::Completed, measured_bpm)
    }

    /// Record the current item as omitted and move on.
    pub fn advance_omit(&mut self) -> Result<Advance, ValidationError> {
        self.record(OutcomeKind::Omitted, None)
    }

    /// Step back one item. Recorded outcomes are kept.
    pub fn go_back(&mut self) -> Option<usize> {
        if !self.is_active() || self.position == 0 {
            return None;
        }
        self.timer.leave_item(self.clock.now_ms());
        self.position -= 1;
        self.enter_current();
        Some(self.position)
    }

    /// Move to any position without recording an outcome.
    pub fn jump_to(&mut self, position: usize) -> Result<(), ValidationError> {
        if !self.is_active() {
            return Err(ValidationError::RunFinished);
        }
        if position >= self.items.len() {
            return Err(ValidationError::OutOfBounds {
                collection: "sequence".into(),
                index: position,
                len: self.items.len(),
            });
        }
        self.timer.leave_item(self.clock.now_ms());
        self.position = position;
        self.enter_current();
        Ok(())
    }

    /// End the run early. With `persist` the buffered outcomes are kept,
    /// otherwise they are thrown away.
    pub fn cancel_run(&mut self, persist: bool) {
        if !self.is_active() {
            return;
        }
        if persist {
            self.end(EndReason::Cancelled);
            return;
        }
        let now_ms = self.clock.now_ms();
        self.timer.leave_item(now_ms);
        self.timer.finish(now_ms);
        self.outcomes.clear();
        self.completed.clear();
        self.omitted.clear();
        self.status = RunStatus::Discarded;
        self.finished_at = Some(self.clock.now());
        tracing::info!(session = %self.session_name, "run discarded");
        self.events.push(Event::RunDiscarded { at: self.clock.now() });
    }

    pub fn toggle_play_pause(&mut self) {
        if !self.is_active() || self.current_kind() == Some(ExerciseKind::Advisory) {
            return;
        }
        if let Some(event) = self.timer.toggle(self.clock.now_ms()) {
            self.events.push(event);
        }
    }

    /// Poll the timer. Returns true when this tick ended the run.
    pub fn tick(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(event) = self.timer.tick(self.clock.now_ms()) else {
            return false;
        };
        self.events.push(event);
        self.end(EndReason::CeilingReached);
        true
    }

    pub fn set_focus(&mut self, has_focus: bool) {
        if let Some(event) = self.timer.set_focus(has_focus, self.clock.now_ms()) {
            self.events.push(event);
        }
    }

    pub fn publish(&mut self, event: OverlayEvent) {
        let now = self.clock.now();
        let was_open = |overlay| self.timer.interruptions().is_open(overlay);
        let overlay_event = match event {
            OverlayEvent::Opened(overlay) if !was_open(overlay) => {
                Some(Event::OverlayOpened { overlay, at: now })
            }
            OverlayEvent::Closed(overlay) if was_open(overlay) => {
                Some(Event::OverlayClosed { overlay, at: now })
            }
            _ => None,
        };
        self.events.extend(overlay_event);
        if let Some(timer_event) = self.timer.publish(event, self.clock.now_ms()) {
            self.events.push(timer_event);
        }
    }

    /// Dispatch a key press and apply the resulting command.
    pub fn handle_key(&mut self, key: Key) -> Option<Command> {
        if !self.is_active() {
            return None;
        }
        let ctx = KeyContext {
            overlays: self.timer.interruptions(),
            position: self.position,
            len: self.items.len(),
            advisory: self.current_kind() == Some(ExerciseKind::Advisory),
        };
        let command = dispatch(key, &ctx)?;
        match command {
            Command::CloseOverlay(overlay) => self.publish(OverlayEvent::Closed(overlay)),
            Command::OpenOverlay(overlay) => self.publish(OverlayEvent::Opened(overlay)),
            Command::ToggleOverlay(overlay) => {
                if self.timer.interruptions().is_open(overlay) {
                    self.publish(OverlayEvent::Closed(overlay));
                } else {
                    self.publish(OverlayEvent::Opened(overlay));
                }
            }
            Command::TogglePlayPause => self.toggle_play_pause(),
            Command::Complete => {
                self.advance_complete(None).ok();
            }
            Command::Omit => {
                self.advance_omit().ok();
            }
            Command::Back => {
                self.go_back();
            }
        }
        Some(command)
    }

    /// Start over on the same resolved sequence.
    pub fn restart(&mut self) {
        let now_ms = self.clock.now_ms();
        self.timer.reset();
        self.position = 0;
        self.completed.clear();
        self.omitted.clear();
        self.outcomes.clear();
        self.status = RunStatus::Active;
        self.started_at = self.clock.now();
        self.finished_at = None;
        tracing::info!(session = %self.session_name, "run restarted");
        self.events.push(Event::RunRestarted {
            at: crate::timer::to_datetime(now_ms),
        });
        self.enter_current();
    }

    /// Build the outcomes of a finished run.
    pub fn finish(&self, feedback: SessionFeedback) -> Result<FinishedRun, ValidationError> {
        let reason = match self.status {
            RunStatus::Finished(reason) => reason,
            RunStatus::Active => return Err(ValidationError::RunInProgress),
            RunStatus::Discarded => return Err(ValidationError::RunDiscarded),
        };
        feedback.validate()?;

        let blocks: Vec<BlockOutcome> = self.outcomes.values().cloned().collect();
        let total_elapsed: u64 = blocks.iter().map(|b| b.elapsed_secs).sum();
        let session = SessionOutcome {
            student_id: self.context.student_id.clone(),
            assignment_id: self.context.assignment_id.clone(),
            week_index: self.context.week_index,
            session_index: self.context.session_index,
            week_name: self.context.week_name.clone(),
            session_name: self.session_name.clone(),
            focus: self.focus,
            total_items: self.items.len(),
            completed_items: self.completed.len(),
            omitted_items: self.omitted.len(),
            total_elapsed_secs: total_elapsed.min(self.timer.ceiling_secs()),
            planned_duration_secs: planned_duration_secs(&self.items),
            rating: feedback.rating,
            note: feedback.note,
            media_links: feedback.media_links,
            started_at: self.started_at,
            finished_at: self.finished_at.unwrap_or_else(|| self.clock.now()),
            ended_early: reason.is_early(),
            end_reason: reason,
        };
        Ok(FinishedRun { session, blocks })
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn current_kind(&self) -> Option<ExerciseKind> {
        self.current().map(|item| item.block.block.kind)
    }

    fn enter_current(&mut self) {
        let now_ms = self.clock.now_ms();
        let now = crate::timer::to_datetime(now_ms);
        self.item_started_at = now;
        let Some(item) = self.items.get(self.position) else {
            return;
        };
        let timed = item.is_timed();
        tracing::debug!(position = self.position, code = %item.source_code, "entering item");
        self.events.push(Event::ItemEntered {
            position: self.position,
            code: item.source_code.clone(),
            name: item.block.block.name.clone(),
            kind: item.block.block.kind,
            round_id: item.round.map(|r| r.round_id),
            repetition: item.round.map(|r| r.repetition),
            at: now,
        });
        if let Some(event) = self.timer.enter_item(self.position, timed, now_ms) {
            self.events.push(event);
        }
    }

    fn record(
        &mut self,
        kind: OutcomeKind,
        measured_bpm: Option<u32>,
    ) -> Result<Advance, ValidationError> {
        if !self.is_active() {
            return Err(ValidationError::RunFinished);
        }
        let now_ms = self.clock.now_ms();
        let now = crate::timer::to_datetime(now_ms);
        let elapsed_ms = self.timer.leave_item(now_ms);
        let item = &self.items[self.position];
        let block = &item.block.block;

        let elapsed_secs = match kind {
            OutcomeKind::Completed if block.is_timed() => elapsed_ms / 1000,
            _ => 0,
        };
        let outcome = BlockOutcome {
            position: self.position,
            code: item.source_code.clone(),
            name: block.name.clone(),
            kind: block.kind,
            round_id: item.round.map(|r| r.round_id),
            repetition: item.round.map(|r| r.repetition),
            variation_key: item.block.variation_key.clone(),
            backpack_key: block.backpack_key().to_string(),
            outcome: kind,
            elapsed_secs,
            target_secs: if block.is_timed() { block.target_duration_secs } else { 0 },
            target_bpm: block.target_bpm(self.student_level),
            measured_bpm: match kind {
                OutcomeKind::Completed => measured_bpm,
                OutcomeKind::Omitted => None,
            },
            started_at: self.item_started_at,
            finished_at: now,
        };

        self.events.push(Event::OutcomeRecorded {
            position: self.position,
            code: outcome.code.clone(),
            outcome: kind,
            elapsed_secs,
            at: now,
        });
        match kind {
            OutcomeKind::Completed => {
                self.omitted.remove(&self.position);
                self.completed.insert(self.position);
            }
            OutcomeKind::Omitted => {
                self.completed.remove(&self.position);
                self.omitted.insert(self.position);
            }
        }
        self.outcomes.insert(self.position, outcome);

        if self.position + 1 < self.items.len() {
            self.position += 1;
            self.enter_current();
            Ok(Advance::Moved(self.position))
        } else {
            self.end(EndReason::Completed);
            Ok(Advance::Finished)
        }
    }

    fn end(&mut self, reason: EndReason) {
        let now_ms = self.clock.now_ms();
        self.timer.leave_item(now_ms);
        self.timer.finish(now_ms);
        self.status = RunStatus::Finished(reason);
        let now = crate::timer::to_datetime(now_ms);
        self.finished_at = Some(now);
        tracing::info!(
            session = %self.session_name,
            reason = reason.as_str(),
            completed = self.completed.len(),
            omitted = self.omitted.len(),
            "run finished"
        );
        self.events.push(Event::RunFinished {
            reason,
            completed: self.completed.len(),
            omitted: self.omitted.len(),
            at: now,
        });
    }
}
