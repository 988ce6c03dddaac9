use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::outcome::{BlockOutcome, OutcomeId, SessionOutcome};

/// Storage writer for finished runs.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    async fn create_session_outcome(&self, outcome: &SessionOutcome)
        -> Result<OutcomeId, StoreError>;

    async fn create_block_outcome(
        &self,
        session_id: &OutcomeId,
        outcome: &BlockOutcome,
    ) -> Result<(), StoreError>;
}

/// Block outcomes of one run, handed to the progress tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub student_id: String,
    pub outcomes: Vec<BlockOutcome>,
    pub practised_at: DateTime<Utc>,
}

/// Best-effort progress bookkeeping after a save.
#[async_trait]
pub trait ProgressTracker: Send + Sync {
    async fn update_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError>;
}

/// Tracker that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

#[async_trait]
impl ProgressTracker for NoProgress {
    async fn update_progress(&self, _update: &ProgressUpdate) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory store, with switchable failures for exercising retries.
#[derive(Debug, Default)]
pub struct MemoryOutcomeStore {
    sessions: Mutex<Vec<(OutcomeId, SessionOutcome)>>,
    blocks: Mutex<Vec<(OutcomeId, BlockOutcome)>>,
    next_id: AtomicU64,
    failing_session_writes: AtomicU32,
    failing_blocks: Mutex<HashSet<usize>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` session writes fail.
    pub fn fail_next_sessions(&self, n: u32) {
        self.failing_session_writes.store(n, Ordering::SeqCst);
    }

    /// Make writes of the block at `position` fail until cleared.
    pub fn fail_block(&self, position: usize) {
        if let Ok(mut failing) = self.failing_blocks.lock() {
            failing.insert(position);
        }
    }

    pub fn clear_failures(&self) {
        self.failing_session_writes.store(0, Ordering::SeqCst);
        if let Ok(mut failing) = self.failing_blocks.lock() {
            failing.clear();
        }
    }

    pub fn sessions(&self) -> Vec<(OutcomeId, SessionOutcome)> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn blocks(&self) -> Vec<(OutcomeId, BlockOutcome)> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    fn take_session_failure(&self) -> bool {
        self.failing_session_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".into())
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn create_session_outcome(
        &self,
        outcome: &SessionOutcome,
    ) -> Result<OutcomeId, StoreError> {
        if self.take_session_failure() {
            return Err(StoreError::Unavailable("session write failed".into()));
        }
        let id = OutcomeId(format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        self.sessions
            .lock()
            .map_err(poisoned)?
            .push((id.clone(), outcome.clone()));
        Ok(id)
    }

    async fn create_block_outcome(
        &self,
        session_id: &OutcomeId,
        outcome: &BlockOutcome,
    ) -> Result<(), StoreError> {
        if self.failing_blocks.lock().map_err(poisoned)?.contains(&outcome.position) {
            return Err(StoreError::Unavailable(format!(
                "block write failed at position {}",
                outcome.position
            )));
        }
        let known = self
            .sessions
            .lock()
            .map_err(poisoned)?
            .iter()
            .any(|(id, _)| id == session_id);
        if !known {
            return Err(StoreError::UnknownSession(session_id.to_string()));
        }
        self.blocks
            .lock()
            .map_err(poisoned)?
            .push((session_id.clone(), outcome.clone()));
        Ok(())
    }
}
