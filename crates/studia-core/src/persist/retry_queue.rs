//! Queue of saves that failed and wait to be retried.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::outcome::{BlockOutcome, OutcomeId, SessionOutcome};

/// What still has to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingPayload {
    /// The session record itself failed; nothing of the run is stored.
    FullSession {
        session: SessionOutcome,
        blocks: Vec<BlockOutcome>,
    },
    /// The session record exists; these blocks failed.
    BlockOutcomes {
        session_outcome_id: OutcomeId,
        student_id: String,
        blocks: Vec<BlockOutcome>,
    },
}

impl PendingPayload {
    pub fn block_count(&self) -> usize {
        match self {
            PendingPayload::FullSession { blocks, .. }
            | PendingPayload::BlockOutcomes { blocks, .. } => blocks.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSave {
    pub id: Uuid,
    pub payload: PendingPayload,
    /// Failed attempts so far.
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Exponential backoff: `base * 2^attempts`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: 30,
            max_delay_secs: 3600,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
        let secs = self
            .base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs);
        Duration::seconds(secs as i64)
    }
}

/// Failed saves waiting for another attempt.
///
/// Optionally backed by a JSON file so entries survive a restart.
#[derive(Debug, Clone, Default)]
pub struct RetryQueue {
    entries: Vec<PendingSave>,
    policy: RetryPolicy,
    queue_file: Option<PathBuf>,
}

impl RetryQueue {
    /// In-memory queue.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
            queue_file: None,
        }
    }

    /// Queue backed by `path`. Existing entries are loaded.
    pub fn with_path(policy: RetryPolicy, path: impl Into<PathBuf>) -> Result<Self> {
        let mut queue = Self {
            entries: Vec::new(),
            policy,
            queue_file: Some(path.into()),
        };
        queue.load()?;
        Ok(queue)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn queue_file(&self) -> Option<&Path> {
        self.queue_file.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PendingSave] {
        &self.entries
    }

    /// Earliest time any entry becomes ready.
    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(|e| e.next_attempt_at).min()
    }

    /// Add a fresh failure. It is ready for the next flush.
    pub fn enqueue(&mut self, payload: PendingPayload, error: &str, now: DateTime<Utc>) -> Uuid {
        let id = Uuid::new_v4();
        tracing::warn!(%id, blocks = payload.block_count(), error, "save queued for retry");
        self.entries.push(PendingSave {
            id,
            payload,
            attempts: 0,
            enqueued_at: now,
            next_attempt_at: now,
            last_error: Some(error.to_string()),
        });
        id
    }

    /// Put back an entry whose retry failed again, pushing out its next
    /// attempt.
    pub fn requeue(&mut self, mut entry: PendingSave, error: &str, now: DateTime<Utc>) {
        entry.attempts += 1;
        entry.next_attempt_at = now + self.policy.delay(entry.attempts);
        entry.last_error = Some(error.to_string());
        tracing::debug!(id = %entry.id, attempts = entry.attempts, next = %entry.next_attempt_at, "retry rescheduled");
        self.entries.push(entry);
    }

    /// Remove and return every entry due at `now`.
    pub fn take_ready(&mut self, now: DateTime<Utc>) -> Vec<PendingSave> {
        let (ready, waiting) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.next_attempt_at <= now);
        self.entries = waiting;
        ready
    }

    /// Remove and return every entry regardless of backoff.
    pub fn take_all(&mut self) -> Vec<PendingSave> {
        std::mem::take(&mut self.entries)
    }

    /// Write the queue to its file, if it has one.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Replace the in-memory entries with the file's contents.
    pub fn load(&mut self) -> Result<()> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path)?;
        self.entries = if content.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&content)?
        };
        Ok(())
    }
}
