//! Writes finished runs through an [`OutcomeStore`].
//!
//! The session record is written first; block records follow as
//! independent concurrent writes keyed to the new session id. Anything
//! that fails goes to the [`RetryQueue`]. Partial success is kept, there
//! is no rollback. Progress is credited only for blocks that were written.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::retry_queue::{PendingPayload, RetryQueue};
use super::store::{OutcomeStore, ProgressTracker, ProgressUpdate};
use crate::error::StoreError;
use crate::outcome::{BlockOutcome, OutcomeId};
use crate::run::FinishedRun;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// Session and every block were written.
    Saved,
    /// Session written, some blocks queued.
    PartiallySaved,
    /// Session write failed; the whole run is queued.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveReport {
    pub status: SaveStatus,
    pub session_outcome_id: Option<OutcomeId>,
    pub blocks_saved: usize,
    pub blocks_queued: usize,
    pub queued_entry: Option<Uuid>,
    #[serde(default)]
    pub error: Option<String>,
    pub progress_updated: bool,
    /// Older entries retried after this save.
    pub retried: FlushReport,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub requeued: usize,
}

/// Which queue entries a flush tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Only entries whose backoff has expired.
    Ready,
    /// Everything, ignoring backoff.
    All,
}

struct BlockWrites {
    saved: Vec<BlockOutcome>,
    failed: Vec<(BlockOutcome, StoreError)>,
}

pub struct OutcomePersister<S, P> {
    store: Arc<S>,
    tracker: P,
    queue: RetryQueue,
}

impl<S, P> OutcomePersister<S, P>
where
    S: OutcomeStore + 'static,
    P: ProgressTracker,
{
    pub fn new(store: Arc<S>, tracker: P, queue: RetryQueue) -> Self {
        Self {
            store,
            tracker,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn tracker(&self) -> &P {
        &self.tracker
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.queue
    }

    pub fn into_queue(self) -> RetryQueue {
        self.queue
    }

    pub async fn persist(&mut self, run: FinishedRun) -> SaveReport {
        self.persist_at(run, Utc::now()).await
    }

    pub async fn persist_at(&mut self, run: FinishedRun, now: DateTime<Utc>) -> SaveReport {
        let FinishedRun { session, blocks } = run;

        let id = match self.store.create_session_outcome(&session).await {
            Ok(id) => id,
            Err(err) => {
                let message = err.to_string();
                let blocks_queued = blocks.len();
                let entry = self
                    .queue
                    .enqueue(PendingPayload::FullSession { session, blocks }, &message, now);
                self.save_queue();
                return SaveReport {
                    status: SaveStatus::Queued,
                    session_outcome_id: None,
                    blocks_saved: 0,
                    blocks_queued,
                    queued_entry: Some(entry),
                    error: Some(message),
                    progress_updated: false,
                    retried: FlushReport::default(),
                };
            }
        };

        let writes = self.write_blocks(&id, blocks).await;
        let progress_updated = self.update_progress(&session.student_id, &writes.saved, now).await;

        // The store answered, so older entries are worth another try.
        let retried = self.flush_retry_queue_at(FlushMode::Ready, now).await;

        let blocks_queued = writes.failed.len();
        let (status, queued_entry, error) = if writes.failed.is_empty() {
            (SaveStatus::Saved, None, None)
        } else {
            let message = writes.failed[0].1.to_string();
            let payload = PendingPayload::BlockOutcomes {
                session_outcome_id: id.clone(),
                student_id: session.student_id.clone(),
                blocks: writes.failed.into_iter().map(|(block, _)| block).collect(),
            };
            let entry = self.queue.enqueue(payload, &message, now);
            (SaveStatus::PartiallySaved, Some(entry), Some(message))
        };
        self.save_queue();

        tracing::info!(
            id = %id,
            saved = writes.saved.len(),
            queued = blocks_queued,
            "session outcome saved"
        );
        SaveReport {
            status,
            session_outcome_id: Some(id),
            blocks_saved: writes.saved.len(),
            blocks_queued,
            queued_entry,
            error,
            progress_updated,
            retried,
        }
    }

    pub async fn flush_retry_queue(&mut self, mode: FlushMode) -> FlushReport {
        self.flush_retry_queue_at(mode, Utc::now()).await
    }

    /// Retry queued saves. Entries that fail again are requeued with a
    /// longer backoff; partially successful entries shrink to what is left.
    pub async fn flush_retry_queue_at(&mut self, mode: FlushMode, now: DateTime<Utc>) -> FlushReport {
        let entries = match mode {
            FlushMode::Ready => self.queue.take_ready(now),
            FlushMode::All => self.queue.take_all(),
        };
        let mut report = FlushReport {
            attempted: entries.len(),
            ..Default::default()
        };
        if entries.is_empty() {
            return report;
        }

        let mut requeue = Vec::new();
        for mut entry in entries {
            match self.retry(entry.payload.clone(), now).await {
                Ok(()) => report.succeeded += 1,
                Err((remaining, err)) => {
                    entry.payload = remaining;
                    requeue.push((entry, err.to_string()));
                }
            }
        }
        report.requeued = requeue.len();
        for (entry, message) in requeue {
            self.queue.requeue(entry, &message, now);
        }
        self.save_queue();

        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            requeued = report.requeued,
            "retry queue flushed"
        );
        report
    }

    // ── Internal ─────────────────────────────────────────────────────

    async fn retry(
        &self,
        payload: PendingPayload,
        now: DateTime<Utc>,
    ) -> Result<(), (PendingPayload, StoreError)> {
        let (id, student_id, blocks) = match payload {
            PendingPayload::FullSession { session, blocks } => {
                let id = match self.store.create_session_outcome(&session).await {
                    Ok(id) => id,
                    Err(err) => return Err((PendingPayload::FullSession { session, blocks }, err)),
                };
                (id, session.student_id, blocks)
            }
            PendingPayload::BlockOutcomes {
                session_outcome_id,
                student_id,
                blocks,
            } => (session_outcome_id, student_id, blocks),
        };

        let writes = self.write_blocks(&id, blocks).await;
        self.update_progress(&student_id, &writes.saved, now).await;
        let Some(first_error) = writes.failed.first().map(|(_, e)| e.clone()) else {
            return Ok(());
        };
        Err((
            PendingPayload::BlockOutcomes {
                session_outcome_id: id,
                student_id,
                blocks: writes.failed.into_iter().map(|(block, _)| block).collect(),
            },
            first_error,
        ))
    }

    async fn write_blocks(&self, id: &OutcomeId, blocks: Vec<BlockOutcome>) -> BlockWrites {
        // Copies of in-flight blocks, so a task that dies still gets queued.
        let mut in_flight = BTreeMap::new();
        let mut tasks = JoinSet::new();
        for (slot, block) in blocks.into_iter().enumerate() {
            in_flight.insert(slot, block.clone());
            let store = Arc::clone(&self.store);
            let id = id.clone();
            tasks.spawn(async move {
                let result = store.create_block_outcome(&id, &block).await;
                (slot, result)
            });
        }

        let mut writes = BlockWrites {
            saved: Vec::new(),
            failed: Vec::new(),
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((slot, result)) => {
                    let Some(block) = in_flight.remove(&slot) else {
                        continue;
                    };
                    match result {
                        Ok(()) => writes.saved.push(block),
                        Err(err) => writes.failed.push((block, err)),
                    }
                }
                Err(err) => tracing::error!(error = %err, "block write task did not complete"),
            }
        }
        for block in in_flight.into_values() {
            let err = StoreError::Unavailable("block write task did not complete".into());
            writes.failed.push((block, err));
        }
        writes.saved.sort_by_key(|block| block.position);
        writes.failed.sort_by_key(|(block, _)| block.position);
        writes
    }

    /// Credit saved blocks to the tracker. Nothing saved, nothing credited.
    async fn update_progress(&self, student_id: &str, saved: &[BlockOutcome], now: DateTime<Utc>) -> bool {
        if saved.is_empty() {
            return false;
        }
        let update = ProgressUpdate {
            student_id: student_id.to_string(),
            outcomes: saved.to_vec(),
            practised_at: now,
        };
        match self.tracker.update_progress(&update).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(student = %student_id, error = %err, "progress update failed");
                false
            }
        }
    }

    fn save_queue(&self) {
        if let Err(err) = self.queue.persist() {
            tracing::warn!(error = %err, "could not write retry queue file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{EndReason, OutcomeKind, SessionOutcome};
    use crate::persist::{MemoryOutcomeStore, NoProgress, RetryPolicy};
    use crate::plan::{ExerciseKind, Focus};
    use async_trait::async_trait;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn block(position: usize) -> BlockOutcome {
        BlockOutcome {
            position,
            code: format!("B{position}"),
            name: "Block".into(),
            kind: ExerciseKind::CoreTechnique,
            round_id: None,
            repetition: None,
            variation_key: None,
            backpack_key: format!("B{position}"),
            outcome: OutcomeKind::Completed,
            elapsed_secs: 60,
            target_secs: 60,
            target_bpm: None,
            measured_bpm: None,
            started_at: at(0),
            finished_at: at(60),
        }
    }

    fn run(blocks: usize) -> FinishedRun {
        FinishedRun {
            session: SessionOutcome {
                student_id: "stu".into(),
                assignment_id: "asg".into(),
                week_index: 0,
                session_index: 0,
                week_name: "W1".into(),
                session_name: "Monday".into(),
                focus: Focus::General,
                total_items: blocks,
                completed_items: blocks,
                omitted_items: 0,
                total_elapsed_secs: 60 * blocks as u64,
                planned_duration_secs: 60 * blocks as u64,
                rating: Some(4),
                note: None,
                media_links: vec![],
                started_at: at(0),
                finished_at: at(600),
                ended_early: false,
                end_reason: EndReason::Completed,
            },
            blocks: (0..blocks).map(block).collect(),
        }
    }

    fn persister(store: Arc<MemoryOutcomeStore>) -> OutcomePersister<MemoryOutcomeStore, NoProgress> {
        let policy = RetryPolicy {
            base_delay_secs: 10,
            max_delay_secs: 60,
        };
        OutcomePersister::new(store, NoProgress, RetryQueue::new(policy))
    }

    #[tokio::test]
    async fn saves_session_and_all_blocks() {
        let store = Arc::new(MemoryOutcomeStore::new());
        let mut p = persister(store.clone());
        let report = p.persist_at(run(4), at(600)).await;

        assert_eq!(report.status, SaveStatus::Saved);
        assert_eq!(report.blocks_saved, 4);
        assert!(report.progress_updated);
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.blocks().len(), 4);
        assert!(p.queue().is_empty());
    }

    #[tokio::test]
    async fn session_failure_queues_everything() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_next_sessions(1);
        let mut p = persister(store.clone());
        let report = p.persist_at(run(3), at(600)).await;

        assert_eq!(report.status, SaveStatus::Queued);
        assert_eq!(report.blocks_queued, 3);
        assert!(store.blocks().is_empty());
        assert!(matches!(
            p.queue().entries()[0].payload,
            PendingPayload::FullSession { .. }
        ));

        let flushed = p.flush_retry_queue_at(FlushMode::Ready, at(601)).await;
        assert_eq!(flushed.succeeded, 1);
        assert_eq!(store.blocks().len(), 3);
        assert!(p.queue().is_empty());
    }

    #[tokio::test]
    async fn failed_blocks_are_queued_against_saved_session() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_block(1);
        let mut p = persister(store.clone());
        let report = p.persist_at(run(3), at(600)).await;

        assert_eq!(report.status, SaveStatus::PartiallySaved);
        assert_eq!(report.blocks_saved, 2);
        assert_eq!(report.blocks_queued, 1);
        let id = report.session_outcome_id.unwrap();
        match &p.queue().entries()[0].payload {
            PendingPayload::BlockOutcomes {
                session_outcome_id,
                blocks,
                ..
            } => {
                assert_eq!(session_outcome_id, &id);
                assert_eq!(blocks.len(), 1);
                assert_eq!(blocks[0].position, 1);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        // Still failing: requeued with backoff.
        let again = p.flush_retry_queue_at(FlushMode::Ready, at(600)).await;
        assert_eq!(again.requeued, 1);
        assert_eq!(p.queue().entries()[0].attempts, 1);
        assert_eq!(p.queue().next_attempt_at(), Some(at(620)));

        store.clear_failures();
        assert_eq!(p.flush_retry_queue_at(FlushMode::Ready, at(610)).await.attempted, 0);
        let done = p.flush_retry_queue_at(FlushMode::All, at(610)).await;
        assert_eq!(done.succeeded, 1);
        assert_eq!(store.blocks().len(), 3);
    }

    #[tokio::test]
    async fn successful_save_drains_ready_entries() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_next_sessions(1);
        let mut p = persister(store.clone());
        p.persist_at(run(1), at(0)).await;
        assert_eq!(p.queue().len(), 1);

        let report = p.persist_at(run(2), at(30)).await;
        assert_eq!(report.retried.succeeded, 1);
        assert_eq!(store.sessions().len(), 2);
        assert_eq!(store.blocks().len(), 3);
        assert!(p.queue().is_empty());
    }

    struct BrokenTracker;

    #[async_trait]
    impl ProgressTracker for BrokenTracker {
        async fn update_progress(&self, _: &ProgressUpdate) -> Result<(), StoreError> {
            Err(StoreError::Rejected("backpack offline".into()))
        }
    }

    #[tokio::test]
    async fn tracker_failure_does_not_fail_the_save() {
        let store = Arc::new(MemoryOutcomeStore::new());
        let mut p = OutcomePersister::new(store, BrokenTracker, RetryQueue::new(RetryPolicy::default()));
        let report = p.persist_at(run(2), at(0)).await;
        assert_eq!(report.status, SaveStatus::Saved);
        assert!(!report.progress_updated);
    }

    /// Records which blocks each progress update carried.
    #[derive(Default)]
    struct RecordingTracker {
        updates: std::sync::Mutex<Vec<Vec<usize>>>,
    }

    impl RecordingTracker {
        fn positions(&self) -> Vec<Vec<usize>> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProgressTracker for RecordingTracker {
        async fn update_progress(&self, update: &ProgressUpdate) -> Result<(), StoreError> {
            let positions = update.outcomes.iter().map(|o| o.position).collect();
            self.updates.lock().unwrap().push(positions);
            Ok(())
        }
    }

    fn recording_persister(
        store: Arc<MemoryOutcomeStore>,
    ) -> OutcomePersister<MemoryOutcomeStore, RecordingTracker> {
        OutcomePersister::new(store, RecordingTracker::default(), RetryQueue::new(RetryPolicy::default()))
    }

    #[tokio::test]
    async fn progress_waits_for_blocks_to_be_written() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_block(0);
        store.fail_block(1);
        let mut p = recording_persister(store.clone());
        let report = p.persist_at(run(2), at(0)).await;

        assert_eq!(report.status, SaveStatus::PartiallySaved);
        assert_eq!(report.blocks_saved, 0);
        assert!(!report.progress_updated);
        assert!(p.tracker().positions().is_empty());

        store.clear_failures();
        let flushed = p.flush_retry_queue_at(FlushMode::All, at(10)).await;
        assert_eq!(flushed.succeeded, 1);
        assert_eq!(p.tracker().positions(), vec![vec![0, 1]]);
    }

    #[tokio::test]
    async fn progress_covers_only_saved_blocks() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_block(1);
        let mut p = recording_persister(store.clone());
        let report = p.persist_at(run(3), at(0)).await;

        assert!(report.progress_updated);
        assert_eq!(p.tracker().positions(), vec![vec![0, 2]]);

        store.clear_failures();
        p.flush_retry_queue_at(FlushMode::All, at(10)).await;
        assert_eq!(p.tracker().positions(), vec![vec![0, 2], vec![1]]);
    }

    #[tokio::test]
    async fn queued_session_credits_progress_once_saved() {
        let store = Arc::new(MemoryOutcomeStore::new());
        store.fail_next_sessions(1);
        let mut p = recording_persister(store.clone());
        let report = p.persist_at(run(2), at(0)).await;
        assert!(!report.progress_updated);
        assert!(p.tracker().positions().is_empty());

        p.flush_retry_queue_at(FlushMode::All, at(10)).await;
        assert_eq!(p.tracker().positions(), vec![vec![0, 1]]);
    }

    /// Store whose write task panics for one block position.
    struct PanickingStore {
        inner: MemoryOutcomeStore,
        panic_on: usize,
    }

    #[async_trait]
    impl OutcomeStore for PanickingStore {
        async fn create_session_outcome(&self, outcome: &SessionOutcome) -> Result<OutcomeId, StoreError> {
            self.inner.create_session_outcome(outcome).await
        }

        async fn create_block_outcome(&self, session_id: &OutcomeId, outcome: &BlockOutcome) -> Result<(), StoreError> {
            if outcome.position == self.panic_on {
                panic!("writer crashed");
            }
            self.inner.create_block_outcome(session_id, outcome).await
        }
    }

    #[tokio::test]
    async fn crashed_block_write_is_queued() {
        let store = Arc::new(PanickingStore {
            inner: MemoryOutcomeStore::new(),
            panic_on: 1,
        });
        let mut p = OutcomePersister::new(store.clone(), NoProgress, RetryQueue::new(RetryPolicy::default()));
        let report = p.persist_at(run(3), at(0)).await;

        assert_eq!(report.status, SaveStatus::PartiallySaved);
        assert_eq!(report.blocks_saved, 2);
        assert_eq!(report.blocks_queued, 1);
        match &p.queue().entries()[0].payload {
            PendingPayload::BlockOutcomes { blocks, .. } => assert_eq!(blocks[0].position, 1),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
