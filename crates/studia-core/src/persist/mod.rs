//! Outcome persistence: storage seams, the retry queue and the persister.

mod persister;
mod retry_queue;
mod store;

pub use persister::{FlushMode, FlushReport, OutcomePersister, SaveReport, SaveStatus};
pub use retry_queue::{PendingPayload, PendingSave, RetryPolicy, RetryQueue};
pub use store::{
    MemoryOutcomeStore, NoProgress, OutcomeStore, ProgressTracker, ProgressUpdate,
};
