//! # Studia Core Library
//!
//! This library provides the practice-session engine behind Studia: a
//! student works through a teacher-assigned plan one session at a time,
//! and every exercise is timed and recorded. The CLI binary and any GUI
//! are thin layers over the same core library.
//!
//! ## Architecture
//!
//! - **Plan**: assignments, weeks, sessions, blocks and rounds
//! - **Sequence**: flattens a session into ordered execution items
//! - **Variation**: picks the concrete content of each block once per run
//! - **Timer Engine**: a wall-clock-based state machine that requires the
//!   caller to periodically invoke `tick()`
//! - **Run**: complete/omit/back/jump over the sequence, buffering outcomes
//! - **Persist**: writes outcomes through a store, queuing failures for retry
//! - **Storage**: SQLite outcome and backpack storage, TOML configuration
//!
//! ## Key Components
//!
//! - [`RunController`]: Drives one practice run
//! - [`TimerEngine`]: Per-item timer state machine
//! - [`OutcomePersister`]: Saves finished runs with retry
//! - [`Database`]: Outcome and progress persistence
//! - [`Config`]: Application configuration management

pub mod error;
pub mod events;
pub mod input;
pub mod outcome;
pub mod persist;
pub mod plan;
pub mod progress;
pub mod run;
pub mod sequence;
pub mod storage;
pub mod timer;
pub mod variation;

pub use error::{ConfigError, CoreError, DatabaseError, StoreError, StructuralError, ValidationError};
pub use events::Event;
pub use input::{dispatch, Command, Key, KeyContext};
pub use outcome::{BlockOutcome, EndReason, OutcomeId, OutcomeKind, RunContext, SessionFeedback, SessionOutcome};
pub use persist::{OutcomePersister, OutcomeStore, ProgressTracker, RetryPolicy, RetryQueue, SaveReport, SaveStatus};
pub use plan::{Assignment, ExerciseBlock, ExerciseKind, SessionDefinition};
pub use progress::{BackpackItem, BackpackRepository, BackpackStatus, BackpackTracker};
pub use run::{FinishedRun, RunController, RunOptions, RunSnapshot, RunStatus};
pub use sequence::{flatten, ExecutionItem, FlattenWarning};
pub use storage::{Config, Database, SqliteStore};
pub use timer::{Clock, Overlay, OverlayEvent, SystemClock, TimerEngine, TimerState};
pub use variation::{Catalog, CatalogEntry, InMemoryCatalog};
