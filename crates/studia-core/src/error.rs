//! Core error types for studia-core.
//!
//! This module defines the error hierarchy using thiserror. Structural
//! errors are fatal for starting a run; store errors are recoverable and
//! end up in the retry queue.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for studia-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// The assignment, week or session cannot be used to start a run.
    #[error("Structural error: {0}")]
    Structural(#[from] StructuralError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Outcome storage errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Problems with plan data that prevent a run from starting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("assignment {assignment_id} has no weeks in its plan")]
    EmptyPlan { assignment_id: String },

    #[error("assignment {assignment_id} is not active (status: {status})")]
    AssignmentNotActive { assignment_id: String, status: String },

    #[error("week offset {offset} is outside the plan (weeks: {weeks})")]
    WeekOutOfRange { offset: i64, weeks: usize },

    #[error("session index {index} not found in week '{week}' (sessions: {len})")]
    SessionNotFound { week: String, index: usize, len: usize },

    #[error("session '{session}' has no blocks")]
    EmptySession { session: String },

    #[error("session '{session}' repeats block code '{code}'")]
    DuplicateBlockCode { session: String, code: String },

    #[error("session '{session}' produced an empty execution sequence")]
    EmptySequence { session: String },

    #[error("week start {0} is not a Monday")]
    WeekStartNotMonday(chrono::NaiveDate),
}

/// Failures reported by an outcome store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("session outcome {0} not found")]
    UnknownSession(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// No usable data directory
    #[error("Cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Out of bounds
    #[error("Index {index} out of bounds for {collection} (length: {len})")]
    OutOfBounds {
        collection: String,
        index: usize,
        len: usize,
    },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// The run already reached its terminal state.
    #[error("run is already finished")]
    RunFinished,

    /// Outcomes were requested before the run ended.
    #[error("run is still in progress")]
    RunInProgress,

    /// The run was cancelled without keeping its outcomes.
    #[error("run was discarded")]
    RunDiscarded,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Locked => StoreError::Unavailable("database is locked".into()),
            other => StoreError::Rejected(other.to_string()),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
