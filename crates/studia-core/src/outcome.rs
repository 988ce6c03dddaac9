//! Per-block and per-session practice outcomes.
//!
//! Outcomes are built in memory while a run is in progress and written
//! once when the run finishes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::plan::{ExerciseKind, Focus, RoundId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Completed,
    Omitted,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Completed => "completed",
            OutcomeKind::Omitted => "omitted",
        }
    }
}

/// Why a run reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The last item was completed or omitted.
    Completed,
    /// The session time ceiling was hit.
    CeilingReached,
    /// The student ended the run early and chose to keep the results.
    Cancelled,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "completed",
            EndReason::CeilingReached => "ceiling_reached",
            EndReason::Cancelled => "cancelled",
        }
    }

    pub fn is_early(&self) -> bool {
        !matches!(self, EndReason::Completed)
    }
}

/// Identifier handed out by an outcome store for a saved session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutcomeId(pub String);

impl fmt::Display for OutcomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OutcomeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Result of one execution item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockOutcome {
    pub position: usize,
    pub code: String,
    pub name: String,
    pub kind: ExerciseKind,
    #[serde(default)]
    pub round_id: Option<RoundId>,
    #[serde(default)]
    pub repetition: Option<u32>,
    #[serde(default)]
    pub variation_key: Option<String>,
    pub backpack_key: String,
    pub outcome: OutcomeKind,
    /// Active seconds. Always 0 for omitted or advisory items.
    pub elapsed_secs: u64,
    pub target_secs: u64,
    #[serde(default)]
    pub target_bpm: Option<u32>,
    #[serde(default)]
    pub measured_bpm: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BlockOutcome {
    pub fn is_completed(&self) -> bool {
        self.outcome == OutcomeKind::Completed
    }
}

/// Who is practising what.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub student_id: String,
    pub assignment_id: String,
    pub week_index: usize,
    pub session_index: usize,
    #[serde(default)]
    pub week_name: String,
}

/// Rating, note and attachments given after a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub media_links: Vec<String>,
}

impl SessionFeedback {
    pub const MIN_RATING: u8 = 1;
    pub const MAX_RATING: u8 = 4;

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.rating {
            Some(r) if !(Self::MIN_RATING..=Self::MAX_RATING).contains(&r) => {
                Err(ValidationError::InvalidValue {
                    field: "rating".into(),
                    message: format!(
                        "must be between {} and {}, got {r}",
                        Self::MIN_RATING,
                        Self::MAX_RATING
                    ),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub student_id: String,
    pub assignment_id: String,
    pub week_index: usize,
    pub session_index: usize,
    pub week_name: String,
    pub session_name: String,
    pub focus: Focus,
    pub total_items: usize,
    pub completed_items: usize,
    pub omitted_items: usize,
    /// Sum of block elapsed time, capped at the session ceiling.
    pub total_elapsed_secs: u64,
    pub planned_duration_secs: u64,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub media_links: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ended_early: bool,
    pub end_reason: EndReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_must_be_in_range() {
        for rating in 1..=4 {
            let f = SessionFeedback {
                rating: Some(rating),
                ..Default::default()
            };
            assert!(f.validate().is_ok());
        }
        let bad = SessionFeedback {
            rating: Some(5),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(ValidationError::InvalidValue { field, .. }) if field == "rating"
        ));
        assert!(SessionFeedback::default().validate().is_ok());
    }

    #[test]
    fn end_reason_early_flag() {
        assert!(!EndReason::Completed.is_early());
        assert!(EndReason::CeilingReached.is_early());
        assert!(EndReason::Cancelled.is_early());
    }
}
