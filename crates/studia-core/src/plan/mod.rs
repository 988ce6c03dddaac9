//! Plan data model: assignments, weeks, sessions, blocks and rounds.

mod assignment;
mod block;
mod session;

pub use assignment::{monday_of, Assignment, AssignmentStatus, Plan, SessionRef, Week};
pub use block::{ExerciseBlock, ExerciseKind, TempoTarget, VariationPolicy};
pub use session::{Focus, Round, RoundId, SessionDefinition};
