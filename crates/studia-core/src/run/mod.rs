//! Run controller: walks a flattened session item by item.

mod controller;
mod snapshot;

pub use controller::{Advance, FinishedRun, RunController, RunOptions, RunStatus};
pub use snapshot::RunSnapshot;
