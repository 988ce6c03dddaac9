pub mod config;
pub mod flatten;
pub mod queue;
pub mod run;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use studia_core::persist::{OutcomePersister, RetryQueue};
use studia_core::plan::{Assignment, SessionRef};
use studia_core::storage::{data_dir, Config};
use studia_core::{BackpackTracker, SqliteStore};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Persister wired to the data directory's database and queue file.
pub type StudiaPersister = OutcomePersister<SqliteStore, BackpackTracker<SqliteStore>>;

pub fn load_assignment(path: &Path) -> CliResult<Assignment> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&content)?)
}

/// How a command picks its session.
#[derive(clap::Args, Debug, Clone)]
pub struct SessionSelector {
    /// Assignment JSON file
    pub assignment: PathBuf,
    /// Session index within the week
    #[arg(long, default_value = "0")]
    pub session: usize,
    /// Week index; defaults to the week containing --date
    #[arg(long)]
    pub week: Option<usize>,
    /// Practice date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

impl SessionSelector {
    pub fn locate<'a>(&self, assignment: &'a Assignment) -> CliResult<SessionRef<'a>> {
        let found = match self.week {
            Some(week) => assignment.session_at(week, self.session)?,
            None => {
                let today = self
                    .date
                    .unwrap_or_else(|| chrono::Local::now().date_naive());
                assignment.locate_session(today, self.session)?
            }
        };
        Ok(found)
    }
}

pub fn open_persister(config: &Config) -> CliResult<StudiaPersister> {
    let dir = data_dir()?;
    let store = Arc::new(SqliteStore::open_at(&dir.join("studia.db"))?);
    let tracker = BackpackTracker::new(Arc::clone(&store));
    let queue = RetryQueue::with_path(config.retry_policy(), config.queue_path(&dir))?;
    Ok(OutcomePersister::new(store, tracker, queue))
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}
