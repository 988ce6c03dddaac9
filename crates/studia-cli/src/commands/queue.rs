use clap::Subcommand;
use studia_core::persist::{FlushMode, PendingPayload, RetryQueue};
use studia_core::storage::data_dir;
use studia_core::Config;

use super::{open_persister, runtime, CliResult};

#[derive(Subcommand)]
pub enum QueueAction {
    /// List queued saves
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Retry queued saves now
    Flush {
        /// Ignore backoff and retry every entry
        #[arg(long)]
        all: bool,
    },
}

pub fn run(action: QueueAction) -> CliResult {
    let config = Config::load()?;
    match action {
        QueueAction::Status { json } => {
            let queue = RetryQueue::with_path(config.retry_policy(), config.queue_path(&data_dir()?))?;
            if json {
                println!("{}", serde_json::to_string_pretty(queue.entries())?);
                return Ok(());
            }
            if queue.is_empty() {
                println!("retry queue is empty");
                return Ok(());
            }
            for entry in queue.entries() {
                let kind = match &entry.payload {
                    PendingPayload::FullSession { .. } => "session",
                    PendingPayload::BlockOutcomes { .. } => "blocks",
                };
                println!(
                    "{}  {kind:<7} blocks={} attempts={} next={} {}",
                    entry.id,
                    entry.payload.block_count(),
                    entry.attempts,
                    entry.next_attempt_at.to_rfc3339(),
                    entry.last_error.as_deref().unwrap_or("")
                );
            }
        }
        QueueAction::Flush { all } => {
            let mode = if all { FlushMode::All } else { FlushMode::Ready };
            let mut persister = open_persister(&config)?;
            let report = runtime()?.block_on(persister.flush_retry_queue(mode));
            println!(
                "attempted {}, succeeded {}, requeued {}, remaining {}",
                report.attempted,
                report.succeeded,
                report.requeued,
                persister.queue().len()
            );
        }
    }
    Ok(())
}
