use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use clap::Args;
use studia_core::outcome::{RunContext, SessionFeedback};
use studia_core::persist::FlushMode;
use studia_core::run::{RunController, RunOptions, RunStatus};
use studia_core::timer::{Clock, ManualClock, SystemClock};
use studia_core::{Config, InMemoryCatalog, Key, SaveStatus};

use super::{load_assignment, open_persister, runtime, CliResult, SessionSelector, StudiaPersister};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub selector: SessionSelector,
    /// Exercise catalog JSON file (array of entries)
    #[arg(long)]
    pub catalog: Option<PathBuf>,
    /// Student level; defaults to student.default_level
    #[arg(long)]
    pub level: Option<u32>,
    /// Seed for shuffles and random variations; defaults to run.seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Session rating (1-4)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub rating: Option<u8>,
    /// Session note
    #[arg(long)]
    pub note: Option<String>,
    /// Drive time with `wait:N` tokens instead of the wall clock
    #[arg(long)]
    pub simulated_clock: bool,
    /// Print every run event as a JSON line
    #[arg(long)]
    pub events: bool,
    /// Print the outcomes instead of saving them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Clone)]
enum CliClock {
    System(SystemClock),
    Simulated(ManualClock),
}

impl Clock for CliClock {
    fn now_ms(&self) -> u64 {
        match self {
            CliClock::System(clock) => clock.now_ms(),
            CliClock::Simulated(clock) => clock.now_ms(),
        }
    }
}

impl CliClock {
    fn wait(&self, secs: u64) {
        match self {
            CliClock::System(_) => std::thread::sleep(std::time::Duration::from_secs(secs)),
            CliClock::Simulated(clock) => clock.advance_secs(secs),
        }
    }
}

pub fn run(args: RunArgs) -> CliResult {
    let config = Config::load()?;
    let assignment = load_assignment(&args.selector.assignment)?;
    let found = args.selector.locate(&assignment)?;
    let catalog = match &args.catalog {
        Some(path) => InMemoryCatalog::load_json(path)?,
        None => InMemoryCatalog::new(),
    };

    let rt = runtime()?;
    let mut persister = if args.dry_run {
        None
    } else {
        let mut persister = open_persister(&config)?;
        let flushed = rt.block_on(persister.flush_retry_queue(FlushMode::Ready));
        if flushed.attempted > 0 {
            eprintln!(
                "retried {} queued save(s): {} succeeded, {} still pending",
                flushed.attempted, flushed.succeeded, flushed.requeued
            );
        }
        Some(persister)
    };

    let clock = if args.simulated_clock {
        CliClock::Simulated(ManualClock::new(SystemClock.now_ms()))
    } else {
        CliClock::System(SystemClock)
    };
    let options = RunOptions {
        student_level: args.level.unwrap_or(u32::from(config.student.default_level)),
        ceiling_secs: config.timer.ceiling_secs,
        seed: args.seed.or(config.run.seed),
        has_focus: true,
    };
    let context = RunContext {
        student_id: assignment.student_id.clone(),
        assignment_id: assignment.id.clone(),
        week_index: found.week_index,
        session_index: found.session_index,
        week_name: found.week.name.clone(),
    };
    let mut run = RunController::start(context, found.session, &catalog, options, clock.clone())?;

    let tick = Duration::from_millis(config.timer.tick_interval_ms.max(1));
    drive(&mut run, &clock, &read_tokens(), tick, args.events)?;

    match run.status() {
        RunStatus::Discarded => {
            println!("run discarded");
            Ok(())
        }
        RunStatus::Active => Err("run did not finish".into()),
        RunStatus::Finished(_) => {
            let feedback = SessionFeedback {
                rating: args.rating,
                note: args.note,
                media_links: Vec::new(),
            };
            // Never lose a finished run over its feedback.
            let finished = match run.finish(feedback) {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::warn!(error = %e, "feedback rejected, saving without it");
                    run.finish(SessionFeedback::default())?
                }
            };
            match persister.as_mut() {
                None => println!("{}", serde_json::to_string_pretty(&finished)?),
                Some(persister) => save(&rt, persister, finished)?,
            }
            Ok(())
        }
    }
}

/// Stdin tokens, read on their own thread so the run keeps ticking while
/// the student is idle.
fn read_tokens() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            for token in line.split_whitespace() {
                if tx.send(token.to_string()).is_err() {
                    return;
                }
            }
        }
    });
    rx
}

/// Feed tokens to the run until it ends or input runs out, ticking every
/// `tick` in between.
fn drive(
    run: &mut RunController<CliClock>,
    clock: &CliClock,
    tokens: &Receiver<String>,
    tick: Duration,
    print_events: bool,
) -> CliResult {
    let mut shown = None;
    announce(run, &mut shown);
    loop {
        match tokens.recv_timeout(tick) {
            Ok(token) => {
                // Time that passed before the token may already end the run.
                run.tick();
                if run.is_active() {
                    apply(run, clock, &token);
                    run.tick();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                run.tick();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        flush_events(run, print_events)?;
        if !run.is_active() {
            return Ok(());
        }
        announce(run, &mut shown);
    }
    if run.is_active() {
        tracing::info!("input closed, ending run early");
        run.cancel_run(true);
        flush_events(run, print_events)?;
    }
    Ok(())
}

fn apply(run: &mut RunController<CliClock>, clock: &CliClock, token: &str) {
    if let Some(secs) = token.strip_prefix("wait:") {
        match secs.parse::<u64>() {
            Ok(secs) => clock.wait(secs),
            Err(_) => tracing::warn!(token, "expected wait:<seconds>"),
        }
        return;
    }
    if let Some(bpm) = token.strip_prefix("bpm:") {
        match bpm.parse::<u32>() {
            Ok(bpm) => {
                if let Err(e) = run.advance_complete(Some(bpm)) {
                    tracing::warn!(error = %e, "complete ignored");
                }
            }
            Err(_) => tracing::warn!(token, "expected bpm:<tempo>"),
        }
        return;
    }
    match token {
        "cancel" => run.cancel_run(true),
        "discard" => run.cancel_run(false),
        "restart" => run.restart(),
        "focus" => run.set_focus(true),
        "blur" => run.set_focus(false),
        "status" => match serde_json::to_string(&run.snapshot()) {
            Ok(json) => eprintln!("{json}"),
            Err(e) => tracing::warn!(error = %e, "cannot render snapshot"),
        },
        _ => match Key::parse(token) {
            Some(key) => {
                if run.handle_key(key).is_none() {
                    tracing::debug!(token, "key ignored");
                }
            }
            None => tracing::warn!(token, "unknown input"),
        },
    }
}

fn announce(run: &RunController<CliClock>, shown: &mut Option<usize>) {
    if *shown == Some(run.position()) {
        return;
    }
    *shown = Some(run.position());
    if let Some(item) = run.current() {
        eprintln!(
            "[{}/{}] {} {}",
            run.position() + 1,
            run.items().len(),
            item.source_code,
            item.block.block.name
        );
    }
}

fn flush_events(run: &mut RunController<CliClock>, print: bool) -> CliResult {
    for event in run.drain_events() {
        if print {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
    Ok(())
}

fn save(
    rt: &tokio::runtime::Runtime,
    persister: &mut StudiaPersister,
    finished: studia_core::FinishedRun,
) -> CliResult {
    let completed = finished.session.completed_items;
    let omitted = finished.session.omitted_items;
    let elapsed = finished.session.total_elapsed_secs;
    let report = rt.block_on(persister.persist(finished));
    match report.status {
        SaveStatus::Saved => println!(
            "saved {}: {completed} completed, {omitted} omitted, {elapsed}s",
            report.session_outcome_id.map(|id| id.0).unwrap_or_default()
        ),
        SaveStatus::PartiallySaved => println!(
            "saved with {} block(s) queued for retry: {}",
            report.blocks_queued,
            report.error.unwrap_or_default()
        ),
        SaveStatus::Queued => println!(
            "save failed, queued for retry: {}",
            report.error.unwrap_or_default()
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use studia_core::outcome::RunContext;
    use studia_core::plan::{ExerciseBlock, ExerciseKind, Focus, SessionDefinition};
    use studia_core::EndReason;

    const T0: u64 = 1_760_000_000_000;

    fn start(clock: &CliClock) -> RunController<CliClock> {
        let session = SessionDefinition::new(
            "Monday",
            Focus::General,
            vec![
                ExerciseBlock::new("TC", ExerciseKind::CoreTechnique, "Scales", 120),
                ExerciseBlock::new("FM", ExerciseKind::PieceFragment, "Bars 1-8", 90),
            ],
        );
        let context = RunContext {
            student_id: "stu".into(),
            assignment_id: "asg".into(),
            week_index: 0,
            session_index: 0,
            week_name: "W1".into(),
        };
        RunController::start(context, &session, &InMemoryCatalog::new(), RunOptions::default(), clock.clone())
            .unwrap()
    }

    fn simulated() -> (CliClock, ManualClock) {
        let manual = ManualClock::new(T0);
        (CliClock::Simulated(manual.clone()), manual)
    }

    #[test]
    fn idle_run_reaches_ceiling_without_input() {
        let (clock, manual) = simulated();
        let mut run = start(&clock);
        manual.advance_secs(6 * 3600);

        let (_tx, rx) = mpsc::channel::<String>();
        drive(&mut run, &clock, &rx, Duration::from_millis(1), false).unwrap();

        assert_eq!(run.status(), RunStatus::Finished(EndReason::CeilingReached));
        assert!(run.outcome_at(0).is_none());
    }

    #[test]
    fn late_token_does_not_record_past_the_ceiling() {
        let (clock, manual) = simulated();
        let mut run = start(&clock);
        manual.advance_secs(6 * 3600);

        let (tx, rx) = mpsc::channel();
        tx.send("enter".to_string()).unwrap();
        drive(&mut run, &clock, &rx, Duration::from_secs(60), false).unwrap();

        assert_eq!(run.status(), RunStatus::Finished(EndReason::CeilingReached));
        assert!(run.outcome_at(0).is_none());
    }

    #[test]
    fn closed_input_cancels_and_keeps_outcomes() {
        let (clock, _) = simulated();
        let mut run = start(&clock);
        let (tx, rx) = mpsc::channel();
        tx.send("wait:30".to_string()).unwrap();
        tx.send("enter".to_string()).unwrap();
        drop(tx);
        drive(&mut run, &clock, &rx, Duration::from_secs(60), false).unwrap();

        assert_eq!(run.status(), RunStatus::Finished(EndReason::Cancelled));
        assert_eq!(run.outcome_at(0).map(|o| o.elapsed_secs), Some(30));
    }
}
