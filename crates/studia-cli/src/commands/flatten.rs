use clap::Args;
use studia_core::sequence::{estimated_duration_secs, flatten, seeded_rng};
use studia_core::Config;

use super::{load_assignment, CliResult, SessionSelector};

#[derive(Args)]
pub struct FlattenArgs {
    #[command(flatten)]
    pub selector: SessionSelector,
    /// Seed for round shuffles; falls back to run.seed, then entropy
    #[arg(long)]
    pub seed: Option<u64>,
    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct EstimateArgs {
    #[command(flatten)]
    pub selector: SessionSelector,
}

pub fn run(args: FlattenArgs) -> CliResult {
    let assignment = load_assignment(&args.selector.assignment)?;
    let found = args.selector.locate(&assignment)?;
    let seed = args.seed.or(Config::load_or_default().run.seed);
    let flat = flatten(found.session, &mut seeded_rng(seed));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&flat)?);
        return Ok(());
    }
    for (position, item) in flat.items.iter().enumerate() {
        let round = item
            .round
            .as_ref()
            .map(|r| format!("  round {} rep {}/{}", r.round_id.0, r.repetition, r.total_repetitions))
            .unwrap_or_default();
        println!(
            "{position:>3}  {:<4} {:<2} {}{round}",
            item.source_code,
            item.block.block.kind.code(),
            item.block.block.name
        );
    }
    for warning in &flat.warnings {
        eprintln!("warning: {}", serde_json::to_string(warning)?);
    }
    Ok(())
}

pub fn estimate(args: EstimateArgs) -> CliResult {
    let assignment = load_assignment(&args.selector.assignment)?;
    let found = args.selector.locate(&assignment)?;
    let secs = estimated_duration_secs(found.session);
    println!(
        "{}: {secs}s ({}m {}s)",
        found.session.name,
        secs / 60,
        secs % 60
    );
    Ok(())
}
