use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "studia-cli", version, about = "Studia practice CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Practise a session, reading keys from stdin
    Run(commands::run::RunArgs),
    /// Print the execution sequence of a session
    Flatten(commands::flatten::FlattenArgs),
    /// Print the planned practice time of a session
    Estimate(commands::flatten::EstimateArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Inspect or flush the retry queue
    Queue {
        #[command(subcommand)]
        action: commands::queue::QueueAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("STUDIA_LOG")
        .unwrap_or_else(|_| EnvFilter::new("studia_core=info,studia_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args),
        Commands::Flatten(args) => commands::flatten::run(args),
        Commands::Estimate(args) => commands::flatten::estimate(args),
        Commands::Config { action } => commands::config::run(action),
        Commands::Queue { action } => commands::queue::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
