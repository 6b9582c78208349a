//! window-async CLI
//!
//! Runs JSON scenarios against an emulated window and prints a report.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use window_async::{Scenario, WindowConfig};

#[derive(Parser)]
#[command(name = "window-async")]
#[command(author, version, about = "Deterministic async-task tracking for an emulated browser window", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scenario file and print the report as JSON
    Run {
        /// The scenario to run
        scenario: PathBuf,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Print the default window configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run { scenario, pretty } => run_scenario(&scenario, pretty),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&WindowConfig::default())?);
            Ok(())
        }
    }
}

fn setup_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_scenario(path: &Path, pretty: bool) -> anyhow::Result<()> {
    let scenario = Scenario::from_file(path)
        .with_context(|| format!("failed to load scenario {}", path.display()))?;
    let report = scenario
        .run()
        .with_context(|| format!("scenario {} did not finish", path.display()))?;
    let out = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{out}");
    Ok(())
}
