//! CLI entrypoint for the strand conformance harness.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use strand_harness::scenarios::{self, ScenarioReport};
use strand_harness::HarnessError;

/// Conformance tooling for strand.
#[derive(Debug, Parser)]
#[command(name = "strand-harness")]
#[command(about = "Conformance scenario harness for strand")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scenario (or all of them) and emit a JSON evidence record.
    Run {
        /// Scenario name, or "all".
        #[arg(long, default_value = "all")]
        scenario: String,
        /// Output path for the JSON report (stdout if omitted).
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// List available scenarios.
    List,
}

fn run(command: Command) -> Result<bool, HarnessError> {
    match command {
        Command::List => {
            for name in scenarios::SCENARIOS {
                println!("{name}");
            }
            Ok(true)
        }
        Command::Run { scenario, json } => {
            let reports: Vec<ScenarioReport> = if scenario == "all" {
                scenarios::run_all()?
            } else {
                vec![scenarios::run(&scenario)?]
            };
            let rendered = serde_json::to_string_pretty(&reports)?;
            match json {
                Some(path) => std::fs::write(path, rendered)?,
                None => println!("{rendered}"),
            }
            Ok(reports.iter().all(|report| report.passed))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("harness error: {err}");
            ExitCode::FAILURE
        }
    }
}
