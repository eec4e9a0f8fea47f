use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(
    name = "zkarch",
    version,
    about = "Archive a Zettelkasten corpus: extract identifiers, snapshot, download and convert records, and reconcile to completeness."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover identifiers from index HTML files or link lists and merge
    /// them into the universe
    Extract {
        #[arg(long = "input", value_name = "FILE", required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Reconcile the pipeline: repeated passes per stage until complete or
    /// stalled
    Run {
        /// Re-attempt every identifier, not just what is missing
        #[arg(long)]
        full: bool,
        /// Concurrent workers per stage pass
        #[arg(long)]
        workers: Option<usize>,
        /// Bound on passes per stage
        #[arg(long)]
        max_passes: Option<u32>,
    },
    /// Completion stats per stage and anomaly counts; mutates nothing
    Status,
    /// Audit anomalies: duplicates, parse errors, artifact drift
    Verify {
        /// Treat any warning as a failure
        #[arg(long)]
        strict: bool,
    },
    /// Canonically sort a newline list of links or identifiers
    Reorder {
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn print_report(report: &CommandReport) {
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        eprintln!("issue: {issue}");
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Command::Extract { inputs } => {
            commands::extract::run(&commands::extract::ExtractOptions { inputs })?
        }
        Command::Run {
            full,
            workers,
            max_passes,
        } => commands::run::run(&commands::run::RunOptions {
            full,
            workers,
            max_passes,
        })?,
        Command::Status => commands::status::run()?,
        Command::Verify { strict } => {
            commands::verify::run(&commands::verify::VerifyOptions { strict })?
        }
        Command::Reorder { input, output } => {
            commands::reorder::run(&commands::reorder::ReorderOptions { input, output })?
        }
    };

    print_report(&report);
    if !report.ok {
        anyhow::bail!(
            "{} finished with {} issue(s)",
            report.command,
            report.issues.len()
        );
    }
    Ok(())
}
