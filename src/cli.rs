use crate::commands::{self, CommandReport};
use crate::logging;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "archivist",
    version,
    about = "Snapshot chat conversations, summarize them incrementally and sync the summaries"
)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one full cycle: extract, summarize, sync.
    Run,
    /// Refresh conversation snapshots only.
    Extract,
    /// Summarize and sync snapshots that changed since their last marker.
    Summarize,
    /// Run cycles on the configured schedule.
    Watch {
        /// Run a single cycle and exit.
        #[arg(long)]
        once: bool,
    },
    /// Show resolved configuration and pipeline state.
    Status,
    /// Show the manifest entry for a summary document or snapshot.
    Inspect { filename: String },
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let state = if report.ok { "ok" } else { "issues" };
    println!("{}: {state}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let report = match cli.command {
        Command::Run => commands::run::run()?,
        Command::Extract => commands::extract::run()?,
        Command::Summarize => commands::summarize::run()?,
        Command::Watch { once } => commands::watch::run(&commands::watch::WatchOptions { once })?,
        Command::Status => commands::status::run()?,
        Command::Inspect { filename } => commands::inspect::run(&filename)?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        std::process::exit(2);
    }
    Ok(())
}
