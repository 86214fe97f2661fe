//! sealsched - sealing task scheduler
//!
//! CLI entry point: simulate a worker fleet, inspect configuration and call records.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use sealsched::cli::{Cli, Command, OutputFormat};
use sealsched::config::Config;
use sealsched::simulate::{SimulationReport, run_simulation};
use sealsched::tracker::CallTracker;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sealsched")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    let log_file = fs::File::create(log_dir.join("sealsched.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate { tasks, assigner, format } => cmd_simulate(&config, tasks, assigner.as_deref(), format).await,
        Command::Config => cmd_config(&config),
        Command::Calls { format } => cmd_calls(&config, format),
    }
}

async fn cmd_simulate(config: &Config, tasks: usize, assigner: Option<&str>, format: OutputFormat) -> Result<()> {
    debug!(tasks, ?assigner, "cmd_simulate: called");
    let store = config.storage.open()?;
    let report = run_simulation(config, store, tasks, assigner).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!("{}", "Simulation".bold());
    println!("----------");
    println!("Assigner:  {}", report.assigner);
    println!("Submitted: {}", report.submitted);
    println!("  Succeeded: {}", report.succeeded.to_string().green());
    if report.failed > 0 {
        println!("  Failed:    {}", report.failed.to_string().red());
    } else {
        println!("  Failed:    0");
    }
    println!("  Cancelled: {}", report.cancelled);
    println!("Elapsed:   {} ms", report.elapsed_ms);
    println!();

    println!("{}", "Per worker".bold());
    for (hostname, count) in &report.per_worker {
        println!("  {:<16} {}", hostname, count);
    }
    println!();

    println!("Pending requests: {}", report.diag.requests.len());
    for req in &report.diag.requests {
        println!("  {} {} priority={} sched-id={}", req.sector, req.task.short(), req.priority, req.sched_id.short());
    }
    println!("Open windows: {}", report.diag.open_windows.len());
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    print!("{}", serde_yaml::to_string(config).context("Failed to serialize config")?);
    Ok(())
}

fn cmd_calls(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_calls: called");
    let tracker = CallTracker::new(config.storage.open()?);
    let calls = tracker.recover().context("Failed to read call records")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&calls)?),
        OutputFormat::Text => {
            if calls.is_empty() {
                println!("No calls in flight");
                return Ok(());
            }
            for call in &calls {
                let started = DateTime::<Utc>::from_timestamp_millis(call.started_at)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {:<5} {:<9} {} ({})  started {}",
                    call.call,
                    call.task.short(),
                    call.state.to_string().yellow(),
                    call.placement.hostname,
                    call.placement.worker.short(),
                    started
                );
            }
        }
    }
    Ok(())
}
