//! snapback - Command-line interface for the backup engine.
//!
//! Locates the configuration file, asks for confirmation, runs the backup and
//! prints a summary. Engine events go to stdout (information) and stderr
//! (errors); diagnostics go through `tracing` to stderr.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local};
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use snapback_engine::{
    config::{candidate_config_paths, default_config_path, find_config, host_name},
    create_backup, run_backup, BackupEvents, BackupResult, Configuration,
};
use tracing_subscriber::EnvFilter;

/// snapback - Copy source folders into a fresh timestamped backup folder
#[derive(Parser, Debug)]
#[command(name = "snapback")]
#[command(version)]
#[command(about = "Back up configured folders into a timestamped target folder")]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Options for the default `backup` command
    #[command(flatten)]
    backup: BackupArgs,

    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print diagnostics for errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a backup (default)
    Backup(BackupArgs),

    /// Write an example configuration file
    CreateConfig(CreateConfigArgs),
}

#[derive(ClapArgs, Debug, Default, Clone)]
struct BackupArgs {
    /// Configuration file (searched for when omitted)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,
}

#[derive(ClapArgs, Debug, Default, Clone)]
struct CreateConfigArgs {
    /// Where to write the file (defaults to the first search location)
    #[arg(long, value_name = "PATH")]
    path: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
}

/// Prints engine events to the console
struct ConsoleEvents;

impl BackupEvents for ConsoleEvents {
    fn on_information(&self, message: &str) {
        println!("{}", message);
    }

    fn on_error(&self, message: &str) {
        eprintln!("Error: {}", message);
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose, args.quiet);

    match run_cli(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Default filter directive for the given verbosity flags.
fn log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// `RUST_LOG` takes precedence over the command-line flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(verbose, quiet)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<()> {
    match &args.command {
        Some(Command::CreateConfig(create)) => create_config(create),
        Some(Command::Backup(backup)) => run_backup_command(backup),
        None => run_backup_command(&args.backup),
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn config_candidates() -> Result<Vec<PathBuf>> {
    let cwd = std::env::current_dir().context("Cannot determine the working directory")?;
    Ok(candidate_config_paths(env_var, &cwd))
}

fn locate_config(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    let candidates = config_candidates()?;
    match find_config(&candidates) {
        Some(path) => Ok(path),
        None => {
            let searched: Vec<String> = candidates
                .iter()
                .map(|p| format!("  {}", p.display()))
                .collect();
            bail!(
                "No configuration file found. Searched:\n{}\nRun `snapback create-config` to create one.",
                searched.join("\n")
            )
        }
    }
}

fn create_config(args: &CreateConfigArgs) -> Result<()> {
    let path = match &args.path {
        Some(path) => path.clone(),
        None => default_config_path(&config_candidates()?)
            .context("No location available for the configuration file")?,
    };

    if path.exists() && !args.force {
        bail!(
            "Configuration file {} already exists; use --force to overwrite it",
            path.display()
        );
    }

    let home = match env_var("HOME").or_else(|| env_var("USERPROFILE")) {
        Some(home) => PathBuf::from(home),
        None => std::env::current_dir().context("Cannot determine the working directory")?,
    };
    Configuration::example(&home)
        .save(&path)
        .with_context(|| format!("Failed to write configuration to {}", path.display()))?;

    println!("Wrote example configuration to {}", path.display());
    println!("Edit the Target and Source entries before running a backup.");
    Ok(())
}

fn run_backup_command(args: &BackupArgs) -> Result<()> {
    let config_path = locate_config(args.config.as_deref())?;
    tracing::info!(path = %config_path.display(), "loading configuration");

    let config = Configuration::load(&config_path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", config_path.display()))?;

    let host = host_name(env_var);
    let config = config.with_timestamped_target(&host, Local::now());

    println!("Configuration: {}", config_path.display());
    println!("Target:        {}", config.target.path.display());
    println!("Sources:");
    for source in &config.source {
        println!("  {}", source.path.display());
    }

    if !args.yes {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        if !confirm(&mut stdin.lock(), &mut stdout)? {
            println!("Backup cancelled.");
            return Ok(());
        }
    }

    let mut job = create_backup(config)?;
    let result = run_backup(&mut job, &ConsoleEvents)?;
    print_summary(&result);

    if result.success {
        Ok(())
    } else {
        bail!("Backup failed")
    }
}

/// Ask `Proceed? (y/N)`. Anything but `y`/`yes` declines.
fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(output, "Proceed? (y/N) ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// First summary line: outcome, elapsed time and, on failure, the cause.
fn headline(result: &BackupResult) -> String {
    let elapsed = format_elapsed(result.elapsed());
    match (&result.error, result.success) {
        (_, true) => format!("Backup succeeded in {}", elapsed),
        (Some(e), false) => format!("Backup FAILED after {} - {}", elapsed, e),
        (None, false) => format!("Backup FAILED after {}", elapsed),
    }
}

fn print_summary(result: &BackupResult) {
    println!();
    println!("{}", headline(result));
    println!("Started:  {}", result.start_time.format("%Y-%m-%d %H:%M:%S"));
    println!("Finished: {}", result.end_time.format("%Y-%m-%d %H:%M:%S"));
    println!(
        "Copied:   {} ({} files, {} directories)",
        format_bytes(result.bytes_copied),
        result.files_copied,
        result.directories_copied
    );
    println!(
        "Skipped:  {} files, {} directories",
        result.files_skipped, result.directories_skipped
    );
    if let Some(log) = &result.log_file_path {
        println!("Log file: {}", log.display());
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// `hh:mm:ss`; hours are not wrapped at 24.
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
