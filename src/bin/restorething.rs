//! # restorething CLI - Restore files from Syncthing's version archive
//!
//! Restores the state of a synced folder around a date and hour from its
//! `.stversions` directory. Runs simulate by default; pass `--no-sim` to copy.
//!
//! ## Usage
//! ```bash
//! # Nearest version of every file to 2016-08-15 06:00, simulated
//! restorething 20160815 -r 6 --versions-dir sync/.stversions
//!
//! # Versions within two hours of noon, restored for real into ./test
//! restorething 20160815 -p 2 --versions-dir sync/.stversions --no-sim --restore-dir test
//!
//! # Every archived version of one file
//! restorething 20160815 --all-instances /home/me/sync/docs/plan.md --versions-dir /home/me/sync/.stversions
//! ```

use clap::{ArgGroup, Parser};
use colored::*;
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use restorething::utils::{format_bytes, is_inside_synced_folder};
use restorething::{
    CopyExecutor, ExecutionReport, OverwritePolicy, OverwritePrompt, ProgressInfo,
    RefreshOutcome, Restorer, RestorerBuilder, Result, SelectionOptions, SelectionOutcome,
    SelectionSummary, TimePolicy,
};
use restorething::executor::EntryStatus;
use restorething::restorer::DEFAULT_INDEX_FILE;
use restorething::timestamp::parse_cli_date;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Restore files from a Syncthing versioning directory to a point in time
#[derive(Parser)]
#[command(name = "restorething")]
#[command(version)]
#[command(about = "Restore files from Syncthing's .stversions folder to a date and hour")]
#[command(long_about = None)]
#[command(group(ArgGroup::new("mode").multiple(false)))]
#[command(group(ArgGroup::new("filter").multiple(false)))]
struct Cli {
    /// Date to restore to, in format YYYYMMDD
    date: String,

    /// Hour to restore to (0 = midnight, 12 = noon, 17 = 5pm)
    #[arg(short = 'r', long, default_value_t = 12, value_parser = clap::value_parser!(u32).range(0..=23))]
    hour: u32,

    /// Restore versions at or before the date/hour only
    #[arg(short, long, group = "mode")]
    before: bool,

    /// Restore versions at or after the date/hour only
    #[arg(short, long, group = "mode")]
    after: bool,

    /// Restore versions within this many hours of the date/hour
    #[arg(short, long, value_name = "HOURS", group = "mode")]
    plus_minus: Option<u32>,

    /// Restore every version of this file (absolute path in the synced folder)
    #[arg(long, value_name = "PATH", group = "mode")]
    all_instances: Option<PathBuf>,

    /// Only files whose name contains this string
    #[arg(long, value_name = "STRING", group = "filter")]
    filter_file: Option<String>,

    /// Only files whose directory contains this string
    #[arg(long, value_name = "STRING", group = "filter")]
    filter_dir: Option<String>,

    /// Only this file (absolute path in the synced folder)
    #[arg(long, value_name = "PATH", group = "filter")]
    filter_dir_and_file: Option<PathBuf>,

    /// Versioning directory to index
    #[arg(long, value_name = "DIR", default_value = ".stversions")]
    versions_dir: PathBuf,

    /// Directory to restore into
    #[arg(long, value_name = "DIR", default_value = "restore")]
    restore_dir: PathBuf,

    /// Directory holding the index file (defaults to current)
    #[arg(long, value_name = "DIR")]
    db_dir: Option<PathBuf>,

    /// Index file name
    #[arg(long, value_name = "FILE", default_value = DEFAULT_INDEX_FILE)]
    db_file: String,

    /// Rescan even if the index is less than 24 hours old
    #[arg(long)]
    no_freeze: bool,

    /// Leave deleted or renamed files out of the restore
    #[arg(long)]
    no_delete: bool,

    /// Include sync-conflict copies in the restore
    #[arg(long)]
    inc_conflict: bool,

    /// Restore for real instead of simulating
    #[arg(long)]
    no_sim: bool,

    /// Overwrite existing files without confirmation
    #[arg(short, long)]
    force: bool,

    /// Enable debug output
    #[arg(short, long)]
    debug: bool,

    /// Print the restore plan as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e.user_message());
            std::process::exit(1);
        }
    }
}

/// Prompts on the terminal before replacing a file
struct TerminalPrompt;

impl OverwritePrompt for TerminalPrompt {
    fn confirm_overwrite(&self, destination: &Path) -> bool {
        ask(&format!("{} exists, overwrite? y/n [n] ", destination.display()), false)
    }
}

/// Ask a yes/no question on stderr; an empty answer picks `default`
fn ask(question: &str, default: bool) -> bool {
    eprint!("{}", question.yellow());
    if io::stderr().flush().is_err() {
        return default;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return default;
    }
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}

fn spinner(message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(message);
    pb
}

/// Main runner; returns whether every planned entry succeeded
///
/// With `--json` stdout carries only the plan document and the report goes
/// to stderr.
fn run(cli: Cli) -> Result<bool> {
    let date = parse_cli_date(&cli.date)?;
    let target_epoch = TimePolicy::Local.target_epoch(date, cli.hour)?;
    let mut out: Box<dyn Write> = if cli.json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };

    let restore_root = std::path::absolute(&cli.restore_dir)?;
    if is_inside_synced_folder(&restore_root) {
        writeln!(
            out,
            "{} {} is inside a Syncthing folder; restored files would be synced to every device.",
            "Warning:".yellow().bold(),
            restore_root.display()
        )?;
        if !ask("Restore there anyway? y/n [y] ", true) {
            return Ok(false);
        }
    }

    let db_dir = cli.db_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let progress = spinner("Indexing versions...");
    let pb = progress.clone();
    let restorer = RestorerBuilder::new()
        .index_path(db_dir.join(&cli.db_file))
        .progress_callback(Arc::new(move |info: ProgressInfo| {
            if info.processed % 256 == 0 {
                pb.set_message(format!("Indexing versions... {}", info.processed));
            }
        }))
        .build(cli.versions_dir.clone())?;

    let options = SelectionOptions {
        target_epoch,
        before: cli.before,
        after: cli.after,
        plus_minus: cli.plus_minus,
        all_instances: cli.all_instances.clone(),
        filter_file: cli.filter_file.clone(),
        filter_dir: cli.filter_dir.clone(),
        filter_dir_and_file: cli.filter_dir_and_file.clone(),
        include_conflicts: cli.inc_conflict,
        exclude_deleted_or_renamed: cli.no_delete,
    };
    let query = match options.resolve(restorer.live_root()) {
        Ok(query) => query,
        Err(e) => {
            progress.finish_and_clear();
            return Err(e);
        }
    };

    let refresh = restorer.refresh(cli.no_freeze);
    progress.finish_and_clear();
    print_refresh(&mut out, &restorer, &refresh?)?;

    writeln!(
        out,
        "{} {}",
        "Restoring to".blue().bold(),
        TimePolicy::Local.format_epoch(target_epoch).yellow()
    )?;

    let results = restorer.select(&query)?;
    let plan = restorer.plan(&query, &results, &restore_root);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }

    for result in &results {
        if let SelectionOutcome::NoMatch(reason) = result.outcome {
            writeln!(out, "  {} {} ({})", "no match".yellow(), result.logical_file, reason)?;
        }
    }
    for conflict in &plan.conflicts {
        writeln!(
            out,
            "  {} {} has {} candidate versions",
            "conflict".red(),
            conflict.destination.display(),
            conflict.sources.len()
        )?;
    }

    let executor = CopyExecutor::new()
        .with_dry_run(!cli.no_sim)
        .with_overwrite(if cli.force {
            OverwritePolicy::Force
        } else {
            OverwritePolicy::Prompt
        })
        .with_prompt(Box::new(TerminalPrompt));
    let report = executor.execute(&plan);

    for (entry, status) in plan.entries.iter().zip(report.entries.iter()) {
        let label = match status.status {
            EntryStatus::Copied => "restored".green(),
            EntryStatus::Simulated => "simulate".cyan(),
            EntryStatus::SkippedExisting => "kept".yellow(),
            EntryStatus::Tombstoned => "deleted".dimmed(),
            EntryStatus::Failed(_) => "failed".red().bold(),
        };
        writeln!(
            out,
            "  {} {} ({})",
            label,
            entry.destination_path.display(),
            TimePolicy::Local.format_epoch(entry.origin_timestamp)
        )?;
        if let EntryStatus::Failed(ref reason) = status.status {
            writeln!(out, "    {}", reason.red())?;
        }
    }

    print_summary(&mut out, &SelectionSummary::from_results(&results), &report)?;
    Ok(report.is_success())
}

fn print_refresh(out: &mut dyn Write, restorer: &Restorer, refresh: &RefreshOutcome) -> io::Result<()> {
    match refresh {
        RefreshOutcome::Reused { age_secs, records } => {
            writeln!(
                out,
                "{} Using index {} from {} ago ({} versions)",
                "✓".green().bold(),
                restorer.index_path().display().to_string().cyan(),
                format_duration(Duration::from_secs(*age_secs)),
                records
            )?;
        }
        RefreshOutcome::Rescanned {
            reason,
            records,
            skipped,
            duration,
        } => {
            writeln!(
                out,
                "{} Indexed {} versions in {} ({})",
                "✓".green().bold(),
                records.to_string().cyan(),
                format_duration(Duration::from_millis(duration.as_millis() as u64)),
                reason
            )?;
            for entry in skipped {
                writeln!(out, "  {} {} ({})", "skipped".yellow(), entry.path.display(), entry.reason)?;
            }
        }
    }
    Ok(())
}

fn print_summary(out: &mut dyn Write, summary: &SelectionSummary, report: &ExecutionReport) -> io::Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", "Summary".bold())?;
    writeln!(out, "  Matched: {}", summary.matched.to_string().cyan())?;
    if summary.unmatched_total() > 0 {
        writeln!(out, "  No match: {}", summary.unmatched_total().to_string().yellow())?;
    }
    if report.dry_run {
        writeln!(out, "  Simulated: {}", report.simulated.to_string().cyan())?;
        writeln!(out, "  {}", "Nothing was written; pass --no-sim to restore".dimmed())?;
    } else {
        writeln!(out, "  Restored: {}", report.copied.to_string().green())?;
        writeln!(out, "  Written: {}", format_bytes(report.bytes_written).cyan())?;
        if report.skipped_existing > 0 {
            writeln!(out, "  Kept existing: {}", report.skipped_existing.to_string().yellow())?;
        }
    }
    if report.tombstoned > 0 {
        writeln!(out, "  Deleted or renamed: {}", report.tombstoned.to_string().dimmed())?;
    }
    if !report.failures.is_empty() {
        writeln!(out, "  Failed: {}", report.failures.len().to_string().red().bold())?;
    }
    Ok(())
}
