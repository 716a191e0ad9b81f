//! refile - Reorganize file collections with an undoable operation log.
//!
//! Usage:
//!   refile move --plan moves.json        Stage and execute moves
//!   refile rename --plan renames.json    Stage and execute renames
//!   refile triage --plan triage.json     Confirm triage suggestions
//!   refile history                       List logged operations
//!   refile batches                       List batch summaries
//!   refile undo <ID>                     Undo one operation
//!   refile undo-batch <BATCH>            Undo a whole batch, newest first

mod logging;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use serde::Serialize;
use serde::de::DeserializeOwned;

use refile_core::{BatchId, EngineConfig, OperationEntry, OperationId, OperationKind};
use refile_log::{DEFAULT_PAGE_SIZE, HistoryQuery};
use refile_ops::{
    BatchProgress, Engine, JobTicket, MoveProposal, Preview, RenameEdit, RenameProposal,
    TriageConfirmation, TriageSuggestion, UndoResult,
};

/// How often a running job is polled.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(
    name = "refile",
    version,
    about = "Reorganize file collections with an undoable operation log",
    long_about = "refile executes planned moves and renames as batches, records every \
                  change in a durable log and can reverse single operations or whole \
                  batches.\n\nPlans are JSON files produced by an external matcher."
)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operation log database (overrides the configuration)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stage and execute moves from a plan
    Move {
        /// JSON array of {file_name, source_path, target_path, rule}
        #[arg(short, long)]
        plan: PathBuf,

        /// Only show the preview
        #[arg(long)]
        dry_run: bool,
    },

    /// Stage and execute in-place renames from a plan
    Rename {
        /// JSON array of {source_path, new_filename, found_date?, date_source?}
        #[arg(short, long)]
        plan: PathBuf,

        /// Mode annotation recorded with every rename
        #[arg(short, long, default_value = "fast")]
        mode: String,

        /// Only show the preview
        #[arg(long)]
        dry_run: bool,
    },

    /// Confirm triage suggestions and move files to their folders
    Triage {
        /// JSON array of {file_name, source_path, suggested_folder, confidence?}
        #[arg(short, long)]
        plan: PathBuf,

        /// Only show the preview
        #[arg(long)]
        dry_run: bool,
    },

    /// List logged operations, newest first
    History {
        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: u32,

        /// Rows per page (at most 200)
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: u32,

        /// Only show one operation type
        #[arg(short, long)]
        kind: Option<KindFilter>,
    },

    /// List the most recent batches
    Batches,

    /// Show every operation of one batch
    Batch {
        /// Batch id
        batch_id: String,
    },

    /// Undo a single completed operation
    Undo {
        /// Operation id
        id: i64,
    },

    /// Retry undoing an operation marked revert_failed
    Retry {
        /// Operation id
        id: i64,
    },

    /// Undo every completed operation of a batch, newest first
    UndoBatch {
        /// Batch id
        batch_id: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindFilter {
    Move,
    Rename,
}

impl From<KindFilter> for OperationKind {
    fn from(kind: KindFilter) -> Self {
        match kind {
            KindFilter::Move => Self::Move,
            KindFilter::Rename => Self::Rename,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    logging::init();

    let cli = Cli::parse();

    let mut config =
        EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    tracing::debug!(database = %config.database_path.display(), "Configuration loaded");
    let engine = Engine::open(config).context("Failed to open operation log")?;
    let format = cli.format;

    match cli.command {
        Command::Move { plan, dry_run } => run_move(&engine, &plan, dry_run, format).await,
        Command::Rename {
            plan,
            mode,
            dry_run,
        } => run_rename(&engine, &plan, mode, dry_run, format).await,
        Command::Triage { plan, dry_run } => run_triage(&engine, &plan, dry_run, format).await,
        Command::History {
            page,
            page_size,
            kind,
        } => run_history(&engine, page, page_size, kind, format).await,
        Command::Batches => run_batches(&engine, format).await,
        Command::Batch { batch_id } => run_batch(&engine, batch_id.into(), format).await,
        Command::Undo { id } => {
            let result = engine.undo_one(OperationId::new(id)).await;
            report_undo(&result, format)
        }
        Command::Retry { id } => {
            let result = engine.retry_failed(OperationId::new(id)).await;
            report_undo(&result, format)
        }
        Command::UndoBatch { batch_id } => {
            let ticket = engine
                .undo_batch(&batch_id.into())
                .await
                .context("Undo rejected")?;
            finish_job(&engine, &ticket, format).await
        }
    }
}

/// Stage moves and execute every staged item.
async fn run_move(engine: &Engine, plan: &Path, dry_run: bool, format: OutputFormat) -> Result<()> {
    let proposals: Vec<MoveProposal> = read_plan(plan)?;
    let preview = engine.stage_moves(proposals).context("Invalid move plan")?;
    if dry_run || preview.items.is_empty() {
        return print_preview(&preview, format);
    }

    let ids: Vec<u32> = preview.items.iter().map(|item| item.id).collect();
    let ticket = engine
        .execute(&preview.batch_id, &ids)
        .context("Execution rejected")?;
    finish_job(engine, &ticket, format).await
}

/// Stage renames and execute them under their proposed names.
async fn run_rename(
    engine: &Engine,
    plan: &Path,
    mode: String,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let proposals: Vec<RenameProposal> = read_plan(plan)?;
    let preview = engine
        .stage_renames(proposals, Some(mode))
        .context("Invalid rename plan")?;
    if dry_run || preview.items.is_empty() {
        return print_preview(&preview, format);
    }

    let edits = preview
        .items
        .iter()
        .map(|item| RenameEdit {
            id: item.id,
            new_filename: file_name(&item.target_path),
        })
        .collect();
    let ticket = engine
        .execute_renames(&preview.batch_id, edits)
        .context("Execution rejected")?;
    finish_job(engine, &ticket, format).await
}

/// Stage triage suggestions and confirm each one as suggested.
async fn run_triage(
    engine: &Engine,
    plan: &Path,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let suggestions: Vec<TriageSuggestion> = read_plan(plan)?;
    let confirmations: Vec<TriageConfirmation> = suggestions
        .iter()
        .map(|s| TriageConfirmation {
            file_name: s.file_name.clone(),
            source_path: s.source_path.clone(),
            confirmed_folder: s.suggested_folder.clone(),
        })
        .collect();

    let preview = engine
        .stage_triage(suggestions)
        .context("Invalid triage plan")?;
    if dry_run || preview.items.is_empty() {
        return print_preview(&preview, format);
    }

    let ticket = engine
        .execute_triage(&preview.batch_id, confirmations)
        .await
        .context("Execution rejected")?;
    finish_job(engine, &ticket, format).await
}

async fn run_history(
    engine: &Engine,
    page: u32,
    page_size: u32,
    kind: Option<KindFilter>,
    format: OutputFormat,
) -> Result<()> {
    let query = HistoryQuery::page(page, page_size).with_kind(kind.map(Into::into));
    let history = engine.history(query).await.context("Failed to read history")?;

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Text => {
            print_entries(&history.entries);
            let pages = history.total.div_ceil(history.page_size as usize).max(1);
            println!();
            println!(
                "Page {} of {} ({} operations)",
                history.page, pages, history.total
            );
        }
    }
    Ok(())
}

async fn run_batches(engine: &Engine, format: OutputFormat) -> Result<()> {
    let batches = engine.batches().await.context("Failed to read batches")?;

    match format {
        OutputFormat::Json => print_json(&batches)?,
        OutputFormat::Text => {
            if batches.is_empty() {
                println!("No batches recorded.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<6}  {:>5}  {:<18}  {:>9}  {:>8}  {:>6}  {}",
                "BATCH", "TYPE", "FILES", "STATUS", "COMPLETED", "REVERTED", "FAILED", "STARTED"
            );
            for batch in &batches {
                println!(
                    "{:<36}  {:<6}  {:>5}  {:<18}  {:>9}  {:>8}  {:>6}  {}",
                    truncate(batch.batch_id.as_str(), 36),
                    batch.kind.to_string(),
                    batch.file_count,
                    batch.status.to_string(),
                    batch.completed_count,
                    batch.reverted_count,
                    batch.failed_count,
                    batch.timestamp.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
    }
    Ok(())
}

async fn run_batch(engine: &Engine, batch_id: BatchId, format: OutputFormat) -> Result<()> {
    let entries = engine
        .batch_entries(&batch_id)
        .await
        .context("Failed to read batch")?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Text => print_entries(&entries),
    }
    Ok(())
}

/// Wait for a background job and print its final progress.
async fn finish_job(engine: &Engine, ticket: &JobTicket, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Text) {
        eprintln!(
            "Batch {} accepted ({} {}), waiting...",
            ticket.batch_id,
            ticket.total,
            if ticket.total == 1 { "item" } else { "items" }
        );
    }

    let progress = engine
        .wait_until_done(ticket.job, &ticket.batch_id, POLL_INTERVAL)
        .await
        .ok_or_else(|| eyre!("Progress for batch {} is no longer available", ticket.batch_id))?;

    match format {
        OutputFormat::Json => print_json(&progress)?,
        OutputFormat::Text => print_progress(&progress),
    }
    if progress.failed > 0 {
        bail!("{} of {} items failed", progress.failed, progress.total);
    }
    Ok(())
}

fn report_undo(result: &UndoResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(result)?,
        OutputFormat::Text if result.success => println!("{}", result.message),
        OutputFormat::Text => {}
    }
    if !result.success {
        bail!("{} ({})", result.message, result.code.as_u16());
    }
    Ok(())
}

fn print_preview(preview: &Preview, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(preview)?,
        OutputFormat::Text => {
            println!("Batch {} ({}, {} items)", preview.batch_id, preview.kind, preview.items.len());
            println!("{}", "─".repeat(60));
            for item in &preview.items {
                println!(
                    "{:>4}  {} -> {}",
                    item.id,
                    item.source_path.display(),
                    item.target_path.display()
                );
            }
        }
    }
    Ok(())
}

fn print_progress(progress: &BatchProgress) {
    println!("Batch {}: {}", progress.batch_id, progress.summary());
    if let Some(message) = &progress.message {
        println!("  {message}");
    }
    for error in &progress.errors {
        println!("  error: {error}");
    }
}

fn print_entries(entries: &[OperationEntry]) {
    if entries.is_empty() {
        println!("No operations recorded.");
        return;
    }
    println!(
        "{:>6}  {:<6}  {:<13}  {:<19}  {}",
        "ID", "TYPE", "STATUS", "TIMESTAMP", "SOURCE -> TARGET"
    );
    for entry in entries {
        println!(
            "{:>6}  {:<6}  {:<13}  {:<19}  {} -> {}",
            entry.id.0,
            entry.kind.as_ref(),
            entry.status.as_ref(),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.source_path.display(),
            entry.target_path.display()
        );
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_plan<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid plan {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Truncate a string to a maximum character count.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
