//! keepsake-extract - run the extraction pipeline over a chat export
//!
//! Reads a chat export, chunks it by calendar day, sends uncached chunks to
//! the configured LLM provider under the concurrency gate, and normalizes
//! the results into the database.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/keepsake/keepsake.db (~/.local/share/keepsake/keepsake.db)
//! - Logs: $XDG_STATE_HOME/keepsake/keepsake.log (~/.local/state/keepsake/keepsake.log)
//! - Config: $XDG_CONFIG_HOME/keepsake/config.toml (~/.config/keepsake/config.toml)

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use keepsake_core::chunker;
use keepsake_core::extract::{Extractor, HttpLlmClient, RunReport};
use keepsake_core::normalize::{normalize, NormalizeReport};
use keepsake_core::{Config, Database};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "keepsake-extract")]
#[command(about = "Extract memorable exchanges from a chat export")]
#[command(version)]
struct Args {
    /// Path to the chat export file
    file: PathBuf,

    /// Source identifier stored with extracted exchanges (defaults to the file name)
    #[arg(long)]
    source_id: Option<String>,

    /// Cache namespace for this pass (defaults to extractor.calling_context)
    #[arg(long)]
    context: Option<String>,

    /// Maximum simultaneous LLM calls (defaults to extractor.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Chunk the export and report, without calling the LLM
    #[arg(long)]
    dry_run: bool,

    /// Verbose output (-v per-chunk details)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let mut config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        keepsake_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("keepsake-extract starting");

    if let Some(context) = &args.context {
        config.extractor.calling_context = context.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.extractor.concurrency = concurrency;
    }

    // --- Read and chunk the export --- //
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    if content.trim().is_empty() {
        bail!("input file {} is empty", args.file.display());
    }

    let source_id = args.source_id.clone().unwrap_or_else(|| {
        args.file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| args.file.display().to_string())
    });

    let chunk_report = chunker::chunk_by_day(&source_id, &content)
        .with_context(|| format!("failed to chunk {}", args.file.display()))?;
    println!(
        "Chunked {} lines into {} day chunk(s) ({} messages)",
        chunk_report.lines_total,
        chunk_report.chunks.len(),
        chunk_report.messages_parsed
    );
    if args.verbose >= 1 {
        for warning in &chunk_report.warnings {
            println!("  Warning: {}", warning);
        }
    }

    if args.dry_run {
        for chunk in &chunk_report.chunks {
            println!("  {}: {} message(s)", chunk.date, chunk.messages.len());
        }
        println!("\nDry run - no extraction performed");
        tracing::info!("Dry run complete");
        return Ok(());
    }

    // --- Open storage and the LLM client --- //
    let llm_config = config
        .llm
        .as_ref()
        .context("no [llm] section in config; extraction needs a provider")?;
    let client = HttpLlmClient::new(llm_config).context("failed to create LLM client")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Arc::new(Database::open(&db_path).context("failed to open database")?);
    db.migrate().context("failed to run database migrations")?;
    println!("Database: {}", db_path.display());

    let extractor = Extractor::new(db.clone(), Arc::new(client), &config.extractor);

    // --- Extract --- //
    let pb = ProgressBar::new(chunk_report.chunks.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let report = extractor
        .run_with_progress(&chunk_report.chunks, |chunk| {
            pb.inc(1);
            pb.set_message(chunk.date.clone());
        })
        .await;

    pb.finish_and_clear();

    // --- Normalize --- //
    let norm = normalize(&db, &report.extractions).context("normalization failed")?;

    print_summary(&report, &norm, args.verbose);

    tracing::info!(
        chunks_processed = report.chunks_processed,
        chunks_cached = report.chunks_cached,
        chunks_failed = report.chunks_failed.len(),
        exchanges_inserted = norm.exchanges_inserted,
        "keepsake-extract complete"
    );

    if !report.chunks_failed.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print the run summary
fn print_summary(report: &RunReport, norm: &NormalizeReport, verbose: u8) {
    println!("\nExtraction complete:");
    println!("  Chunks total:       {}", report.chunks_total);
    println!("  Served from cache:  {}", report.chunks_cached);
    println!("  Sent to LLM:        {}", report.chunks_processed);
    println!("  Failed:             {}", report.chunks_failed.len());
    println!("  Exchanges found:    {}", report.exchanges_extracted);
    println!("  Messages kept:      {}", report.messages_extracted);
    if report.tokens_in > 0 || report.tokens_out > 0 {
        println!(
            "  Tokens in/out:      {} / {}",
            report.tokens_in, report.tokens_out
        );
    }
    println!("  Elapsed:            {:.2}s", report.elapsed.as_secs_f64());

    println!("\nNormalization:");
    println!("  Results normalized: {}", norm.results_normalized);
    println!("  Results skipped:    {}", norm.results_skipped);
    println!("  Exchanges inserted: {}", norm.exchanges_inserted);
    println!("  Messages inserted:  {}", norm.messages_inserted);

    if verbose >= 1 && !report.extractions.is_empty() {
        println!("\nChunks:");
        for extraction in &report.extractions {
            println!(
                "  {}:{} {} exchange(s){}",
                extraction.source_file,
                extraction.date,
                extraction.result.exchanges.len(),
                if extraction.from_cache { " (cached)" } else { "" }
            );
        }
    }

    if !report.chunks_failed.is_empty() {
        println!("\nFailed chunks ({}):", report.chunks_failed.len());
        for (label, error) in &report.chunks_failed {
            println!("  {}: {}", label, error);
        }
    }
}
