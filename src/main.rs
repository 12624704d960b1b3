//! cp-analyzer: batch CP test log analysis pipeline
//!
//! Walks a data directory of per-batch log folders and runs the full
//! pipeline on each: parse -> clean -> export JSON artifacts -> adjust
//! units -> render HTML report. Batches run in parallel; one broken batch
//! never aborts the others.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::bail;
use clap::Parser;
use rayon::prelude::*;
use tracing::{error, info, warn};

use cp_analyzer::cleaning::CleaningStrategy;
use cp_analyzer::config::AnalyzerConfig;
use cp_analyzer::error::Result;
use cp_analyzer::report;
use cp_analyzer::units;
use cp_analyzer::CpLogCleaner;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "cp-analyzer", about = "CP test log analysis pipeline", version)]
struct CliArgs {
    /// Directory holding one subdirectory of raw CP logs per batch
    #[arg(long, value_name = "DIR", env = "CP_ANALYZER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Directory receiving per-batch JSON artifacts and HTML reports
    #[arg(long, value_name = "DIR", env = "CP_ANALYZER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Restrict the run to these parameters (default: the configured set)
    #[arg(long, value_name = "PARAM", num_args = 1..)]
    params: Vec<String>,

    /// Cleaning strategy: standard, smart, remove-outliers
    #[arg(long, value_name = "NAME")]
    strategy: Option<String>,

    /// Skip writing JSON artifacts (reports need artifacts, so this
    /// also skips reporting)
    #[arg(long)]
    skip_json: bool,

    /// Skip rendering HTML reports
    #[arg(long)]
    no_report: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let mut config = AnalyzerConfig::load();
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if !args.params.is_empty() {
        config.target_params = args.params;
    }

    let processed = run(&config, args.skip_json, args.no_report)?;
    if processed == 0 {
        bail!("no batch processed successfully");
    }
    Ok(())
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the pipeline over every batch directory. Returns the number of
/// batches that completed.
fn run(config: &AnalyzerConfig, skip_json: bool, no_report: bool) -> Result<usize> {
    let strategy = config.cleaning_strategy()?;
    let batches = discover_batches(&config.data_dir)?;
    if batches.is_empty() {
        warn!(dir = %config.data_dir.display(), "no batch directories found");
        return Ok(0);
    }
    info!(
        batches = batches.len(),
        strategy = %strategy,
        "starting batch processing"
    );

    let outcomes: Vec<(String, Result<()>)> = batches
        .par_iter()
        .map(|batch_dir| {
            let name = batch_name(batch_dir);
            let result = process_batch(config, strategy, batch_dir, skip_json, no_report);
            (name, result)
        })
        .collect();

    let mut processed = Vec::new();
    for (name, result) in outcomes {
        match result {
            Ok(()) => processed.push(name),
            Err(err) => {
                if err.is_fatal() {
                    return Err(err);
                }
                error!(batch = %name, error = %err, "batch failed");
            }
        }
    }

    if !no_report {
        let mut names = processed.clone();
        names.sort();
        report::render_batch_index(&config.output_dir, &names)?;
    }

    info!(
        processed = processed.len(),
        failed = batches.len() - processed.len(),
        "batch processing complete"
    );
    Ok(processed.len())
}

/// Full pipeline for one batch directory.
fn process_batch(
    config: &AnalyzerConfig,
    strategy: CleaningStrategy,
    batch_dir: &Path,
    skip_json: bool,
    no_report: bool,
) -> Result<()> {
    let name = batch_name(batch_dir);
    let batch_out = config.output_dir.join(&name);
    info!(batch = %name, "processing batch");

    let mut cleaner = CpLogCleaner::new(&batch_out, config.target_params.clone());
    cleaner.load_dir(batch_dir)?;
    cleaner.clean(strategy, &[])?;

    if !skip_json {
        cleaner.export_json(&[])?;
        units::adjust_batch_directory(&batch_out, None, false)?;
    }
    if !no_report && !skip_json {
        report::render_batch_from_artifacts(&batch_out)?;
    }

    info!(batch = %name, "batch complete");
    Ok(())
}

/// Immediate subdirectories of the data dir, one per batch. Hidden
/// directories are skipped.
fn discover_batches(data_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(data_dir)
        .map_err(|e| cp_analyzer::AnalyzerError::io(data_dir, e))?;

    let mut batches = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| cp_analyzer::AnalyzerError::io(data_dir, e))?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if path.is_dir() && !hidden {
            batches.push(path);
        }
    }
    batches.sort();
    Ok(batches)
}

fn batch_name(batch_dir: &Path) -> String {
    batch_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("batch")
        .to_string()
}
