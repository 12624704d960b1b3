//! adjust-units: standalone idempotent unit-adjustment pass
//!
//! Rescales exported `<PARAM>_data.json` artifacts into their LimitU units
//! (Ohm to mOhm, Ampere to nA / uA per the built-in rule table). Safe to
//! run repeatedly: artifacts already carrying the target unit label are
//! left untouched, so a second pass is a no-op.

use std::fs;
use std::path::PathBuf;

use anyhow::bail;
use clap::Parser;
use tracing::{info, warn};

use cp_analyzer::error::Result;
use cp_analyzer::units::{self, AdjustSummary};

#[derive(Parser, Debug)]
#[command(name = "adjust-units", about = "Rescale exported CP artifacts to LimitU units", version)]
struct CliArgs {
    /// Output directory holding per-batch artifact folders
    #[arg(long, value_name = "DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Adjust a single batch instead of every batch under the output dir
    #[arg(long, value_name = "NAME")]
    batch: Option<String>,

    /// Restrict adjustment to these parameters (default: every parameter
    /// with a scaling rule)
    #[arg(long, value_name = "PARAM", num_args = 1..)]
    params: Vec<String>,

    /// Re-render batch HTML reports from the adjusted artifacts
    #[arg(long)]
    regenerate: bool,
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
    let summary = run(&args)?;
    if !summary.is_clean() {
        bail!("{} artifact(s) could not be adjusted", summary.failed);
    }
    info!(
        adjusted = summary.adjusted,
        skipped = summary.skipped,
        "unit adjustment finished"
    );
    Ok(())
}

fn run(args: &CliArgs) -> Result<AdjustSummary> {
    let params = if args.params.is_empty() {
        units::default_params()
    } else {
        args.params.clone()
    };

    let batch_dirs = match &args.batch {
        Some(name) => vec![args.output_dir.join(name)],
        None => all_batch_dirs(&args.output_dir)?,
    };
    if batch_dirs.is_empty() {
        warn!(dir = %args.output_dir.display(), "no batch directories found");
        return Ok(AdjustSummary::default());
    }

    let mut total = AdjustSummary::default();
    for batch_dir in &batch_dirs {
        let summary = units::adjust_batch_directory(batch_dir, Some(&params), args.regenerate)?;
        total.adjusted += summary.adjusted;
        total.skipped += summary.skipped;
        total.failed += summary.failed;
    }
    Ok(total)
}

/// Batch folders under the output dir. Hidden entries and the shared
/// `static` assets folder are not batches.
fn all_batch_dirs(output_dir: &PathBuf) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(output_dir)
        .map_err(|e| cp_analyzer::AnalyzerError::io(output_dir, e))?;

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| cp_analyzer::AnalyzerError::io(output_dir, e))?;
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if path.is_dir() && !name.starts_with('.') && name != "static" {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}
