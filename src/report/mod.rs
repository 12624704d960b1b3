//! Report aggregation over exported batch artifacts.
//!
//! Rebuilds per-parameter distribution summaries (robust statistics,
//! process capability, estimated yield) from the `<PARAM>_data.json`
//! artifacts on disk and renders them as a static HTML report per batch.
//! Reading from artifacts rather than the in-memory table means reports
//! can be regenerated after a standalone unit-adjustment pass.

pub mod html;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{info, warn};

use crate::cleaning::robust;
use crate::error::{AnalyzerError, Result};
use crate::types::{CleaningFlag, ParamArtifact};
use crate::units;

// ============================================================================
// Summaries
// ============================================================================

/// Distribution summary for one parameter on one wafer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaferSummary {
    pub wafer: String,
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub oos_count: usize,
}

/// Full distribution summary for one parameter across a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub parameter: String,
    pub unit: Option<String>,
    pub count: usize,
    pub flagged: usize,
    pub removed: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub q10: f64,
    pub q25: f64,
    pub q75: f64,
    pub q90: f64,
    pub limit_upper: Option<f64>,
    pub limit_lower: Option<f64>,
    /// Values beyond a spec limit.
    pub oos_count: usize,
    pub oos_rate: f64,
    /// Process capability `(USL - LSL) / 6σ`; needs both limits.
    pub cp: Option<f64>,
    /// Centered capability, one-sided when only one limit is declared.
    pub cpk: Option<f64>,
    /// In-spec fraction under a normal fit of the cleaned distribution.
    pub est_yield: Option<f64>,
    pub wafers: Vec<WaferSummary>,
}

/// Everything the HTML renderer needs for one batch page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: String,
    pub lot: Option<String>,
    pub generated_at: String,
    pub params: Vec<ParamSummary>,
}

/// Summarize one artifact. `None` when it holds no numeric values.
pub fn summarize_artifact(artifact: &ParamArtifact) -> Option<ParamSummary> {
    let values = artifact.numeric_values();
    if values.is_empty() {
        return None;
    }

    let mean = robust::mean(&values)?;
    let median = robust::median(&values)?;
    let std_dev = robust::std_dev(&values);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let oos_count = values
        .iter()
        .filter(|v| {
            artifact.limit_upper.is_some_and(|u| **v > u)
                || artifact.limit_lower.is_some_and(|l| **v < l)
        })
        .count();

    let (cp, cpk) = capability(mean, std_dev, artifact.limit_upper, artifact.limit_lower);
    let est_yield = estimated_yield(mean, std_dev, artifact.limit_upper, artifact.limit_lower);

    let flagged = artifact
        .values
        .iter()
        .filter(|sv| sv.flag == CleaningFlag::OutlierFlagged)
        .count();
    let removed = artifact
        .values
        .iter()
        .filter(|sv| sv.flag == CleaningFlag::OutlierRemoved)
        .count();

    Some(ParamSummary {
        parameter: artifact.parameter.clone(),
        unit: artifact.unit.clone(),
        count: values.len(),
        flagged,
        removed,
        mean,
        median,
        std_dev,
        min,
        max,
        q10: robust::quantile(&values, 0.10)?,
        q25: robust::quantile(&values, 0.25)?,
        q75: robust::quantile(&values, 0.75)?,
        q90: robust::quantile(&values, 0.90)?,
        limit_upper: artifact.limit_upper,
        limit_lower: artifact.limit_lower,
        oos_count,
        oos_rate: oos_count as f64 / values.len() as f64,
        cp,
        cpk,
        est_yield,
        wafers: wafer_summaries(artifact),
    })
}

/// Cp / Cpk against the declared limits. Cp needs both limits; Cpk falls
/// back to its one-sided form when only one is declared. Both need spread.
fn capability(
    mean: f64,
    std_dev: Option<f64>,
    usl: Option<f64>,
    lsl: Option<f64>,
) -> (Option<f64>, Option<f64>) {
    let Some(sigma) = std_dev.filter(|s| *s > 0.0) else {
        return (None, None);
    };

    let cp = match (usl, lsl) {
        (Some(u), Some(l)) => Some((u - l) / (6.0 * sigma)),
        _ => None,
    };
    let cpu = usl.map(|u| (u - mean) / (3.0 * sigma));
    let cpl = lsl.map(|l| (mean - l) / (3.0 * sigma));
    let cpk = match (cpu, cpl) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    };
    (cp, cpk)
}

/// In-spec probability under a normal fit, `P(LSL <= X <= USL)`.
fn estimated_yield(
    mean: f64,
    std_dev: Option<f64>,
    usl: Option<f64>,
    lsl: Option<f64>,
) -> Option<f64> {
    let sigma = std_dev.filter(|s| *s > 0.0)?;
    let dist = Normal::new(mean, sigma).ok()?;
    let upper = usl.map_or(1.0, |u| dist.cdf(u));
    let lower = lsl.map_or(0.0, |l| dist.cdf(l));
    Some((upper - lower).max(0.0))
}

fn wafer_summaries(artifact: &ParamArtifact) -> Vec<WaferSummary> {
    let mut by_wafer: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for sv in &artifact.values {
        if let Some(v) = sv.value.filter(|v| v.is_finite()) {
            by_wafer.entry(sv.wafer.as_str()).or_default().push(v);
        }
    }

    by_wafer
        .into_iter()
        .filter_map(|(wafer, values)| {
            let mean = robust::mean(&values)?;
            let median = robust::median(&values)?;
            let oos_count = values
                .iter()
                .filter(|v| {
                    artifact.limit_upper.is_some_and(|u| **v > u)
                        || artifact.limit_lower.is_some_and(|l| **v < l)
                })
                .count();
            Some(WaferSummary {
                wafer: wafer.to_string(),
                count: values.len(),
                mean,
                median,
                oos_count,
            })
        })
        .collect()
}

// ============================================================================
// Batch rendering
// ============================================================================

/// Load every per-parameter artifact of a batch, summarize, and render the
/// batch HTML report to `<batch>/report/index.html`. Returns the path of
/// the rendered page.
pub fn render_batch_from_artifacts(batch_dir: &Path) -> Result<PathBuf> {
    let json_dir = batch_dir.join("json");
    let scan_dir = if json_dir.is_dir() {
        json_dir
    } else {
        batch_dir.to_path_buf()
    };

    let mut files = units::artifact_files(&scan_dir)?;
    files.sort();
    if files.is_empty() {
        return Err(AnalyzerError::DataAccess(format!(
            "no artifacts to report on in {}",
            scan_dir.display()
        )));
    }

    let mut params = Vec::new();
    let mut lot = None;
    for path in &files {
        let artifact = match read_artifact(path) {
            Ok(a) => a,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping unreadable artifact");
                continue;
            }
        };
        if lot.is_none() {
            lot = artifact.values.first().map(|sv| sv.lot.clone());
        }
        if let Some(summary) = summarize_artifact(&artifact) {
            params.push(summary);
        }
    }

    let batch = batch_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("batch")
        .to_string();
    let report = BatchReport {
        batch,
        lot,
        generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        params,
    };

    let report_dir = batch_dir.join("report");
    fs::create_dir_all(&report_dir).map_err(|e| AnalyzerError::io(&report_dir, e))?;
    let page = report_dir.join("index.html");
    fs::write(&page, html::render_batch(&report)).map_err(|e| AnalyzerError::io(&page, e))?;

    info!(
        batch = %report.batch,
        params = report.params.len(),
        page = %page.display(),
        "batch report rendered"
    );
    Ok(page)
}

fn read_artifact(path: &Path) -> Result<ParamArtifact> {
    let text = fs::read_to_string(path).map_err(|e| AnalyzerError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| AnalyzerError::json(path, e))
}

/// Render the top-level index page linking every processed batch.
pub fn render_batch_index(output_dir: &Path, batches: &[String]) -> Result<PathBuf> {
    let page = output_dir.join("index.html");
    fs::write(&page, html::render_index(batches)).map_err(|e| AnalyzerError::io(&page, e))?;
    Ok(page)
}
