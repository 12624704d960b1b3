//! CP test log parser
//!
//! Parses the tab-separated text logs emitted by wafer probe testers.
//! A log file looks like:
//!
//! ```text
//! Lot number\tFA51-3283
//! Wafer number\t1
//! ...
//! No.U\tBVDSS1\tVTH\tRDSON1\t...
//! LimitU\t900.0V\t4.0V\t365.0mOHM\t...
//! LimitL\t660.0V\t3.0V\t100.0mOHM\t...
//! 1\t735.2\t3.52\t3.35782E-002\t...
//! 2\t...
//! ```
//!
//! Limit cells carry a unit suffix ("900.0V", "365.0mOHM", "250nA") that is
//! extracted by regex and normalized to a canonical label. Values are kept
//! in their raw instrument units; rescaling to the LimitU unit is the unit
//! adjuster's job, applied once after export.
//!
//! Header fields missing from the file body fall back to the filename
//! (`<LOT>_<wafer>.TXT`) and finally to the batch directory name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{AnalyzerError, Result};
use crate::types::{LimitSpec, Measurement, MeasurementTable, ParamLimits};
use crate::units;

/// Default target parameter set for power-MOSFET CP programs.
pub const DEFAULT_TARGET_PARAMS: &[&str] = &[
    "BVDSS1", "BVDSS2", "DELTABV", "IDSS1", "VTH", "RDSON1", "VFSDS", "IGSS2", "IGSSR2", "IDSS2",
    "IDSS3",
];

/// Testers write this sentinel for sites that did not measure.
const INVALID_SENTINEL: &str = "999.9";

/// How many header lines to scan for lot/wafer metadata.
const HEADER_SCAN_LINES: usize = 20;

/// How far below the parameter row the LimitU/LimitL rows may sit.
const LIMIT_ROW_WINDOW: usize = 10;

/// Raw log file extensions worth attempting (case-insensitive).
const LOG_EXTENSIONS: &[&str] = &["txt", "log", "csv", "dat"];

fn limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        Regex::new(r"([-+]?\d*\.?\d+(?:[eE][-+]?\d+)?)\s*([a-zA-ZΩμ-]*)").unwrap()
    })
}

fn lot_from_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"([A-Z0-9]+-\d+)").unwrap()
    })
}

fn wafer_from_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"_(\d+)\.").unwrap()
    })
}

// ============================================================================
// Limit values
// ============================================================================

/// Parse a limit cell like "900.0V", "365.0mOHM" or "1.20E-08" into a
/// numeric value and a canonical unit label.
pub fn parse_limit_value(cell: &str) -> Option<(f64, Option<String>)> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Bare scientific notation parses directly ("2.50E-07").
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some((v, None));
    }

    let caps = limit_re().captures(trimmed)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps
        .get(2)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty() && *s != "-")
        .and_then(units::normalize_unit)
        .map(str::to_string);
    Some((value, unit))
}

/// Built-in fallback limits for the known parameter set, in LimitU units.
/// Used when a log file carries no (or incomplete) limit rows.
pub fn default_limits(param: &str) -> Option<ParamLimits> {
    let (upper, lower, unit) = match param {
        "BVDSS1" | "BVDSS2" => (900.0, 660.0, "V"),
        "DELTABV" => (50.0, -10.0, "V"),
        "IDSS1" | "IDSS2" => (250.0, 0.0, "nA"),
        "IDSS3" => (250.0, 0.0, "μA"),
        "VTH" => (4.0, 3.0, "V"),
        "RDSON1" => (365.0, 100.0, "mΩ"),
        "VFSDS" => (1.0, 0.0, "V"),
        "IGSS2" | "IGSSR2" => (300.0, 0.0, "nA"),
        _ => return None,
    };
    Some(ParamLimits {
        upper: Some(upper),
        lower: Some(lower),
        unit: Some(unit.to_string()),
    })
}

// ============================================================================
// Parser
// ============================================================================

/// Parser over one batch directory of raw CP log files.
pub struct CpLogParser {
    data_dir: PathBuf,
    target_params: Vec<String>,
}

impl CpLogParser {
    pub fn new(data_dir: impl Into<PathBuf>, target_params: Vec<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            target_params,
        }
    }

    /// Parse every recognizable log file in the batch directory and merge
    /// the results into one table + limit spec.
    ///
    /// A file that fails to parse is logged and skipped; the pass fails
    /// only when no file yields any data.
    pub fn parse_all_files(&self) -> Result<(MeasurementTable, LimitSpec)> {
        let files = self.collect_files()?;
        if files.is_empty() {
            return Err(AnalyzerError::DataAccess(format!(
                "no CP log files found in {}",
                self.data_dir.display()
            )));
        }
        info!(dir = %self.data_dir.display(), files = files.len(), "parsing CP logs");

        let mut all_rows: Vec<Measurement> = Vec::new();
        let mut all_limits = LimitSpec::new();
        let mut parsed_files = 0usize;

        for path in &files {
            match self.parse_file(path) {
                Ok((rows, limits)) => {
                    if !rows.is_empty() {
                        parsed_files += 1;
                    }
                    all_rows.extend(rows);
                    merge_limits(&mut all_limits, limits);
                }
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "skipping unparseable log file");
                }
            }
        }

        if all_rows.is_empty() {
            return Err(AnalyzerError::DataAccess(format!(
                "no valid CP records extracted from {}",
                self.data_dir.display()
            )));
        }

        // Fill gaps in the limit spec from the built-in table.
        for param in &self.target_params {
            let entry = all_limits.entry(param.clone()).or_default();
            if let Some(defaults) = default_limits(param) {
                if entry.upper.is_none() {
                    entry.upper = defaults.upper;
                }
                if entry.lower.is_none() {
                    entry.lower = defaults.lower;
                }
                if entry.unit.is_none() {
                    entry.unit = defaults.unit;
                }
            }
        }

        info!(
            files = parsed_files,
            records = all_rows.len(),
            "CP log parsing complete"
        );
        let table = MeasurementTable::from_rows(all_rows, &self.target_params);
        Ok((table, all_limits))
    }

    /// Parse one log file. Lot/wafer fall back to the filename, then to
    /// the batch directory name.
    pub fn parse_file(&self, path: &Path) -> Result<(Vec<Measurement>, LimitSpec)> {
        let bytes = fs::read(path).map_err(|e| AnalyzerError::io(path, e))?;
        let text = String::from_utf8_lossy(&bytes);

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let fallback_lot = lot_from_filename_re()
            .captures(filename)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| {
                self.data_dir
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("UNKNOWN-LOT")
                    .to_string()
            });
        let fallback_wafer = wafer_from_filename_re()
            .captures(filename)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());

        parse_log_text(&text, &fallback_lot, fallback_wafer, &self.target_params).map_err(|msg| {
            AnalyzerError::DataAccess(format!("{}: {msg}", path.display()))
        })
    }

    /// Candidate log files, deduplicated case-insensitively by basename
    /// and sorted for deterministic processing order.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let entries =
            fs::read_dir(&self.data_dir).map_err(|e| AnalyzerError::io(&self.data_dir, e))?;

        let mut by_basename: BTreeMap<String, PathBuf> = BTreeMap::new();
        for entry in entries {
            let entry = entry.map_err(|e| AnalyzerError::io(&self.data_dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| LOG_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if !ext_ok {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                by_basename.entry(name.to_lowercase()).or_insert(path);
            }
        }
        Ok(by_basename.into_values().collect())
    }
}

// ============================================================================
// Text-level parsing
// ============================================================================

/// Parse the body of one CP log. Pure function over the text; filesystem
/// fallbacks are supplied by the caller.
fn parse_log_text(
    text: &str,
    fallback_lot: &str,
    fallback_wafer: Option<String>,
    target_params: &[String],
) -> std::result::Result<(Vec<Measurement>, LimitSpec), String> {
    let lines: Vec<&str> = text.lines().collect();

    // -- Header metadata --
    let mut lot: Option<String> = None;
    let mut wafer: Option<String> = None;
    for line in lines.iter().take(HEADER_SCAN_LINES) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 2 {
            continue;
        }
        let label = fields[0].trim().to_ascii_uppercase();
        if lot.is_none() && label.contains("LOT") {
            lot = Some(fields[1].trim().to_string()).filter(|s| !s.is_empty());
        } else if wafer.is_none() && label.contains("WAFER") {
            wafer = Some(fields[1].trim().to_string()).filter(|s| !s.is_empty());
        }
    }
    let lot = lot.unwrap_or_else(|| fallback_lot.to_string());
    let wafer = wafer.or(fallback_wafer).unwrap_or_else(|| "1".to_string());
    // Zero-pad numeric wafer ids so they sort naturally ("01", "02", ...).
    let wafer = match wafer.parse::<u32>() {
        Ok(n) => format!("{n:02}"),
        Err(_) => wafer,
    };

    // -- Parameter row --
    let param_row = lines
        .iter()
        .position(|line| line.contains("No.U"))
        .or_else(|| {
            lines.iter().position(|line| {
                target_params.iter().filter(|p| line.contains(p.as_str())).count() >= 3
            })
        })
        .ok_or("no parameter name row found")?;
    let param_names: Vec<&str> = lines[param_row].split('\t').map(str::trim).collect();

    // -- Limit rows --
    let mut limit_u_row = None;
    let mut limit_l_row = None;
    for (i, line) in lines
        .iter()
        .enumerate()
        .skip(param_row + 1)
        .take(LIMIT_ROW_WINDOW)
    {
        if line.contains("LimitU") || line.contains("USL") {
            limit_u_row = Some(i);
        } else if line.contains("LimitL") || line.contains("LSL") {
            limit_l_row = Some(i);
        }
    }

    let mut limits = LimitSpec::new();
    if let (Some(u_row), Some(l_row)) = (limit_u_row, limit_l_row) {
        let upper_cells: Vec<&str> = lines[u_row].split('\t').collect();
        let lower_cells: Vec<&str> = lines[l_row].split('\t').collect();
        for (i, name) in param_names.iter().enumerate() {
            if !target_params.iter().any(|p| p == name) {
                continue;
            }
            let upper = upper_cells.get(i).and_then(|c| parse_limit_value(c));
            let lower = lower_cells.get(i).and_then(|c| parse_limit_value(c));
            limits.insert(
                name.to_string(),
                ParamLimits {
                    upper: upper.clone().map(|(v, _)| v),
                    lower: lower.map(|(v, _)| v),
                    unit: upper.and_then(|(_, u)| u),
                },
            );
        }
    } else {
        debug!(lot = %lot, "log carries no limit rows, defaults will apply");
    }

    // -- Data rows --
    let mut rows = Vec::new();
    for line in lines.iter().skip(param_row + 1) {
        let line = line.trim_end();
        if line.is_empty() || line.contains("LimitU") || line.contains("LimitL") {
            continue;
        }
        let cells: Vec<&str> = line.split('\t').collect();
        if cells.len() < 3 || !cells[0].chars().all(|c| c.is_ascii_digit()) || cells[0].is_empty()
        {
            continue;
        }
        let Ok(site) = cells[0].parse::<u32>() else {
            continue;
        };

        let mut values = BTreeMap::new();
        for param in target_params {
            let Some(col) = param_names.iter().position(|n| n == param) else {
                continue;
            };
            let Some(cell) = cells.get(col).map(|c| c.trim()) else {
                continue;
            };
            if cell.is_empty() || cell == INVALID_SENTINEL {
                continue;
            }
            if let Ok(value) = cell.parse::<f64>() {
                if value.is_finite() {
                    values.insert(param.clone(), value);
                }
            }
        }

        if !values.is_empty() {
            rows.push(Measurement {
                lot: lot.clone(),
                wafer: wafer.clone(),
                site,
                values,
            });
        }
    }

    Ok((rows, limits))
}

/// Merge per-file limits into the batch spec; first non-empty field wins.
fn merge_limits(into: &mut LimitSpec, from: LimitSpec) {
    for (param, incoming) in from {
        let entry = into.entry(param).or_default();
        if entry.upper.is_none() {
            entry.upper = incoming.upper;
        }
        if entry.lower.is_none() {
            entry.lower = incoming.lower;
        }
        if entry.unit.is_none() {
            entry.unit = incoming.unit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = "\
Test program\tPMOS650-CP\n\
Lot number\tFA51-3283\n\
Wafer number\t3\n\
Operator\tT.E.\n\
No.U\tBVDSS1\tVTH\tRDSON1\tIDSS1\n\
LimitU\t900.0V\t4.0V\t365.0mOHM\t250nA\n\
LimitL\t660.0V\t3.0V\t100.0mOHM\t0.0nA\n\
1\t735.2\t3.52\t3.35782E-002\t1.20E-09\n\
2\t741.8\t3.48\t3.41000E-002\t999.9\n\
3\t\t3.55\t3.29000E-002\t1.10E-09\n";

    fn targets() -> Vec<String> {
        vec![
            "BVDSS1".to_string(),
            "VTH".to_string(),
            "RDSON1".to_string(),
            "IDSS1".to_string(),
        ]
    }

    #[test]
    fn parses_header_limits_and_rows() {
        let (rows, limits) = parse_log_text(SAMPLE_LOG, "FALLBACK", None, &targets()).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].lot, "FA51-3283");
        assert_eq!(rows[0].wafer, "03");
        assert_eq!(rows[0].site, 1);
        assert_eq!(rows[0].value("BVDSS1"), Some(735.2));
        assert!((rows[0].value("RDSON1").unwrap() - 0.0335782).abs() < 1e-9);

        let rdson = limits.get("RDSON1").unwrap();
        assert_eq!(rdson.upper, Some(365.0));
        assert_eq!(rdson.lower, Some(100.0));
        assert_eq!(rdson.unit.as_deref(), Some("mΩ"));

        let idss = limits.get("IDSS1").unwrap();
        assert_eq!(idss.upper, Some(250.0));
        assert_eq!(idss.unit.as_deref(), Some("nA"));
    }

    #[test]
    fn sentinel_and_empty_cells_become_missing() {
        let (rows, _) = parse_log_text(SAMPLE_LOG, "FALLBACK", None, &targets()).unwrap();

        // 999.9 sentinel on site 2, blank BVDSS1 on site 3.
        assert_eq!(rows[1].value("IDSS1"), None);
        assert_eq!(rows[2].value("BVDSS1"), None);
        assert_eq!(rows[2].value("VTH"), Some(3.55));
    }

    #[test]
    fn falls_back_to_filename_metadata() {
        let headerless = "\
No.U\tVTH\tBVDSS1\tRDSON1\n\
1\t3.5\t740.0\t0.033\n\
2\t3.6\t738.0\t0.034\n";
        let (rows, _) = parse_log_text(
            headerless,
            "FA49-2230",
            Some("7".to_string()),
            &targets(),
        )
        .unwrap();

        assert_eq!(rows[0].lot, "FA49-2230");
        assert_eq!(rows[0].wafer, "07");
    }

    #[test]
    fn limit_value_parsing_normalizes_units() {
        assert_eq!(parse_limit_value("900.0V"), Some((900.0, Some("V".to_string()))));
        assert_eq!(
            parse_limit_value("365.0mOHM"),
            Some((365.0, Some("mΩ".to_string())))
        );
        assert_eq!(parse_limit_value("250nA"), Some((250.0, Some("nA".to_string()))));
        assert_eq!(parse_limit_value("2.50E-07"), Some((2.5e-7, None)));
        assert_eq!(parse_limit_value(""), None);
        // "50.00-" style cells mean a plain positive bound.
        assert_eq!(parse_limit_value("50.00-"), Some((50.0, None)));
    }

    #[test]
    fn default_limits_cover_the_known_parameter_set() {
        for param in DEFAULT_TARGET_PARAMS {
            assert!(default_limits(param).is_some(), "missing defaults for {param}");
        }
        assert!(default_limits("SOMETHING_ELSE").is_none());

        let rdson = default_limits("RDSON1").unwrap();
        assert_eq!(rdson.unit.as_deref(), Some("mΩ"));
        assert_eq!(rdson.upper, Some(365.0));
    }
}
