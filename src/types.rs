//! Core data model: measurement tables, limit specifications, cleaning flags
//! and the exported per-parameter JSON artifact.
//!
//! A [`MeasurementTable`] is the in-memory record store for one batch:
//! rows are probed sites, columns are test parameters. Cleaning passes flag
//! or remove cell values but never drop rows, so row identity
//! (lot, wafer, site) is stable across passes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ============================================================================
// Measurement rows
// ============================================================================

/// One probed device/site: identity plus a sparse map of parameter values.
/// A parameter absent from `values` is missing, not zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Lot (batch) identifier, e.g. "FA51-3283".
    pub lot: String,
    /// Wafer number within the lot, zero-padded ("01", "02", ...).
    pub wafer: String,
    /// Site / unit number on the wafer (the log's `No.U` column).
    pub site: u32,
    /// Parameter name → measured value.
    pub values: BTreeMap<String, f64>,
}

impl Measurement {
    /// Look up a parameter value, `None` when missing.
    pub fn value(&self, param: &str) -> Option<f64> {
        self.values.get(param).copied()
    }
}

/// In-memory tabular store for one batch of CP test data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTable {
    /// Rows in log order.
    pub rows: Vec<Measurement>,
    /// Ordered parameter (column) names. May include parameters that are
    /// missing from every row (present in the limit spec only).
    pub params: Vec<String>,
}

impl MeasurementTable {
    /// Build a table from rows, deriving the column list from the union of
    /// row keys plus any `extra_params` that must exist as (empty) columns.
    pub fn from_rows(rows: Vec<Measurement>, extra_params: &[String]) -> Self {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut params: Vec<String> = Vec::new();
        for p in extra_params {
            if seen.insert(p.clone()) {
                params.push(p.clone());
            }
        }
        for row in &rows {
            for key in row.values.keys() {
                if seen.insert(key.clone()) {
                    params.push(key.clone());
                }
            }
        }
        Self { rows, params }
    }

    /// Number of rows (probed sites).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the column exists at all.
    pub fn has_param(&self, param: &str) -> bool {
        self.params.iter().any(|p| p == param)
    }

    /// Numeric values of one column as `(row_index, value)` pairs.
    /// Missing and non-finite cells are skipped.
    pub fn column(&self, param: &str) -> Vec<(usize, f64)> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(i, row)| row.value(param).filter(|v| v.is_finite()).map(|v| (i, v)))
            .collect()
    }

    /// Lot identifier of the batch (taken from the first row).
    pub fn lot(&self) -> Option<&str> {
        self.rows.first().map(|r| r.lot.as_str())
    }
}

// ============================================================================
// Limit specification
// ============================================================================

/// Spec limits for one parameter, as declared by the log's LimitU/LimitL rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamLimits {
    /// Upper spec limit (LimitU), in the declared unit.
    pub upper: Option<f64>,
    /// Lower spec limit (LimitL), in the declared unit.
    pub lower: Option<f64>,
    /// Canonical unit label of the declared limits ("V", "mΩ", "nA", ...).
    pub unit: Option<String>,
}

/// Parameter name → declared limits. The scaling target ("LimitU unit")
/// for each parameter comes from here.
pub type LimitSpec = BTreeMap<String, ParamLimits>;

// ============================================================================
// Cleaning flags
// ============================================================================

/// Per (row, parameter) annotation attached during a cleaning pass.
/// Values are preserved when flagged; only `OutlierRemoved` cells lose
/// their value (the cell becomes missing).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleaningFlag {
    /// Value passed all checks (the default; never stored explicitly).
    #[default]
    Ok,
    /// Statistically anomalous, value retained.
    OutlierFlagged,
    /// Statistically anomalous, value converted to missing.
    OutlierRemoved,
    /// Beyond a spec limit but within the statistical bounds.
    OutOfSpec,
}

/// Flag report produced by one cleaning pass: every non-`Ok` cell plus the
/// target parameters that were not found in the table at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagReport {
    /// Parameter → `(row_index, flag)` for every non-`Ok` cell.
    pub flags: BTreeMap<String, Vec<(usize, CleaningFlag)>>,
    /// Target parameters absent from the measurement table
    /// (reported, but they never abort the pass for sibling parameters).
    pub missing_params: Vec<String>,
}

impl FlagReport {
    /// Record a non-`Ok` flag for a cell.
    pub fn record(&mut self, param: &str, row: usize, flag: CleaningFlag) {
        debug_assert!(flag != CleaningFlag::Ok);
        self.flags
            .entry(param.to_string())
            .or_default()
            .push((row, flag));
    }

    /// Note a parameter that was requested but not present in the table.
    pub fn note_missing(&mut self, param: &str) {
        self.missing_params.push(param.to_string());
    }

    /// Flag for a specific cell, `Ok` when nothing was recorded.
    pub fn flag_for(&self, param: &str, row: usize) -> CleaningFlag {
        self.flags
            .get(param)
            .and_then(|v| v.iter().find(|(r, _)| *r == row))
            .map(|(_, f)| *f)
            .unwrap_or_default()
    }

    /// Number of cells carrying `flag` for the given parameter.
    pub fn count(&self, param: &str, flag: CleaningFlag) -> usize {
        self.flags
            .get(param)
            .map(|v| v.iter().filter(|(_, f)| *f == flag).count())
            .unwrap_or(0)
    }

    /// Total number of non-`Ok` cells across all parameters.
    pub fn total_flagged(&self) -> usize {
        self.flags.values().map(Vec::len).sum()
    }
}

// ============================================================================
// Exported per-parameter artifact
// ============================================================================

/// One value in a per-parameter artifact, with row identity preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteValue {
    pub lot: String,
    pub wafer: String,
    pub site: u32,
    /// Measured value; `None` when the cleaning pass removed it.
    pub value: Option<f64>,
    /// Cleaning annotation for this cell.
    #[serde(default)]
    pub flag: CleaningFlag,
}

/// The on-disk JSON document `<PARAM>_data.json` written per parameter and
/// consumed by the unit adjuster and the report aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamArtifact {
    /// Parameter name, e.g. "RDSON1".
    pub parameter: String,
    /// Unit the stored `values` are currently expressed in. This label is
    /// the authoritative idempotence guard for unit adjustment.
    pub unit: Option<String>,
    /// Upper spec limit in the LimitU unit.
    pub limit_upper: Option<f64>,
    /// Lower spec limit in the LimitU unit.
    pub limit_lower: Option<f64>,
    /// Set once the unit adjuster has rescaled this artifact. Secondary
    /// guard against double-scaling when the unit label is unreliable.
    #[serde(default)]
    pub adjusted: bool,
    /// Per-site values in row order.
    pub values: Vec<SiteValue>,
}

impl ParamArtifact {
    /// Numeric values currently present (removed cells excluded).
    pub fn numeric_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .filter_map(|sv| sv.value)
            .filter(|v| v.is_finite())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(site: u32, param: &str, value: f64) -> Measurement {
        let mut values = BTreeMap::new();
        values.insert(param.to_string(), value);
        Measurement {
            lot: "FA51-3283".to_string(),
            wafer: "01".to_string(),
            site,
            values,
        }
    }

    #[test]
    fn table_column_skips_missing_cells() {
        let mut rows = vec![make_row(1, "VTH", 3.5), make_row(2, "VTH", 3.6)];
        rows.push(Measurement {
            lot: "FA51-3283".to_string(),
            wafer: "01".to_string(),
            site: 3,
            values: BTreeMap::new(),
        });
        let table = MeasurementTable::from_rows(rows, &[]);

        assert_eq!(table.len(), 3);
        assert_eq!(table.column("VTH"), vec![(0, 3.5), (1, 3.6)]);
    }

    #[test]
    fn from_rows_keeps_extra_params_as_empty_columns() {
        let table =
            MeasurementTable::from_rows(vec![make_row(1, "VTH", 3.5)], &["IDSS3".to_string()]);
        assert!(table.has_param("IDSS3"));
        assert!(table.column("IDSS3").is_empty());
    }

    #[test]
    fn flag_report_defaults_to_ok() {
        let mut report = FlagReport::default();
        report.record("VTH", 4, CleaningFlag::OutlierFlagged);

        assert_eq!(report.flag_for("VTH", 4), CleaningFlag::OutlierFlagged);
        assert_eq!(report.flag_for("VTH", 0), CleaningFlag::Ok);
        assert_eq!(report.count("VTH", CleaningFlag::OutlierFlagged), 1);
    }

    #[test]
    fn cleaning_flag_serializes_kebab_case() {
        let json = serde_json::to_string(&CleaningFlag::OutlierFlagged).unwrap();
        assert_eq!(json, "\"outlier-flagged\"");
    }
}
