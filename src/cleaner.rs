//! Batch cleaning facade: load raw CP logs, run a cleaning strategy, export
//! per-parameter JSON artifacts.
//!
//! [`CpLogCleaner`] owns the batch state (table, limits, unit labels) and
//! drives the load -> clean -> export sequence for one batch directory.
//! Exported artifacts keep values in raw instrument units; the unit adjuster
//! rescales them to LimitU units in a separate, idempotent pass.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::cleaning::CleaningStrategy;
use crate::error::{AnalyzerError, Result};
use crate::parser::CpLogParser;
use crate::types::{FlagReport, LimitSpec, MeasurementTable, ParamArtifact, SiteValue};
use crate::units;

pub struct CpLogCleaner {
    target_params: Vec<String>,
    output_dir: PathBuf,
    table: Option<MeasurementTable>,
    limits: LimitSpec,
    /// Current unit label per parameter. Raw units after load, rewritten
    /// only by the unit adjuster.
    unit_labels: BTreeMap<String, String>,
    last_report: Option<FlagReport>,
}

impl CpLogCleaner {
    pub fn new(output_dir: impl Into<PathBuf>, target_params: Vec<String>) -> Self {
        Self {
            target_params,
            output_dir: output_dir.into(),
            table: None,
            limits: LimitSpec::new(),
            unit_labels: BTreeMap::new(),
            last_report: None,
        }
    }

    /// Parse every log file in `data_dir` into the working table.
    pub fn load_dir(&mut self, data_dir: &Path) -> Result<()> {
        let parser = CpLogParser::new(data_dir, self.target_params.clone());
        let (table, limits) = parser.parse_all_files()?;
        self.install(table, limits);
        Ok(())
    }

    /// Install an already-parsed table, e.g. from a test fixture.
    pub fn load_table(&mut self, table: MeasurementTable, limits: LimitSpec) {
        self.install(table, limits);
    }

    fn install(&mut self, table: MeasurementTable, limits: LimitSpec) {
        self.unit_labels.clear();
        for param in &table.params {
            // Parameters under a scaling rule start in the rule's raw unit.
            // Everything else is already in its declared limit unit.
            let label = match units::rule_for(param) {
                Some(rule) => Some(rule.raw_unit.to_string()),
                None => limits.get(param).and_then(|pl| pl.unit.clone()),
            };
            if let Some(label) = label {
                self.unit_labels.insert(param.clone(), label);
            }
        }
        info!(
            rows = table.len(),
            params = table.params.len(),
            lot = table.lot().unwrap_or("?"),
            "batch loaded"
        );
        self.table = Some(table);
        self.limits = limits;
        self.last_report = None;
    }

    pub fn table(&self) -> Option<&MeasurementTable> {
        self.table.as_ref()
    }

    pub fn limits(&self) -> &LimitSpec {
        &self.limits
    }

    pub fn last_report(&self) -> Option<&FlagReport> {
        self.last_report.as_ref()
    }

    /// Run one cleaning pass over the loaded table, replacing it with the
    /// cleaned copy. `params` restricts the pass; empty means every target
    /// parameter.
    pub fn clean(&mut self, strategy: CleaningStrategy, params: &[String]) -> Result<&FlagReport> {
        let table = self.table.as_ref().ok_or_else(|| {
            AnalyzerError::Configuration("no data loaded, call load_dir first".to_string())
        })?;

        let targets: &[String] = if params.is_empty() {
            &self.target_params
        } else {
            params
        };
        let (cleaned, report) = strategy.clean(table, targets, &self.limits);

        info!(
            strategy = %strategy,
            flagged = report.total_flagged(),
            missing = report.missing_params.len(),
            "cleaning pass complete"
        );
        for param in &report.missing_params {
            warn!(param = %param, "target parameter absent from batch");
        }

        self.table = Some(cleaned);
        self.last_report = Some(report);
        #[allow(clippy::unwrap_used)] // assigned on the line above
        Ok(self.last_report.as_ref().unwrap())
    }

    /// Write one `<PARAM>_data.json` artifact per target parameter plus an
    /// `all_data.json` snapshot of the whole table, under `<output>/json/`.
    /// Returns the paths written.
    pub fn export_json(&self, params: &[String]) -> Result<Vec<PathBuf>> {
        let table = self.table.as_ref().ok_or_else(|| {
            AnalyzerError::Configuration("no data loaded, nothing to export".to_string())
        })?;

        let json_dir = self.output_dir.join("json");
        fs::create_dir_all(&json_dir).map_err(|e| AnalyzerError::io(&json_dir, e))?;

        let targets: &[String] = if params.is_empty() {
            &self.target_params
        } else {
            params
        };

        let mut written = Vec::new();
        for param in targets {
            if !table.has_param(param) {
                continue;
            }
            let artifact = self.build_artifact(table, param);
            let path = json_dir.join(format!("{param}_data.json"));
            units::write_json_atomic(&path, &artifact)?;
            written.push(path);
        }

        let all_path = json_dir.join("all_data.json");
        units::write_json_atomic(&all_path, table)?;
        written.push(all_path);

        info!(
            dir = %json_dir.display(),
            artifacts = written.len(),
            "batch artifacts exported"
        );
        Ok(written)
    }

    fn build_artifact(&self, table: &MeasurementTable, param: &str) -> ParamArtifact {
        let limits = self.limits.get(param);
        let values = table
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| SiteValue {
                lot: row.lot.clone(),
                wafer: row.wafer.clone(),
                site: row.site,
                value: row.value(param),
                flag: self
                    .last_report
                    .as_ref()
                    .map(|r| r.flag_for(param, i))
                    .unwrap_or_default(),
            })
            .collect();

        ParamArtifact {
            parameter: param.to_string(),
            unit: self.unit_labels.get(param).cloned(),
            limit_upper: limits.and_then(|pl| pl.upper),
            limit_lower: limits.and_then(|pl| pl.lower),
            adjusted: false,
            values,
        }
    }
}
