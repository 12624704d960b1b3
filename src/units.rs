//! Unit Adjuster
//!
//! Rescales measurement values so their magnitude matches the declared
//! LimitU unit (e.g. raw ohms → milliohms for RDSON1). The static
//! [`UNIT_RULES`] table is the single source of truth for scaling; it is an
//! immutable process-wide constant and safe for concurrent reads.
//!
//! The adjuster may run several times over the same artifacts (per batch
//! script run, re-run by an operator), so every apply is guarded: a value
//! is rescaled only when its stored unit label still matches the rule's
//! raw unit. A label already equal to the target unit — or an artifact
//! carrying the explicit `adjusted` marker — is skipped, which prevents
//! silent double-scaling (×1000 applied twice is a ×1,000,000 error).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{AnalyzerError, Result};
use crate::types::{MeasurementTable, ParamArtifact};

// ============================================================================
// Multiplier table
// ============================================================================

/// One row of the unit multiplier table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitRule {
    /// Parameter this rule applies to.
    pub param: &'static str,
    /// Multiplier taking a raw-unit value to the target unit.
    pub factor: f64,
    /// Unit raw log values are measured in.
    pub raw_unit: &'static str,
    /// Unit the LimitU specification declares.
    pub target_unit: &'static str,
}

/// The fixed, versioned unit multiplier table. Not user-editable at
/// runtime.
pub const UNIT_RULES: &[UnitRule] = &[
    UnitRule { param: "RDSON1", factor: 1e3, raw_unit: "Ω", target_unit: "mΩ" },
    UnitRule { param: "IDSS1", factor: 1e9, raw_unit: "A", target_unit: "nA" },
    UnitRule { param: "IDSS2", factor: 1e9, raw_unit: "A", target_unit: "nA" },
    UnitRule { param: "IGSS2", factor: 1e9, raw_unit: "A", target_unit: "nA" },
    UnitRule { param: "IGSSR2", factor: 1e9, raw_unit: "A", target_unit: "nA" },
    UnitRule { param: "IDSS3", factor: 1e6, raw_unit: "A", target_unit: "μA" },
];

/// Rule for a parameter, `None` when the parameter needs no adjustment.
pub fn rule_for(param: &str) -> Option<&'static UnitRule> {
    UNIT_RULES.iter().find(|r| r.param == param)
}

/// The default adjustment target set: every parameter in the table.
pub fn default_params() -> Vec<String> {
    UNIT_RULES.iter().map(|r| r.param.to_string()).collect()
}

/// Map the many observed spellings of a unit label ("mohm", "mΩ", "uA",
/// "μA", ...) to its canonical form. Returns `None` for labels that are
/// not recognized electrical units.
pub fn normalize_unit(label: &str) -> Option<&'static str> {
    match label.trim().to_lowercase().as_str() {
        "ohm" | "ohms" | "ω" => Some("Ω"),
        "mohm" | "mohms" | "mω" | "milliohm" | "milliohms" => Some("mΩ"),
        "a" | "amp" | "amps" | "ampere" | "amperes" => Some("A"),
        "ma" | "milliamp" | "milliamps" => Some("mA"),
        "ua" | "μa" | "microamp" | "microamps" => Some("μA"),
        "na" | "nanoamp" | "nanoamps" => Some("nA"),
        "v" | "volt" | "volts" => Some("V"),
        "mv" | "millivolt" | "millivolts" => Some("mV"),
        _ => None,
    }
}

// ============================================================================
// Adjustment outcomes
// ============================================================================

/// What the adjuster decided for one parameter/artifact. Skips are normal
/// operation, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdjustOutcome {
    /// Values were rescaled and the unit label updated.
    Adjusted { converted: usize },
    /// The stored label already equals the target unit (or the `adjusted`
    /// marker is set); nothing to do.
    AlreadyAdjusted,
    /// Parameter is not in the multiplier table; identity transform.
    NotApplicable,
    /// Stored label is missing or matches neither raw nor target unit.
    /// Rescaling would be a guess, so the artifact is left alone.
    UnknownUnit(String),
}

/// Tally over one batch directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdjustSummary {
    /// Artifacts whose values were rescaled.
    pub adjusted: usize,
    /// Artifacts skipped (already adjusted, not applicable, unknown unit).
    pub skipped: usize,
    /// Artifacts that could not be read, parsed or rewritten.
    pub failed: usize,
}

impl AdjustSummary {
    /// True when no artifact failed.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

// ============================================================================
// Core transform
// ============================================================================

/// Adjust one in-memory artifact. Pure with respect to the filesystem.
pub fn adjust_artifact(artifact: &mut ParamArtifact) -> AdjustOutcome {
    let Some(rule) = rule_for(&artifact.parameter) else {
        return AdjustOutcome::NotApplicable;
    };
    if artifact.adjusted {
        return AdjustOutcome::AlreadyAdjusted;
    }

    let label = match artifact.unit.as_deref() {
        Some(l) => l.to_string(),
        None => return AdjustOutcome::UnknownUnit("<missing>".to_string()),
    };

    match normalize_unit(&label) {
        Some(canon) if canon == rule.target_unit => AdjustOutcome::AlreadyAdjusted,
        Some(canon) if canon == rule.raw_unit => {
            let mut converted = 0;
            for sv in &mut artifact.values {
                if let Some(v) = sv.value.filter(|v| v.is_finite()) {
                    sv.value = Some(v * rule.factor);
                    converted += 1;
                }
            }
            artifact.unit = Some(rule.target_unit.to_string());
            artifact.adjusted = true;
            AdjustOutcome::Adjusted { converted }
        }
        _ => AdjustOutcome::UnknownUnit(label),
    }
}

/// Adjust an in-memory measurement frame. `labels` carries the current
/// unit label per parameter and is updated in place; the same label-based
/// guard applies as for artifacts.
pub fn adjust_frame(
    table: &mut MeasurementTable,
    labels: &mut BTreeMap<String, String>,
    params: Option<&[String]>,
) -> BTreeMap<String, AdjustOutcome> {
    let targets: Vec<String> = match params {
        Some(p) => p.to_vec(),
        None => table.params.clone(),
    };

    let mut outcomes = BTreeMap::new();
    for param in targets {
        let Some(rule) = rule_for(&param) else {
            outcomes.insert(param, AdjustOutcome::NotApplicable);
            continue;
        };

        let outcome = match labels.get(&param).map(|l| normalize_unit(l)) {
            Some(Some(canon)) if canon == rule.target_unit => AdjustOutcome::AlreadyAdjusted,
            Some(Some(canon)) if canon == rule.raw_unit => {
                let mut converted = 0;
                for row in &mut table.rows {
                    if let Some(v) = row.values.get_mut(&param) {
                        if v.is_finite() {
                            *v *= rule.factor;
                            converted += 1;
                        }
                    }
                }
                labels.insert(param.clone(), rule.target_unit.to_string());
                AdjustOutcome::Adjusted { converted }
            }
            Some(_) => AdjustOutcome::UnknownUnit(
                labels.get(&param).cloned().unwrap_or_default(),
            ),
            None => AdjustOutcome::UnknownUnit("<missing>".to_string()),
        };
        outcomes.insert(param, outcome);
    }
    outcomes
}

// ============================================================================
// Artifact files
// ============================================================================

/// Adjust one `<PARAM>_data.json` file in place (temp-then-rename).
/// The file is rewritten only when something actually changed.
pub fn adjust_artifact_file(path: &Path) -> Result<AdjustOutcome> {
    let text = fs::read_to_string(path).map_err(|e| AnalyzerError::io(path, e))?;
    let mut artifact: ParamArtifact =
        serde_json::from_str(&text).map_err(|e| AnalyzerError::json(path, e))?;

    let outcome = adjust_artifact(&mut artifact);
    if let AdjustOutcome::Adjusted { converted } = outcome {
        write_json_atomic(path, &artifact)?;
        info!(
            parameter = %artifact.parameter,
            converted,
            unit = artifact.unit.as_deref().unwrap_or(""),
            "rescaled artifact"
        );
    }
    Ok(outcome)
}

/// Serialize to a sibling temp file, then rename over the target. A crash
/// mid-write leaves the original artifact intact.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| AnalyzerError::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).map_err(|e| AnalyzerError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| AnalyzerError::io(path, e))?;
    Ok(())
}

/// Enumerate the per-parameter artifacts of one batch directory and
/// adjust each one. Artifacts live under `<batch>/json/` when that
/// subdirectory exists, otherwise directly in the batch directory.
///
/// A malformed or unreadable artifact is logged and counted as failed; it
/// never aborts processing of sibling artifacts. With `regenerate` set,
/// the batch HTML report is re-rendered from the adjusted artifacts.
pub fn adjust_batch_directory(
    batch_dir: &Path,
    params: Option<&[String]>,
    regenerate: bool,
) -> Result<AdjustSummary> {
    if !batch_dir.is_dir() {
        return Err(AnalyzerError::DataAccess(format!(
            "batch directory {} does not exist",
            batch_dir.display()
        )));
    }

    let json_dir = batch_dir.join("json");
    let scan_dir = if json_dir.is_dir() { json_dir } else { batch_dir.to_path_buf() };

    let mut files = artifact_files(&scan_dir)?;
    files.sort();
    if files.is_empty() {
        warn!(dir = %scan_dir.display(), "no *_data.json artifacts found");
        return Ok(AdjustSummary::default());
    }

    let mut summary = AdjustSummary::default();
    for path in &files {
        if let Some(filter) = params {
            let param = artifact_param_name(path);
            if !filter.iter().any(|p| p == param) {
                summary.skipped += 1;
                continue;
            }
        }

        match adjust_artifact_file(path) {
            Ok(AdjustOutcome::Adjusted { .. }) => summary.adjusted += 1,
            Ok(AdjustOutcome::AlreadyAdjusted) => {
                debug!(path = %path.display(), "already in target unit, skipping");
                summary.skipped += 1;
            }
            Ok(AdjustOutcome::NotApplicable) => summary.skipped += 1,
            Ok(AdjustOutcome::UnknownUnit(label)) => {
                warn!(
                    path = %path.display(),
                    label = %label,
                    "unit label matches neither raw nor target unit, not rescaling"
                );
                summary.skipped += 1;
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to adjust artifact");
                summary.failed += 1;
            }
        }
    }

    info!(
        batch = %batch_dir.display(),
        adjusted = summary.adjusted,
        skipped = summary.skipped,
        failed = summary.failed,
        "unit adjustment complete"
    );

    if regenerate {
        if let Err(err) = crate::report::render_batch_from_artifacts(batch_dir) {
            warn!(batch = %batch_dir.display(), error = %err, "report regeneration failed");
        }
    }

    Ok(summary)
}

/// Per-parameter `*_data.json` entries of a directory. The whole-table
/// `all_data.json` snapshot is not a parameter artifact and is excluded.
pub(crate) fn artifact_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| AnalyzerError::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AnalyzerError::io(dir, e))?;
        let path = entry.path();
        let is_artifact = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with("_data.json") && n != "all_data.json");
        if is_artifact && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Parameter name encoded in an artifact filename (`RDSON1_data.json`).
pub(crate) fn artifact_param_name(path: &Path) -> &str {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix("_data.json"))
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleaningFlag, SiteValue};

    fn make_artifact(param: &str, unit: Option<&str>, values: &[f64]) -> ParamArtifact {
        ParamArtifact {
            parameter: param.to_string(),
            unit: unit.map(str::to_string),
            limit_upper: None,
            limit_lower: None,
            adjusted: false,
            values: values
                .iter()
                .enumerate()
                .map(|(i, v)| SiteValue {
                    lot: "FA51-3283".to_string(),
                    wafer: "01".to_string(),
                    site: i as u32 + 1,
                    value: Some(*v),
                    flag: CleaningFlag::Ok,
                })
                .collect(),
        }
    }

    fn values_of(artifact: &ParamArtifact) -> Vec<f64> {
        artifact.values.iter().filter_map(|sv| sv.value).collect()
    }

    #[test]
    fn rdson_ohms_become_milliohms() {
        let mut artifact = make_artifact("RDSON1", Some("Ω"), &[0.05, 0.052, 0.049, 5.0]);

        let outcome = adjust_artifact(&mut artifact);
        assert_eq!(outcome, AdjustOutcome::Adjusted { converted: 4 });
        assert_eq!(values_of(&artifact), vec![50.0, 52.0, 49.0, 5000.0]);
        assert_eq!(artifact.unit.as_deref(), Some("mΩ"));
        assert!(artifact.adjusted);
    }

    #[test]
    fn adjustment_is_idempotent() {
        let mut artifact = make_artifact("IDSS1", Some("A"), &[1.2e-9]);

        assert_eq!(
            adjust_artifact(&mut artifact),
            AdjustOutcome::Adjusted { converted: 1 }
        );
        let after_first = artifact.clone();
        assert!((values_of(&artifact)[0] - 1.2).abs() < 1e-9);
        assert_eq!(artifact.unit.as_deref(), Some("nA"));

        // Re-running must not rescale again.
        assert_eq!(adjust_artifact(&mut artifact), AdjustOutcome::AlreadyAdjusted);
        assert_eq!(artifact, after_first);
    }

    #[test]
    fn label_already_in_target_unit_is_skipped() {
        let mut artifact = make_artifact("RDSON1", Some("mohm"), &[250.0]);
        assert_eq!(adjust_artifact(&mut artifact), AdjustOutcome::AlreadyAdjusted);
        assert_eq!(values_of(&artifact), vec![250.0]);
    }

    #[test]
    fn parameters_outside_the_table_are_identity() {
        let mut artifact = make_artifact("VTH", Some("V"), &[3.5, 3.6]);
        let before = artifact.clone();
        assert_eq!(adjust_artifact(&mut artifact), AdjustOutcome::NotApplicable);
        assert_eq!(artifact, before);
    }

    #[test]
    fn unknown_label_is_never_rescaled() {
        let mut artifact = make_artifact("IDSS2", Some("furlong"), &[1.0e-9]);
        let before = values_of(&artifact);
        assert!(matches!(
            adjust_artifact(&mut artifact),
            AdjustOutcome::UnknownUnit(_)
        ));
        assert_eq!(values_of(&artifact), before);

        let mut unlabeled = make_artifact("IDSS2", None, &[1.0e-9]);
        assert!(matches!(
            adjust_artifact(&mut unlabeled),
            AdjustOutcome::UnknownUnit(_)
        ));
    }

    #[test]
    fn removed_cells_stay_missing_through_adjustment() {
        let mut artifact = make_artifact("IDSS3", Some("A"), &[2.0e-6]);
        artifact.values.push(SiteValue {
            lot: "FA51-3283".to_string(),
            wafer: "01".to_string(),
            site: 2,
            value: None,
            flag: CleaningFlag::OutlierRemoved,
        });

        assert_eq!(
            adjust_artifact(&mut artifact),
            AdjustOutcome::Adjusted { converted: 1 }
        );
        assert_eq!(artifact.values[1].value, None);
        assert!((values_of(&artifact)[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn frame_adjustment_guards_like_artifacts() {
        use crate::types::Measurement;
        use std::collections::BTreeMap;

        let mut cells = BTreeMap::new();
        cells.insert("RDSON1".to_string(), 0.05);
        cells.insert("VTH".to_string(), 3.5);
        let mut table = MeasurementTable::from_rows(
            vec![Measurement {
                lot: "FA51-3283".to_string(),
                wafer: "01".to_string(),
                site: 1,
                values: cells,
            }],
            &[],
        );

        let mut labels = BTreeMap::new();
        labels.insert("RDSON1".to_string(), "Ω".to_string());
        labels.insert("VTH".to_string(), "V".to_string());

        let outcomes = adjust_frame(&mut table, &mut labels, None);
        assert_eq!(
            outcomes.get("RDSON1"),
            Some(&AdjustOutcome::Adjusted { converted: 1 })
        );
        assert_eq!(outcomes.get("VTH"), Some(&AdjustOutcome::NotApplicable));
        assert_eq!(table.rows[0].value("RDSON1"), Some(50.0));
        assert_eq!(table.rows[0].value("VTH"), Some(3.5));
        assert_eq!(labels.get("RDSON1").map(String::as_str), Some("mΩ"));

        // Second pass is the identity.
        let snapshot = table.clone();
        adjust_frame(&mut table, &mut labels, None);
        assert_eq!(table, snapshot);
    }

    #[test]
    fn multiplier_table_covers_the_known_parameters() {
        assert_eq!(rule_for("RDSON1").map(|r| r.factor), Some(1e3));
        assert_eq!(rule_for("IDSS1").map(|r| r.factor), Some(1e9));
        assert_eq!(rule_for("IDSS3").map(|r| (r.factor, r.target_unit)), Some((1e6, "μA")));
        assert_eq!(rule_for("BVDSS1"), None);
        assert_eq!(default_params().len(), 6);
    }
}
