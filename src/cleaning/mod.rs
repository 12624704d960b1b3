//! Cleaning Strategy Engine
//!
//! A closed family of interchangeable cleaning algorithms over a
//! [`MeasurementTable`]. Every strategy is a pure function of its inputs:
//! same table + same strategy + same parameters always produces identical
//! flags and output, and no state is carried across batches.
//!
//! - `Standard`: robust center (median) and spread (scaled MAD, IQR
//!   fallback); values beyond 3× spread are flagged and retained.
//! - `SmartParameter`: picks a bound-detection method from the parameter's
//!   category (log-scale bounds for leakage currents, spec-capped IQR
//!   bounds for voltages) and falls back to `Standard` otherwise.
//! - `RemoveOutliers`: `Standard` detection, but flagged cells become
//!   missing instead of being retained.
//!
//! Row count is preserved by every strategy; cleaning flags or removes
//! cell values, never rows.

pub mod robust;

use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::error::AnalyzerError;
use crate::types::{CleaningFlag, FlagReport, LimitSpec, MeasurementTable};
use crate::units;

/// Parameters with fewer numeric samples than this are never flagged —
/// there is no statistical basis for calling anything an outlier.
pub const MIN_SAMPLES: usize = 3;

/// Outlier threshold in units of robust spread.
pub const OUTLIER_SIGMA: f64 = 3.0;

/// Headroom factor applied to the upper spec limit when capping smart
/// voltage bounds (values up to 1.5× LimitU are treated as real).
const SPEC_CAP_UPPER: f64 = 1.5;

/// Headroom factor applied to the lower spec limit for the same purpose.
const SPEC_CAP_LOWER: f64 = 0.5;

// ============================================================================
// Strategy selection
// ============================================================================

/// The closed set of cleaning strategies. Adding a strategy means adding
/// a variant here, not subclassing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleaningStrategy {
    Standard,
    SmartParameter,
    RemoveOutliers,
}

impl CleaningStrategy {
    /// Capability string used on the CLI and in config files.
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::SmartParameter => "smart",
            Self::RemoveOutliers => "remove-outliers",
        }
    }
}

impl fmt::Display for CleaningStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capability())
    }
}

impl FromStr for CleaningStrategy {
    type Err = AnalyzerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "smart" | "smart-parameter" | "smart_parameter" => Ok(Self::SmartParameter),
            "remove-outliers" | "remove_outliers" => Ok(Self::RemoveOutliers),
            other => Err(AnalyzerError::Configuration(format!(
                "unknown cleaning strategy '{other}' (expected standard, smart or remove-outliers)"
            ))),
        }
    }
}

// ============================================================================
// Cleaning pass
// ============================================================================

impl CleaningStrategy {
    /// Run one cleaning pass over `table` for the given target parameters
    /// (all columns when `params` is empty).
    ///
    /// Returns a new table (the input is never mutated) plus the flag
    /// report. A target parameter missing from the table is noted in the
    /// report; it never aborts the pass for sibling parameters.
    pub fn clean(
        &self,
        table: &MeasurementTable,
        params: &[String],
        limits: &LimitSpec,
    ) -> (MeasurementTable, FlagReport) {
        let mut cleaned = table.clone();
        let mut report = FlagReport::default();

        let targets: Vec<String> = if params.is_empty() {
            table.params.clone()
        } else {
            params.to_vec()
        };

        for param in &targets {
            if !table.has_param(param) {
                warn!(param = %param, "target parameter not found in measurement table");
                report.note_missing(param);
                continue;
            }

            let cells = table.column(param);
            if cells.len() < MIN_SAMPLES {
                debug!(
                    param = %param,
                    samples = cells.len(),
                    "fewer than {MIN_SAMPLES} samples, skipping outlier detection"
                );
                continue;
            }

            let values: Vec<f64> = cells.iter().map(|(_, v)| *v).collect();
            let outlier_mask = match self {
                Self::Standard | Self::RemoveOutliers => robust_mask(&values),
                Self::SmartParameter => smart_mask(param, &values, limits),
            };

            let (spec_lower, spec_upper) = spec_bounds_raw(param, limits);

            for (pos, (row, value)) in cells.iter().enumerate() {
                if outlier_mask[pos] {
                    if *self == Self::RemoveOutliers {
                        cleaned.rows[*row].values.remove(param);
                        report.record(param, *row, CleaningFlag::OutlierRemoved);
                    } else {
                        report.record(param, *row, CleaningFlag::OutlierFlagged);
                    }
                } else if spec_upper.is_some_and(|u| *value > u)
                    || spec_lower.is_some_and(|l| *value < l)
                {
                    report.record(param, *row, CleaningFlag::OutOfSpec);
                }
            }

            debug!(
                param = %param,
                strategy = %self,
                outliers = report.count(param, CleaningFlag::OutlierFlagged)
                    + report.count(param, CleaningFlag::OutlierRemoved),
                out_of_spec = report.count(param, CleaningFlag::OutOfSpec),
                "cleaning pass complete"
            );
        }

        (cleaned, report)
    }
}

// ============================================================================
// Detection methods
// ============================================================================

/// Robust center/spread outlier mask: |v − median| > 3 × scaled MAD.
/// Falls back to IQR bounds when the MAD degenerates to zero (more than
/// half of the samples identical); with zero IQR too, nothing is flagged.
fn robust_mask(values: &[f64]) -> Vec<bool> {
    let Some(center) = robust::median(values) else {
        return vec![false; values.len()];
    };

    let spread = robust::scaled_mad(values, center).unwrap_or(0.0);
    if spread > 0.0 {
        let cutoff = OUTLIER_SIGMA * spread;
        return values.iter().map(|v| (v - center).abs() > cutoff).collect();
    }

    match (robust::quantile(values, 0.25), robust::quantile(values, 0.75)) {
        (Some(q1), Some(q3)) if q3 > q1 => {
            let iqr = q3 - q1;
            let lo = q1 - OUTLIER_SIGMA * iqr;
            let hi = q3 + OUTLIER_SIGMA * iqr;
            values.iter().map(|v| *v < lo || *v > hi).collect()
        }
        _ => vec![false; values.len()],
    }
}

/// Parameter category, decided purely from the parameter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamCategory {
    /// Leakage currents (IDSS*/IGSS*) span many decades; detect on a
    /// log scale.
    LeakageCurrent,
    /// Threshold/breakdown voltages have tight linear distributions;
    /// detect with spec-capped IQR bounds.
    Voltage,
    /// Anything else uses the standard robust method.
    Other,
}

fn categorize(param: &str) -> ParamCategory {
    let upper = param.to_ascii_uppercase();
    if upper.starts_with("IDSS") || upper.starts_with("IGSS") {
        ParamCategory::LeakageCurrent
    } else if upper.starts_with("BV")
        || upper.starts_with("VTH")
        || upper.starts_with("VF")
        || upper.starts_with("DELTABV")
    {
        ParamCategory::Voltage
    } else {
        ParamCategory::Other
    }
}

/// SmartParameter mask: per-category method with Standard fallback.
fn smart_mask(param: &str, values: &[f64], limits: &LimitSpec) -> Vec<bool> {
    match categorize(param) {
        ParamCategory::LeakageCurrent => log_scale_mask(values),
        ParamCategory::Voltage => capped_iqr_mask(param, values, limits),
        ParamCategory::Other => robust_mask(values),
    }
}

/// Log-scale robust mask for currents spanning decades: robust z-score on
/// ln(1 + |v|).
fn log_scale_mask(values: &[f64]) -> Vec<bool> {
    let transformed: Vec<f64> = values.iter().map(|v| v.abs().ln_1p()).collect();
    robust_mask(&transformed)
}

/// IQR bounds capped by the spec limits (in raw units): the tighter of
/// `q3 + 3×IQR` and `1.5 × LimitU`, resp. `q1 − 3×IQR` and `0.5 × LimitL`.
fn capped_iqr_mask(param: &str, values: &[f64], limits: &LimitSpec) -> Vec<bool> {
    let (Some(q1), Some(q3)) = (
        robust::quantile(values, 0.25),
        robust::quantile(values, 0.75),
    ) else {
        return vec![false; values.len()];
    };
    let iqr = q3 - q1;
    if iqr <= 0.0 {
        return robust_mask(values);
    }

    let (spec_lower, spec_upper) = spec_bounds_raw(param, limits);
    let mut hi = q3 + OUTLIER_SIGMA * iqr;
    let mut lo = q1 - OUTLIER_SIGMA * iqr;
    if let Some(u) = spec_upper {
        hi = hi.min(u * SPEC_CAP_UPPER);
    }
    if let Some(l) = spec_lower {
        lo = lo.max(l * SPEC_CAP_LOWER);
    }

    values.iter().map(|v| *v < lo || *v > hi).collect()
}

/// Spec limits converted into the raw measurement unit.
///
/// Limits are declared in the LimitU unit (e.g. 365 mΩ) while raw log
/// values are in base units (Ω, A). For parameters in the unit multiplier
/// table whose declared unit matches the scaling target, divide by the
/// scale factor; everything else is compared as-is.
fn spec_bounds_raw(param: &str, limits: &LimitSpec) -> (Option<f64>, Option<f64>) {
    let Some(pl) = limits.get(param) else {
        return (None, None);
    };

    let factor = match units::rule_for(param) {
        Some(rule) if pl.unit.as_deref() == Some(rule.target_unit) => rule.factor,
        _ => 1.0,
    };

    (
        pl.lower.map(|l| l / factor),
        pl.upper.map(|u| u / factor),
    )
}
