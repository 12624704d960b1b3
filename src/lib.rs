//! CP Analyzer: wafer chip-probe test log analysis
//!
//! Batch pipeline for CP (chip probe) test logs from wafer probers.
//!
//! ## Pipeline
//!
//! - **Parser**: tab-separated tester logs into a measurement table
//! - **Cleaning Engine**: robust outlier strategies (MAD, capped IQR,
//!   log-scale leakage handling)
//! - **Unit Adjuster**: idempotent rescaling of exported artifacts into
//!   their LimitU units
//! - **Report Aggregator**: per-parameter statistics, capability indices
//!   and static HTML batch reports

pub mod cleaner;
pub mod cleaning;
pub mod config;
pub mod error;
pub mod parser;
pub mod report;
pub mod types;
pub mod units;

// Re-export analyzer configuration
pub use config::AnalyzerConfig;

// Re-export the core data model
pub use types::{
    CleaningFlag, FlagReport, LimitSpec, Measurement, MeasurementTable, ParamArtifact,
    ParamLimits, SiteValue,
};

// Re-export pipeline entry points
pub use cleaner::CpLogCleaner;
pub use cleaning::CleaningStrategy;
pub use error::{AnalyzerError, Result};
pub use parser::{CpLogParser, DEFAULT_TARGET_PARAMS};
pub use units::{AdjustOutcome, AdjustSummary, UnitRule, UNIT_RULES};
