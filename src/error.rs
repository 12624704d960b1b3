//! Error taxonomy for the CP analysis pipeline.
//!
//! Two families matter at the pipeline level:
//! - [`AnalyzerError::Configuration`]: fatal, aborts the current invocation
//!   (unknown strategy name, empty parameter list, missing required directory).
//! - [`AnalyzerError::DataAccess`]: isolated per parameter/artifact/batch and
//!   logged; sibling items keep processing.
//!
//! "Value already in the target unit" is not an error at all — see
//! [`crate::units::AdjustOutcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the CP analysis pipeline.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// Invalid configuration. Fatal for the current invocation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing or corrupt input data. Isolated to the failing item.
    #[error("data access error: {0}")]
    DataAccess(String),

    /// Filesystem failure with the offending path attached.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON artifact could not be parsed or written.
    #[error("JSON error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl AnalyzerError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach a path to a JSON (de)serialization error.
    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Whether this error should abort the whole invocation rather than
    /// just the item being processed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, AnalyzerError>;
