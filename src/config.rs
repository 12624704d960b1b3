//! Analyzer configuration loaded from TOML.
//!
//! Search order:
//!
//! 1. `CP_ANALYZER_CONFIG` environment variable (path to a TOML file)
//! 2. `./cp-analyzer.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Every field has a default, so a partial config file only overrides the
//! keys it names. CLI flags override the loaded config, so the precedence
//! seen by the user is flags > env config > local file > defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cleaning::CleaningStrategy;
use crate::error::{AnalyzerError, Result};
use crate::parser::DEFAULT_TARGET_PARAMS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Directory holding one subdirectory of raw logs per batch.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory receiving per-batch artifacts and reports.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Test parameters to clean and export.
    #[serde(default = "default_target_params")]
    pub target_params: Vec<String>,

    /// Cleaning strategy capability string ("standard", "smart",
    /// "remove-outliers").
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_target_params() -> Vec<String> {
    DEFAULT_TARGET_PARAMS.iter().map(|p| p.to_string()).collect()
}

fn default_strategy() -> String {
    CleaningStrategy::SmartParameter.capability().to_string()
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            target_params: default_target_params(),
            strategy: default_strategy(),
        }
    }
}

impl AnalyzerConfig {
    /// Load configuration using the standard search order. A broken config
    /// file is logged and skipped, never fatal.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("CP_ANALYZER_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "loaded config from CP_ANALYZER_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "bad config from CP_ANALYZER_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "CP_ANALYZER_CONFIG points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from("cp-analyzer.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("loaded config from ./cp-analyzer.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "failed to load ./cp-analyzer.toml, using defaults");
                }
            }
        }

        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AnalyzerError::io(path, e))?;
        toml::from_str(&contents)
            .map_err(|e| AnalyzerError::Configuration(format!("{}: {e}", path.display())))
    }

    /// Parse the configured strategy string.
    pub fn cleaning_strategy(&self) -> Result<CleaningStrategy> {
        self.strategy.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_cover_the_standard_parameter_set() {
        let config = AnalyzerConfig::default();
        assert!(config.target_params.iter().any(|p| p == "RDSON1"));
        assert!(config.target_params.iter().any(|p| p == "IDSS3"));
        assert_eq!(config.cleaning_strategy().unwrap(), CleaningStrategy::SmartParameter);
    }

    #[test]
    fn partial_file_only_overrides_named_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "strategy = \"remove-outliers\"").unwrap();
        writeln!(file, "output_dir = \"out\"").unwrap();

        let config = AnalyzerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.strategy, "remove-outliers");
        assert_eq!(config.output_dir, PathBuf::from("out"));
        // Unnamed keys keep their defaults.
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert!(!config.target_params.is_empty());
    }

    #[test]
    fn bad_strategy_string_is_a_configuration_error() {
        let config = AnalyzerConfig {
            strategy: "bogus".to_string(),
            ..AnalyzerConfig::default()
        };
        assert!(matches!(
            config.cleaning_strategy(),
            Err(AnalyzerError::Configuration(_))
        ));
    }
}
