//! YAML configuration (`~/.local/share/strata/config.yaml` by default)
//!
//! ```yaml
//! db_path: /var/lib/strata/strata.db
//! tier: pro
//! log_filter: strata=debug
//! max_upload_chars: 20000
//! max_bulk_items: 100
//! forecast_period: 7
//! analyzer:
//!   command: sentiment-engine
//!   args: ["--json"]
//!   timeout_secs: 60
//! ```
//!
//! Every field is optional. A missing file yields the defaults.

use crate::gate::TierToken;
use crate::mutation::{MutationLimits, DEFAULT_MAX_BULK_ITEMS, DEFAULT_MAX_UPLOAD_CHARS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOG_FILTER: &str = "strata=info";
pub const DEFAULT_FORECAST_PERIOD: u32 = 7;
const DEFAULT_ANALYZER_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How to launch the external sentiment engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            command: "strata-analyze".to_string(),
            args: Vec::new(),
            timeout_secs: DEFAULT_ANALYZER_TIMEOUT_SECS,
        }
    }
}

impl AnalyzerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// SQLite database; defaults to `strata.db` in the data directory
    pub db_path: Option<PathBuf>,
    /// Tier token used when nothing else supplies one
    pub tier: TierToken,
    pub log_filter: String,
    pub max_upload_chars: usize,
    pub max_bulk_items: usize,
    pub forecast_period: u32,
    pub analyzer: AnalyzerConfig,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            tier: TierToken::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            max_upload_chars: DEFAULT_MAX_UPLOAD_CHARS,
            max_bulk_items: DEFAULT_MAX_BULK_ITEMS,
            forecast_period: DEFAULT_FORECAST_PERIOD,
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl StrataConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_yaml(&text),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        // An empty file parses as YAML null
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_upload_chars == 0 {
            return Err(ConfigError::Invalid("max_upload_chars must be positive".into()));
        }
        if self.max_bulk_items == 0 {
            return Err(ConfigError::Invalid("max_bulk_items must be positive".into()));
        }
        if self.forecast_period == 0 {
            return Err(ConfigError::Invalid("forecast_period must be positive".into()));
        }
        if self.analyzer.command.trim().is_empty() {
            return Err(ConfigError::Invalid("analyzer.command is empty".into()));
        }
        if self.analyzer.timeout_secs == 0 {
            return Err(ConfigError::Invalid("analyzer.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    pub fn limits(&self) -> MutationLimits {
        MutationLimits {
            max_upload_chars: self.max_upload_chars,
            max_bulk_items: self.max_bulk_items,
        }
    }

    /// Configured database path, or `strata.db` in the data directory
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(|| data_dir().join("strata.db"))
    }
}

/// `~/.local/share/strata` (or the platform equivalent)
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"))
        .join("strata")
}

pub fn default_config_path() -> PathBuf {
    data_dir().join("config.yaml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Tier;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = StrataConfig::from_yaml("tier: enterprise\nanalyzer:\n  command: engine\n").unwrap();
        assert_eq!(config.tier.tier(), Tier::Enterprise);
        assert_eq!(config.analyzer.command, "engine");
        assert_eq!(config.analyzer.timeout(), Duration::from_secs(60));
        assert_eq!(config.max_upload_chars, DEFAULT_MAX_UPLOAD_CHARS);
        assert_eq!(config.forecast_period, 7);
    }

    #[test]
    fn empty_text_is_default() {
        assert_eq!(StrataConfig::from_yaml("  \n").unwrap(), StrataConfig::default());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = StrataConfig::from_yaml("max_bulk_items: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref m) if m.contains("max_bulk_items")));
    }

    #[test]
    fn malformed_yaml_is_reported() {
        let err = StrataConfig::from_yaml("max_upload_chars: [1, 2]").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "db_path: /tmp/strata-test.db\nmax_upload_chars: 500").unwrap();

        let config = StrataConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("/tmp/strata-test.db"));
        assert_eq!(config.limits().max_upload_chars, 500);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StrataConfig::load(Some(&dir.path().join("absent.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
