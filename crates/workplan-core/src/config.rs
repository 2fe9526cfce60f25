//! Planner configuration
//!
//! Loaded from TOML; every field has a default so an empty document is a
//! valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level planner configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    #[serde(default)]
    pub journal: JournalConfig,
}

impl PlanConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid TOML, or
    /// fails [`PlanConfig::validate`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a bound is zero.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject bounds that would make every command invalid.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.validation.max_task_hours == 0 {
            return Err(ConfigError::Validation(
                "validation.max_task_hours must be positive".to_string(),
            ));
        }
        if self.validation.max_capacity_hours == 0 {
            return Err(ConfigError::Validation(
                "validation.max_capacity_hours must be positive".to_string(),
            ));
        }
        if self.validation.max_name_len == 0 {
            return Err(ConfigError::Validation(
                "validation.max_name_len must be positive".to_string(),
            ));
        }
        if self.concurrency.max_conflict_retries == 0 {
            return Err(ConfigError::Validation(
                "concurrency.max_conflict_retries must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// With a task-hours ceiling
    #[inline]
    #[must_use]
    pub fn with_max_task_hours(mut self, hours: u32) -> Self {
        self.validation.max_task_hours = hours;
        self
    }

    /// With a staff capacity ceiling
    #[inline]
    #[must_use]
    pub fn with_max_capacity_hours(mut self, hours: u32) -> Self {
        self.validation.max_capacity_hours = hours;
        self
    }

    /// With full-graph verification before each edge insertion
    #[inline]
    #[must_use]
    pub fn with_verify_on_insert(mut self, verify: bool) -> Self {
        self.graph.verify_on_insert = verify;
        self
    }

    /// With the audit journal switched on or off
    #[inline]
    #[must_use]
    pub fn with_journal(mut self, enabled: bool) -> Self {
        self.journal.enabled = enabled;
        self
    }
}

/// Field rule bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Largest hours a single task may carry
    #[serde(default = "default_max_task_hours")]
    pub max_task_hours: u32,

    /// Largest per-period capacity a staff member may be given
    #[serde(default = "default_max_capacity_hours")]
    pub max_capacity_hours: u32,

    /// Longest accepted name, in characters
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_task_hours: default_max_task_hours(),
            max_capacity_hours: default_max_capacity_hours(),
            max_name_len: default_max_name_len(),
        }
    }
}

/// Dependency graph settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Scan the stored graph for cycles before every insertion
    #[serde(default = "default_true")]
    pub verify_on_insert: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            verify_on_insert: true,
        }
    }
}

/// Concurrency settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Attempts made by [`crate::facade::retry_on_conflict`] callers
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: default_max_conflict_retries(),
        }
    }
}

/// Audit journal settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_max_task_hours() -> u32 {
    1000
}

fn default_max_capacity_hours() -> u32 {
    2000
}

fn default_max_name_len() -> usize {
    200
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = PlanConfig::from_toml("").unwrap();
        assert_eq!(config, PlanConfig::default());
        assert_eq!(config.validation.max_task_hours, 1000);
        assert!(config.graph.verify_on_insert);
        assert_eq!(config.concurrency.max_conflict_retries, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PlanConfig::from_toml(
            r#"
            [validation]
            max_task_hours = 80

            [journal]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.validation.max_task_hours, 80);
        assert_eq!(config.validation.max_name_len, 200);
        assert!(!config.journal.enabled);
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let err = PlanConfig::from_toml("[validation]\nmax_task_hours = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn round_trips_through_file() {
        let config = PlanConfig::new().with_max_task_hours(40).with_journal(false);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = PlanConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
