// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Writer configuration
//!
//! Two layers:
//!
//! - [`FilterConfig`], read from a TOML file, selects the bus subjects to
//!   subscribe to and the payload keys to keep:
//!
//!   ```toml
//!   [subjects]
//!   filter = ["channels.>"]
//!
//!   [keys]
//!   filter = ["*"]
//!   ```
//!
//! - [`Config`], the service settings, built in code or by the CLI.
//!
//! A filter file that cannot be read or parsed is not fatal: the service
//! logs a warning and runs with the defaults.

use crate::pubsub::SUBJECT_ALL_CHANNELS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tlm_transformers::{content_type, KeyFilter, WILDCARD};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// `[subjects]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectsSection {
    pub filter: Vec<String>,
}

impl Default for SubjectsSection {
    fn default() -> Self {
        Self {
            filter: vec![SUBJECT_ALL_CHANNELS.to_string()],
        }
    }
}

/// `[keys]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    pub filter: Vec<String>,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            filter: vec![WILDCARD.to_string()],
        }
    }
}

/// Subject and key filters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub subjects: SubjectsSection,
    pub keys: KeysSection,
}

impl FilterConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load from a TOML file, falling back to the defaults on any error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load filter config {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .subjects
            .filter
            .iter()
            .find(|s| s.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "subject filter entry '{}' is empty",
                bad
            )));
        }
        Ok(())
    }

    /// Subjects to subscribe to; an empty list means every channel.
    pub fn subjects(&self) -> Vec<String> {
        if self.subjects.filter.is_empty() {
            vec![SUBJECT_ALL_CHANNELS.to_string()]
        } else {
            self.subjects.filter.clone()
        }
    }

    pub fn key_filter(&self) -> KeyFilter {
        KeyFilter::from_list(self.keys.filter.iter().cloned())
    }
}

/// Writer service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Payload content type; selects the transformer
    pub content_type: String,

    /// Filter file path (None = built-in defaults)
    pub filter_config_path: Option<PathBuf>,

    /// Deadline of each save in milliseconds (0 = none)
    pub write_timeout_ms: u64,

    /// Capacity of the in-process bus channel
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            content_type: content_type::SENML_JSON.to_string(),
            filter_config_path: None,
            write_timeout_ms: 0,
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        (self.write_timeout_ms > 0).then(|| Duration::from_millis(self.write_timeout_ms))
    }

    /// Filter settings from the configured file, or the defaults.
    pub fn load_filters(&self) -> FilterConfig {
        match &self.filter_config_path {
            Some(path) => FilterConfig::load_or_default(path),
            None => FilterConfig::default(),
        }
    }
}

/// Config builder for fluent API
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    content_type: Option<String>,
    filter_config_path: Option<PathBuf>,
    write_timeout_ms: Option<u64>,
    bus_capacity: Option<usize>,
}

impl ConfigBuilder {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn filter_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.filter_config_path = Some(path.into());
        self
    }

    /// Set save deadline in milliseconds (0 = none)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.write_timeout_ms = Some(ms);
        self
    }

    pub fn bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = Some(capacity);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        let defaults = Config::default();

        Config {
            content_type: self.content_type.unwrap_or(defaults.content_type),
            filter_config_path: self.filter_config_path.or(defaults.filter_config_path),
            write_timeout_ms: self.write_timeout_ms.unwrap_or(defaults.write_timeout_ms),
            bus_capacity: self.bus_capacity.unwrap_or(defaults.bus_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_filter_config_parse() {
        let config = FilterConfig::from_toml(
            r#"
            [subjects]
            filter = ["channels.c1.>", "channels.c2"]

            [keys]
            filter = ["temp", "hum"]
            "#,
        )
        .unwrap();

        assert_eq!(config.subjects(), vec!["channels.c1.>", "channels.c2"]);
        assert!(config.key_filter().permits("temp"));
        assert!(!config.key_filter().permits("rpm"));
    }

    #[test]
    fn test_missing_sections_default() {
        let config = FilterConfig::from_toml("[keys]\nfilter = [\"a\"]\n").unwrap();
        assert_eq!(config.subjects(), vec![SUBJECT_ALL_CHANNELS]);

        let config = FilterConfig::from_toml("").unwrap();
        assert_eq!(config, FilterConfig::default());
        assert!(config.key_filter().is_wildcard());
    }

    #[test]
    fn test_empty_subject_list_means_all_channels() {
        let config = FilterConfig::from_toml("[subjects]\nfilter = []\n").unwrap();
        assert_eq!(config.subjects(), vec![SUBJECT_ALL_CHANNELS]);
    }

    #[test]
    fn test_blank_subject_is_invalid() {
        let err = FilterConfig::from_toml("[subjects]\nfilter = [\" \"]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_from_file_and_fallback() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[subjects]\nfilter = [\"channels.c9\"]").unwrap();
        file.flush().unwrap();

        let loaded = FilterConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded.subjects(), vec!["channels.c9"]);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            FilterConfig::from_file(&missing),
            Err(ConfigError::Io(_))
        ));
        assert_eq!(FilterConfig::load_or_default(&missing), FilterConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[subjects\nfilter = ").unwrap();
        assert!(matches!(
            FilterConfig::from_file(&broken),
            Err(ConfigError::Toml(_))
        ));
        assert_eq!(FilterConfig::load_or_default(&broken), FilterConfig::default());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .content_type(content_type::JSON)
            .filter_config_path("/etc/tlm/filters.toml")
            .write_timeout_ms(250)
            .build();

        assert_eq!(config.content_type, "application/json");
        assert_eq!(
            config.filter_config_path,
            Some(PathBuf::from("/etc/tlm/filters.toml"))
        );
        assert_eq!(config.write_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.bus_capacity, 1024);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.content_type, content_type::SENML_JSON);
        assert_eq!(config.write_timeout(), None);
        assert_eq!(config.load_filters(), FilterConfig::default());
    }
}
