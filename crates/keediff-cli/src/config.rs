//! Configuration file handling.
//!
//! Reads from `~/.config/keediff/keediff.toml`

use anyhow::{Context, Result};
use keediff_core::search::default_search_fields;
use keediff_core::{DuplicateCriteria, FieldName};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Criteria used by `duplicates` when none is given on the command line.
    #[serde(default)]
    pub duplicate_criteria: DuplicateCriteria,
    /// Fields searched by `search` when no `--field` is given.
    #[serde(default = "default_search_field_names")]
    pub search_fields: Vec<String>,
    /// Whether entries in the recycle bin take part in comparisons.
    #[serde(default)]
    pub include_recycle_bin: bool,
    /// Indent JSON output.
    #[serde(default = "default_pretty_json")]
    pub pretty_json: bool,
}

fn default_search_field_names() -> Vec<String> {
    default_search_fields()
        .iter()
        .map(|f| f.as_str().to_string())
        .collect()
}

fn default_pretty_json() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            duplicate_criteria: DuplicateCriteria::default(),
            search_fields: default_search_field_names(),
            include_recycle_bin: false,
            pretty_json: default_pretty_json(),
        }
    }
}

impl Config {
    /// Load configuration from the config file.
    ///
    /// If `custom_path` is provided it must exist. Otherwise the default XDG
    /// location is used and a default file is written there on first run.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self> {
        let is_custom = custom_path.is_some();
        let config_path = match custom_path {
            Some(path) => path,
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            if is_custom {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            let config = Config::default();
            config.save_to(&config_path)?;
            tracing::info!("Created default config at {}", config_path.display());
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::debug!("Loaded config from {}: {:?}", config_path.display(), config);
        Ok(config)
    }

    /// Save configuration to `path`, creating its directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Configured search fields as field names.
    pub fn search_field_names(&self) -> Vec<FieldName> {
        self.search_fields
            .iter()
            .map(|name| FieldName::from(name.as_str()))
            .collect()
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("keediff").join("keediff.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_take_defaults() {
        let config: Config = toml::from_str("include_recycle_bin = true").unwrap();
        assert!(config.include_recycle_bin);
        assert!(config.pretty_json);
        assert_eq!(config.duplicate_criteria, DuplicateCriteria::UsernameUrl);
        assert_eq!(config.search_fields, vec!["Title", "UserName", "URL"]);
    }

    #[test]
    fn parses_criteria_and_fields() {
        let config: Config = toml::from_str(
            "duplicate_criteria = \"title+username\"\nsearch_fields = [\"Notes\", \"Account\"]",
        )
        .unwrap();
        assert_eq!(config.duplicate_criteria, DuplicateCriteria::TitleUsername);
        assert_eq!(
            config.search_field_names(),
            vec![FieldName::Notes, FieldName::Custom("Account".into())]
        );
    }

    #[test]
    fn rejects_unknown_criteria() {
        assert!(toml::from_str::<Config>("duplicate_criteria = \"url\"").is_err());
    }

    #[test]
    fn custom_path_must_exist_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keediff.toml");
        assert!(Config::load(Some(path.clone())).is_err());

        let config = Config {
            pretty_json: false,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load(Some(path)).unwrap(), config);
    }
}
