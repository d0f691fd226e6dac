//! Process configuration: one TOML document plus `ARCHIVE_*` environment overrides.
//!
//! ```toml
//! [auth.session]
//! idle_timeout_secs = 1800
//!
//! [auth.lockout]
//! max_attempts = 5
//!
//! [documents.number_prefixes]
//! invoice = "INV"
//! ```
//!
//! Every field has a default, so an empty document is a valid configuration.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use archive_auth::AuthConfig;
use archive_documents::DocumentConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {name} has an invalid value '{value}'")]
    Env { name: String, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub auth: AuthConfig,
    pub documents: DocumentConfig,
}

impl FromStr for ArchiveConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: ArchiveConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

fn parse_env<T: FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name: name.to_string(), value })
}

impl ArchiveConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        contents.parse()
    }

    /// File (when given) then the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_path(path)
                .with_context(|| format!("unable to load configuration from {}", path.display()))?,
            None => Self::default(),
        };
        config
            .apply_env(|name| std::env::var(name).ok())
            .context("invalid environment override")?;
        Ok(config)
    }

    /// Override selected settings from `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("ARCHIVE_SESSION_IDLE_TIMEOUT_SECS") {
            self.auth.session.idle_timeout_secs = parse_env("ARCHIVE_SESSION_IDLE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("ARCHIVE_SESSION_SEAL_SECRET") {
            self.auth.session.seal_secret = v;
        }
        if let Some(v) = lookup("ARCHIVE_LOCKOUT_MAX_ATTEMPTS") {
            self.auth.lockout.max_attempts = parse_env("ARCHIVE_LOCKOUT_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = lookup("ARCHIVE_LOCKOUT_MINUTES") {
            self.auth.lockout.lock_minutes = parse_env("ARCHIVE_LOCKOUT_MINUTES", v)?;
        }
        if let Some(v) = lookup("ARCHIVE_PASSWORD_MAX_AGE_DAYS") {
            self.auth.password.max_age_days = parse_env("ARCHIVE_PASSWORD_MAX_AGE_DAYS", v)?;
        }
        if let Some(v) = lookup("ARCHIVE_MAX_FILE_SIZE") {
            self.documents.max_file_size = parse_env("ARCHIVE_MAX_FILE_SIZE", v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.auth.session.idle_timeout_secs <= 0 {
            return invalid("auth.session.idle_timeout_secs must be positive");
        }
        if self.auth.lockout.max_attempts == 0 {
            return invalid("auth.lockout.max_attempts must be at least 1");
        }
        if self.auth.lockout.lock_minutes <= 0 {
            return invalid("auth.lockout.lock_minutes must be positive");
        }
        if self.auth.password.min_length == 0 {
            return invalid("auth.password.min_length must be at least 1");
        }
        if self.documents.max_page_size == 0 {
            return invalid("documents.max_page_size must be at least 1");
        }
        if self.documents.number_prefixes.values().any(|p| p.trim().is_empty() || p.contains('/')) {
            return invalid("documents.number_prefixes must be non-empty and contain no '/'");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_document_yields_defaults() {
        let config: ArchiveConfig = "".parse().unwrap();
        assert_eq!(config, ArchiveConfig::default());
        assert_eq!(config.auth.lockout.max_attempts, 5);
        assert_eq!(config.documents.number_prefixes["invoice"], "INV");
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config: ArchiveConfig = r#"
            [auth.session]
            idle_timeout_secs = 900

            [documents.number_prefixes]
            memo = "MEM"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.auth.session.idle_timeout_secs, 900);
        assert_eq!(config.auth.session.remember_me_days, 30);
        assert_eq!(config.documents.number_prefixes.get("memo").map(String::as_str), Some("MEM"));
        assert_eq!(config.documents.default_page_size, 20);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        match "auth = 3".parse::<ArchiveConfig>() {
            Err(ConfigError::Parse(_)) => {}
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = "[auth.lockout]\nmax_attempts = 0".parse::<ArchiveConfig>().unwrap_err();
        match err {
            ConfigError::Invalid(msg) if msg.contains("max_attempts") => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn environment_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("ARCHIVE_LOCKOUT_MAX_ATTEMPTS", "3"),
            ("ARCHIVE_SESSION_SEAL_SECRET", "s3cr3t"),
            ("ARCHIVE_MAX_FILE_SIZE", " 1024 "),
        ]
        .into_iter()
        .collect();

        let mut config = ArchiveConfig::default();
        config
            .apply_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.auth.lockout.max_attempts, 3);
        assert_eq!(config.auth.session.seal_secret, "s3cr3t");
        assert_eq!(config.documents.max_file_size, 1024);
        assert_eq!(config.auth.lockout.lock_minutes, 15);
    }

    #[test]
    fn unparsable_override_names_the_variable() {
        let mut config = ArchiveConfig::default();
        let err = config
            .apply_env(|name| (name == "ARCHIVE_LOCKOUT_MINUTES").then(|| "soon".to_string()))
            .unwrap_err();
        match err {
            ConfigError::Env { name, value } => {
                assert_eq!(name, "ARCHIVE_LOCKOUT_MINUTES");
                assert_eq!(value, "soon");
            }
            other => panic!("expected Env, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = ArchiveConfig::load(Some(Path::new("/nonexistent/archive.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/archive.toml"));
    }
}
