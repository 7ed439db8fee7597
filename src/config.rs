//! Configuration management for Ledgergate

use crate::transaction::{MAX_TRANSACTION_SIZE, TX_TYPE_FIRST_BLOCK, TX_TYPE_STOP_NETWORK};
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Types whose owner comes from the envelope rather than a signed header.
    #[serde(default = "default_privileged_types")]
    pub privileged_types: Vec<u8>,
    /// Longest error text stored for a rejected transaction, in characters.
    #[serde(default = "default_max_error_len")]
    pub max_error_len: usize,
    #[serde(default = "default_max_tx_size")]
    pub max_tx_size: usize,
    #[serde(default = "default_max_future_secs")]
    pub max_future_secs: i64,
    /// Queue removal attempts after a successful ledger commit.
    #[serde(default = "default_cleanup_attempts")]
    pub cleanup_attempts: u32,
    #[serde(default = "default_cleanup_retry_delay_ms")]
    pub cleanup_retry_delay_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            privileged_types: default_privileged_types(),
            max_error_len: default_max_error_len(),
            max_tx_size: default_max_tx_size(),
            max_future_secs: default_max_future_secs(),
            cleanup_attempts: default_cleanup_attempts(),
            cleanup_retry_delay_ms: default_cleanup_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    load_config_from(DEFAULT_CONFIG_PATH)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config, Box<dyn std::error::Error>> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config = parse_config(&config_str)?;
    validate(&config)?;
    Ok(config)
}

/// Parses TOML text; an empty document yields the defaults.
pub fn parse_config(config_str: &str) -> Result<Config, Box<dyn std::error::Error>> {
    if config_str.trim().is_empty() {
        return Ok(Config::default());
    }
    Ok(toml::from_str(config_str)?)
}

fn validate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.database.path.is_empty() {
        return Err("database.path must be set in config.toml".into());
    }

    if config.admission.max_error_len == 0 {
        return Err("admission.max_error_len must be greater than zero".into());
    }

    if config.admission.max_future_secs < 0 {
        return Err("admission.max_future_secs must not be negative".into());
    }

    if config.admission.cleanup_attempts == 0 {
        return Err("admission.cleanup_attempts must be at least 1".into());
    }

    Ok(())
}

fn default_db_path() -> String {
    "./data/ledgergate.db".to_string()
}

fn default_privileged_types() -> Vec<u8> {
    vec![TX_TYPE_FIRST_BLOCK, TX_TYPE_STOP_NETWORK]
}

fn default_max_error_len() -> usize {
    255
}

fn default_max_tx_size() -> usize {
    MAX_TRANSACTION_SIZE
}

fn default_max_future_secs() -> i64 {
    600
}

fn default_cleanup_attempts() -> u32 {
    1
}

fn default_cleanup_retry_delay_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.database.path, "./data/ledgergate.db");
        assert_eq!(config.admission.max_error_len, 255);
        assert_eq!(config.admission.cleanup_attempts, 1);
        assert_eq!(config.admission.privileged_types, vec![1, 2]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = parse_config(
            r#"
            [admission]
            cleanup_attempts = 3
            privileged_types = [1, 2, 5]
            "#,
        )
        .unwrap();
        assert_eq!(config.admission.cleanup_attempts, 3);
        assert_eq!(config.admission.privileged_types, vec![1, 2, 5]);
        assert_eq!(config.admission.max_error_len, 255);
        assert_eq!(config.database.path, "./data/ledgergate.db");
    }

    #[test]
    fn test_zero_cleanup_attempts_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[admission]\ncleanup_attempts = 0\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("cleanup_attempts"));
    }

    #[test]
    fn test_negative_future_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[admission]\nmax_future_secs = -1\n").unwrap();

        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("max_future_secs"));
    }

    #[test]
    fn test_unbounded_future_window_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[admission]\nmax_future_secs = 9223372036854775807\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.admission.max_future_secs, i64::MAX);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.admission.max_tx_size, MAX_TRANSACTION_SIZE);
    }
}
