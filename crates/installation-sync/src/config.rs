//! Synchronizer configuration

use crate::sync::RetryPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Synchronizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Report device details beyond the SDK version and OS identifier
    #[serde(default = "default_report_system_info")]
    pub report_system_info: bool,

    /// Location of the persisted sync state, if file backed
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Emit JSON log lines instead of human readable ones
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// Retry schedule for registry exchanges
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_report_system_info() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            report_system_info: default_report_system_info(),
            state_file: None,
            json_logs: false,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from an optional file and `INSTALLATION_SYNC__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("INSTALLATION_SYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read synchronizer configuration")?;

        config
            .try_deserialize()
            .context("Invalid synchronizer configuration")
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_retries,
            Duration::from_millis(self.retry.initial_backoff_ms),
            Duration::from_millis(self.retry.max_backoff_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert!(config.report_system_info);
        assert!(config.state_file.is_none());

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.max_backoff, Duration::from_secs(60));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
report_system_info = false
state_file = "/var/lib/app/installation.json"

[retry]
max_retries = 5
initial_backoff_ms = 250
"#
        )
        .unwrap();

        let config = SyncConfig::load(Some(file.path())).unwrap();
        assert!(!config.report_system_info);
        assert_eq!(
            config.state_file.as_deref(),
            Some(Path::new("/var/lib/app/installation.json"))
        );
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_backoff_ms, 250);
        assert_eq!(config.retry.max_backoff_ms, 60_000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.report_system_info);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file: NamedTempFile = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\nmax_retries = \"many\"").unwrap();

        assert!(SyncConfig::load(Some(file.path())).is_err());
    }
}
