//! Configuration loading via `ortho-config`.
//!
//! [`FleetConfig`] holds the engine's thresholds and probe timings;
//! [`ScalewayConfig`] holds the credentials of the Scaleway clients. Both
//! merge defaults, configuration files, environment variables, and CLI flags
//! in that order of precedence.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::catalog::DEFAULT_EMPTY_MINUTES;
use crate::console::{ConsoleSettings, DEFAULT_CONSOLE_PORT};
use crate::policy::PolicySettings;
use crate::probe::ReadinessSettings;

const CONFIG_FILE: &str = "quickserver.toml";

/// Engine settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "QUICKSERVER",
    discovery(
        app_name = "quickserver",
        env_var = "QUICKSERVER_CONFIG_PATH",
        config_file_name = "quickserver.toml",
        dotfile_name = ".quickserver.toml",
        project_file_name = "quickserver.toml"
    )
)]
pub struct FleetConfig {
    /// Whether creation requires a positive balance and running servers
    /// consume credits.
    #[ortho_config(default = false)]
    pub credits_enabled: bool,
    /// Idle minutes for variants that do not configure their own.
    #[ortho_config(default = DEFAULT_EMPTY_MINUTES)]
    pub empty_minutes: u32,
    /// Maximum run time in hours.
    #[ortho_config(default = 12)]
    pub max_runtime_hours: u32,
    /// Minutes a server may stay pending before it is reclaimed.
    #[ortho_config(default = 15)]
    pub pending_grace_minutes: u32,
    /// Balance at or below which owners are warned.
    #[ortho_config(default = 10)]
    pub low_credit_threshold: i64,
    /// Remote-console port of game servers.
    #[ortho_config(default = DEFAULT_CONSOLE_PORT)]
    pub console_port: u16,
    /// Per-query console timeout in milliseconds.
    #[ortho_config(default = 5_000)]
    pub console_timeout_ms: u64,
    /// Seconds a new server has to answer its first status query.
    #[ortho_config(default = 300)]
    pub readiness_timeout_secs: u64,
    /// Seconds between readiness probes.
    #[ortho_config(default = 5)]
    pub readiness_interval_secs: u64,
    /// Seconds between two runs of each reconciliation job.
    #[ortho_config(default = 60)]
    pub job_interval_secs: u64,
    /// JSON file describing variants and regions.
    #[ortho_config(default = "catalog.json".to_owned())]
    pub catalog_path: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn hint(&self) -> String {
        format!(
            "set {} or add {} to [{}] in {CONFIG_FILE}",
            self.env_var, self.toml_key, self.section
        )
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: {}",
            metadata.description,
            metadata.hint()
        )));
    }
    Ok(())
}

fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!(
            "{} must be greater than zero: {}",
            metadata.description,
            metadata.hint()
        )));
    }
    Ok(())
}

impl FleetConfig {
    /// Loads configuration from every source, CLI flags included.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("quickserver")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Checks that every duration and path is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for an empty catalog path and
    /// [`ConfigError::Invalid`] for a zero duration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.catalog_path,
            &FieldMetadata::new(
                "catalog path",
                "QUICKSERVER_CATALOG_PATH",
                "catalog_path",
                "quickserver",
            ),
        )?;
        let positive = [
            (
                u64::from(self.empty_minutes),
                FieldMetadata::new(
                    "idle threshold",
                    "QUICKSERVER_EMPTY_MINUTES",
                    "empty_minutes",
                    "quickserver",
                ),
            ),
            (
                u64::from(self.max_runtime_hours),
                FieldMetadata::new(
                    "maximum run time",
                    "QUICKSERVER_MAX_RUNTIME_HOURS",
                    "max_runtime_hours",
                    "quickserver",
                ),
            ),
            (
                u64::from(self.pending_grace_minutes),
                FieldMetadata::new(
                    "pending grace period",
                    "QUICKSERVER_PENDING_GRACE_MINUTES",
                    "pending_grace_minutes",
                    "quickserver",
                ),
            ),
            (
                u64::from(self.console_port),
                FieldMetadata::new(
                    "console port",
                    "QUICKSERVER_CONSOLE_PORT",
                    "console_port",
                    "quickserver",
                ),
            ),
            (
                self.console_timeout_ms,
                FieldMetadata::new(
                    "console timeout",
                    "QUICKSERVER_CONSOLE_TIMEOUT_MS",
                    "console_timeout_ms",
                    "quickserver",
                ),
            ),
            (
                self.readiness_timeout_secs,
                FieldMetadata::new(
                    "readiness timeout",
                    "QUICKSERVER_READINESS_TIMEOUT_SECS",
                    "readiness_timeout_secs",
                    "quickserver",
                ),
            ),
            (
                self.readiness_interval_secs,
                FieldMetadata::new(
                    "readiness interval",
                    "QUICKSERVER_READINESS_INTERVAL_SECS",
                    "readiness_interval_secs",
                    "quickserver",
                ),
            ),
            (
                self.job_interval_secs,
                FieldMetadata::new(
                    "job interval",
                    "QUICKSERVER_JOB_INTERVAL_SECS",
                    "job_interval_secs",
                    "quickserver",
                ),
            ),
        ];
        for (value, metadata) in &positive {
            require_positive(*value, metadata)?;
        }
        if self.readiness_interval_secs > self.readiness_timeout_secs {
            return Err(ConfigError::Invalid(String::from(
                "readiness interval must not exceed the readiness timeout",
            )));
        }
        Ok(())
    }

    /// Reaper thresholds.
    #[must_use]
    pub const fn policy_settings(&self) -> PolicySettings {
        PolicySettings {
            default_empty_minutes: self.empty_minutes,
            max_runtime_hours: self.max_runtime_hours,
            pending_grace_minutes: self.pending_grace_minutes,
            low_credit_threshold: self.low_credit_threshold,
        }
    }

    /// Console port and timeout.
    #[must_use]
    pub const fn console_settings(&self) -> ConsoleSettings {
        ConsoleSettings {
            port: self.console_port,
            timeout: Duration::from_millis(self.console_timeout_ms),
        }
    }

    /// Readiness polling parameters.
    #[must_use]
    pub const fn readiness_settings(&self) -> ReadinessSettings {
        ReadinessSettings {
            timeout: Duration::from_secs(self.readiness_timeout_secs),
            interval: Duration::from_secs(self.readiness_interval_secs),
        }
    }

    /// Period of every reconciliation job.
    #[must_use]
    pub const fn job_interval(&self) -> Duration {
        Duration::from_secs(self.job_interval_secs)
    }

    /// Location of the catalog file.
    #[must_use]
    pub fn catalog_path(&self) -> Utf8PathBuf {
        Utf8Path::new(&self.catalog_path).to_path_buf()
    }
}

/// Scaleway credentials and host defaults derived from environment
/// variables, configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Host operating system image label. Game containers run on top of it
    /// under Docker.
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
}

impl ScalewayConfig {
    /// Loads configuration without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("quickserver")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_image,
            &FieldMetadata::new("host image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
        )?;
        require_field(
            &self.default_architecture,
            &FieldMetadata::new(
                "CPU architecture",
                "SCW_DEFAULT_ARCHITECTURE",
                "default_architecture",
                "scaleway",
            ),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds a value the engine cannot use.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
