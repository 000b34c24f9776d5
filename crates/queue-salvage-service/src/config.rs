//! Service configuration.
//!
//! Sources, applied in order with later sources overriding earlier ones:
//!  1. `/etc/queue-salvage/service.yaml`: system-wide defaults
//!  2. `./config/service.yaml`: deployment-local override
//!  3. The path given by `--config` or `QS_CONFIG_FILE`
//!  4. Environment variables prefixed `QS__` with `__` as the separator,
//!     e.g. `QS__SWEEP__INTERVAL_SECONDS=60` sets `sweep.interval_seconds`
//!
//! Every field carries a serde default, so an unconfigured environment still
//! yields a usable configuration. A malformed file or a value that cannot be
//! coerced to its field type is a hard error.

use queue_runtime::QueueConfig;
use queue_salvage_core::broker::{DEFAULT_ERROR_QUEUE_PATTERN, DEFAULT_ERROR_SUFFIX_PATTERN};
use queue_salvage_core::staging::MAX_BATCH_OPERATIONS;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "QS_CONFIG_FILE";

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub broker: BrokerConfig,
    pub staging: StagingConfig,
    pub sessions: SessionConfig,
    pub sweep: SweepConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

/// Broker connection and queue naming
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Transport provider and its settings
    pub queue: QueueConfig,

    /// Messages requested from the broker per receive call
    pub batch_size: u32,

    /// Regex a queue name must match to be treated as an error queue
    pub error_queue_pattern: String,

    /// Regex removed from an error queue name to find its processing queue
    pub error_queue_suffix_pattern: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            batch_size: 100,
            error_queue_pattern: DEFAULT_ERROR_QUEUE_PATTERN.to_string(),
            error_queue_suffix_pattern: DEFAULT_ERROR_SUFFIX_PATTERN.to_string(),
        }
    }
}

/// Where staged messages and sessions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingBackend {
    Memory,
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub backend: StagingBackend,

    /// Root directory of the filesystem store
    pub data_directory: PathBuf,

    /// Documents written or deleted per store batch
    pub batch_size: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            backend: StagingBackend::Filesystem,
            data_directory: PathBuf::from("./data/staging"),
            batch_size: MAX_BATCH_OPERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inactivity after which a session is swept
    pub expiry_minutes: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { expiry_minutes: 20 }
    }
}

impl SessionConfig {
    pub fn expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.expiry_minutes as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Seconds between sweep passes
    pub interval_seconds: u64,

    /// Staged messages aborted per iteration
    pub page_size: usize,

    /// Iterations spent on one session per pass
    pub max_pages_per_session: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            page_size: MAX_BATCH_OPERATIONS,
            max_pages_per_session: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// Structured log records on the `audit` target
    Tracing,
    /// Append-only JSON lines file
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub backend: AuditBackend,
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::Tracing,
            path: PathBuf::from("./data/audit/replays.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level applied to the service crates when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON log lines
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration could not be loaded: {message}")]
    Load { message: String },

    #[error("Invalid configuration: {field} - {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Loading and Validation
// ============================================================================

impl ServiceConfig {
    /// Load configuration from the standard sources
    ///
    /// `explicit` takes precedence over `QS_CONFIG_FILE`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/queue-salvage/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        let explicit = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var(CONFIG_FILE_ENV)
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
        });

        if let Some(path) = explicit {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let service_config: ServiceConfig = builder
            .add_source(config::Environment::with_prefix("QS").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Load {
                message: e.to_string(),
            })?;

        service_config.validate()?;
        Ok(service_config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.batch_size == 0 || self.broker.batch_size as usize > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::invalid(
                "broker.batch_size",
                format!("must be between 1 and {}", MAX_BATCH_OPERATIONS),
            ));
        }

        for (field, pattern) in [
            ("broker.error_queue_pattern", &self.broker.error_queue_pattern),
            (
                "broker.error_queue_suffix_pattern",
                &self.broker.error_queue_suffix_pattern,
            ),
        ] {
            if pattern.trim().is_empty() {
                return Err(ConfigError::invalid(field, "must not be empty"));
            }
            Regex::new(pattern).map_err(|e| ConfigError::invalid(field, e.to_string()))?;
        }

        if self.staging.batch_size == 0 || self.staging.batch_size > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::invalid(
                "staging.batch_size",
                format!("must be between 1 and {}", MAX_BATCH_OPERATIONS),
            ));
        }

        if self.staging.backend == StagingBackend::Filesystem
            && self.staging.data_directory.as_os_str().is_empty()
        {
            return Err(ConfigError::invalid(
                "staging.data_directory",
                "required for the filesystem backend",
            ));
        }

        if self.sessions.expiry_minutes == 0 {
            return Err(ConfigError::invalid(
                "sessions.expiry_minutes",
                "must be greater than zero",
            ));
        }

        if self.sweep.interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "sweep.interval_seconds",
                "must be greater than zero",
            ));
        }

        if self.sweep.page_size == 0 || self.sweep.page_size > MAX_BATCH_OPERATIONS {
            return Err(ConfigError::invalid(
                "sweep.page_size",
                format!("must be between 1 and {}", MAX_BATCH_OPERATIONS),
            ));
        }

        if self.sweep.max_pages_per_session == 0 {
            return Err(ConfigError::invalid(
                "sweep.max_pages_per_session",
                "must be greater than zero",
            ));
        }

        if self.audit.backend == AuditBackend::File && self.audit.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "audit.path",
                "required for the file backend",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
