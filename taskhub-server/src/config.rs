//! Configuration for the `TaskHub` server.
//!
//! Layered, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskhub/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted heartbeat interval, in seconds.
pub const MAX_HEARTBEAT_SECS: u64 = 3600;

/// Clamps a heartbeat interval to `1..=MAX_HEARTBEAT_SECS` seconds.
#[must_use]
pub fn clamp_heartbeat(interval: Duration) -> Duration {
    interval.clamp(Duration::from_secs(1), Duration::from_secs(MAX_HEARTBEAT_SECS))
}

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value was out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending setting.
        field: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Who may join which broadcast group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum JoinPolicy {
    /// Any connection may join any group.
    #[default]
    Open,
    /// Tenant and user groups require a matching upgrade identity; any
    /// other group name must be a live share token.
    Scoped,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubConfigFile {
    server: ServerFileConfig,
    hub: HubFileConfig,
    reminders: RemindersFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

/// `[hub]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct HubFileConfig {
    heartbeat_interval_secs: Option<u64>,
    join_policy: Option<JoinPolicy>,
}

/// `[reminders]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemindersFileConfig {
    horizon_hours: Option<i64>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the hub server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "TaskHub collaboration server")]
pub struct HubCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "TASKHUB_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/taskhub/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound hub frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Seconds between heartbeat pings.
    #[arg(long)]
    pub heartbeat_interval_secs: Option<u64>,

    /// Group join policy.
    #[arg(long, value_enum)]
    pub join_policy: Option<JoinPolicy>,

    /// Default reminder horizon in hours.
    #[arg(long)]
    pub reminder_horizon_hours: Option<i64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKHUB_LOG")]
    pub log_level: String,

    /// Also write logs to this file.
    #[arg(long, env = "TASKHUB_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:8080`).
    pub bind_addr: String,
    /// Maximum inbound hub frame size in bytes.
    pub max_frame_size: usize,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Group join policy.
    pub join_policy: JoinPolicy,
    /// Default reminder horizon.
    pub reminder_horizon: chrono::Duration,
    /// Log level filter string.
    pub log_level: String,
    /// Optional log file.
    pub log_file: Option<PathBuf>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_frame_size: 64 * 1024,
            heartbeat_interval: Duration::from_secs(30),
            join_policy: JoinPolicy::Open,
            reminder_horizon: chrono::Duration::hours(24),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl HubConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path is tried and a missing file is treated as
    /// empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or a value is out of range.
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Heartbeat interval clamped to `1..=MAX_HEARTBEAT_SECS` seconds,
    /// including for configs built without [`Self::load`].
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        clamp_heartbeat(self.heartbeat_interval)
    }

    /// Priority: CLI > file > default.
    fn resolve(cli: &HubCliArgs, file: &HubConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let heartbeat_secs = cli
            .heartbeat_interval_secs
            .or(file.hub.heartbeat_interval_secs);
        let heartbeat_interval = match heartbeat_secs {
            Some(0) => {
                return Err(ConfigError::Invalid {
                    field: "heartbeat_interval_secs",
                    reason: "must be at least 1",
                });
            }
            Some(secs) if secs > MAX_HEARTBEAT_SECS => {
                return Err(ConfigError::Invalid {
                    field: "heartbeat_interval_secs",
                    reason: "must be at most 3600",
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.heartbeat_interval,
        };

        let horizon_hours = cli
            .reminder_horizon_hours
            .or(file.reminders.horizon_hours);
        let reminder_horizon = match horizon_hours {
            Some(hours) => chrono::Duration::try_hours(hours)
                .filter(|_| hours > 0)
                .ok_or(ConfigError::Invalid {
                    field: "horizon_hours",
                    reason: "must be a positive number of hours",
                })?,
            None => defaults.reminder_horizon,
        };

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            heartbeat_interval,
            join_policy: cli
                .join_policy
                .or(file.hub.join_policy)
                .unwrap_or(defaults.join_policy),
            reminder_horizon,
            log_level: cli.log_level.clone(),
            log_file: cli.log_file.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<HubConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(HubConfigFile::default());
        };
        config_dir.join("taskhub").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HubConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
