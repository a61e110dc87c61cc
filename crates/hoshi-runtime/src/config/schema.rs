//! Configuration schema definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HoshiConfig {
    /// Dispatch and bot behaviour.
    #[serde(default)]
    pub bot: BotConfig,

    /// Where service state and configs live.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bot-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// User ids holding the SUPERUSER permission level.
    #[serde(default)]
    pub superusers: BTreeSet<i64>,

    /// Prefixes a command may start with. An empty string allows bare commands.
    #[serde(default = "default_command_start")]
    pub command_start: Vec<String>,

    /// Lifetime of a suspended handler chain in seconds.
    #[serde(default = "default_session_expire")]
    pub session_expire_timeout_secs: u64,

    /// Private message sent to every superuser when a bot connects.
    #[serde(default)]
    pub online_notice: Option<String>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            superusers: BTreeSet::new(),
            command_start: default_command_start(),
            session_expire_timeout_secs: default_session_expire(),
            online_notice: None,
        }
    }
}

impl BotConfig {
    pub fn session_expire(&self) -> Duration {
        Duration::from_secs(self.session_expire_timeout_secs)
    }
}

fn default_command_start() -> Vec<String> {
    vec!["/".to_string(), String::new()]
}

fn default_session_expire() -> u64 {
    120
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one `{name}.json` enable-state record per service.
    #[serde(default = "default_service_dir")]
    pub service_dir: PathBuf,

    /// Directory holding optional `{name}.json` per-service configs.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            service_dir: default_service_dir(),
            config_dir: default_config_dir(),
        }
    }
}

fn default_service_dir() -> PathBuf {
    PathBuf::from("data/service")
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("data/service_config")
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
///
/// `json` needs the `json-log` feature; without it the full format is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Rotation period of the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Rotated files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Per-module levels, e.g. `hoshi_framework = "debug"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            rotation: LogRotation::Never,
            max_files: default_max_files(),
            thread_ids: false,
            file_location: false,
            span_events: SpanEventConfig::default(),
            filters: BTreeMap::new(),
        }
    }
}

fn default_max_files() -> usize {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: HoshiConfig =
            serde_json::from_str(r#"{"bot": {"superusers": [42]}, "logging": {"level": "warn"}}"#)
                .unwrap();

        assert_eq!(config.bot.superusers, BTreeSet::from([42]));
        assert_eq!(config.bot.command_start, vec!["/", ""]);
        assert_eq!(config.bot.session_expire(), Duration::from_secs(120));
        assert_eq!(config.storage.service_dir, PathBuf::from("data/service"));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
        assert_eq!(config.logging.max_files, 5);
    }

    #[test]
    fn test_log_level_names() {
        let level: LogLevel = serde_json::from_str(r#""trace""#).unwrap();
        assert_eq!(level.to_tracing_level(), tracing::Level::TRACE);
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert!(serde_json::from_str::<LogLevel>(r#""loud""#).is_err());
    }
}
