//! Configuration loader using figment.
//!
//! Sources, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. Programmatic defaults passed to [`ConfigLoader::merge`]
//! 3. Profile-specific config file (`hoshi.{profile}.toml`)
//! 4. Main config file (`hoshi.toml` or `config.toml`)
//! 5. Environment variables (`HOSHI_*`)
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML files (`hoshi.toml`, `config.toml`)
//! - `yaml-config`: YAML files (`hoshi.yaml`, `hoshi.yml`, `config.yaml`, `config.yml`)
//!
//! # Environment Variable Mapping
//!
//! Variables use the `HOSHI_` prefix with `__` separating nested keys:
//!
//! - `HOSHI_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `HOSHI_BOT__SUPERUSERS=[10001, 10002]` → `bot.superusers = [10001, 10002]`
//! - `HOSHI_STORAGE__SERVICE_DIR=/var/lib/hoshi` → `storage.service_dir`
//!
//! `HOSHI_PROFILE` selects the profile and is not treated as a config key.
//!
//! # Example
//!
//! ```rust,ignore
//! use hoshi_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./deploy/hoshi.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::HoshiConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "HOSHI_";
const PROFILE_VAR: &str = "HOSHI_PROFILE";
const APP_DIR: &str = "hoshi";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            _ => Self::Custom(name.to_string()),
        }
    }

    /// Reads `HOSHI_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_VAR)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    /// Loaded instead of searching when set.
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    /// Adds a search path for configuration files.
    ///
    /// Without explicit paths the current directory and the user config
    /// directory (`~/.config/hoshi` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join(APP_DIR))
        } else {
            self
        }
    }

    /// Loads exactly this file; a missing file is an error.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Layers `config` over the built-in defaults; files and env still win.
    pub fn merge(mut self, config: HoshiConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<HoshiConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: HoshiConfig = figment.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            superusers = config.bot.superusers.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(HoshiConfig::default()));

        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = Self::merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"));
        }

        Ok(figment)
    }

    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => {
                let _ = figment;
                Err(ConfigError::UnsupportedFormat(ext.to_string()))
            }
        }
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(APP_DIR));
        }
        paths
    }

    /// Searches `search_paths × base_names`, merging a profile-specific
    /// variant before its base file. Stops at the first base file found.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };

                let profile_path =
                    search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile-specific config");
                    figment = merge_fn(figment, &profile_path);
                }

                let base_path = search_path.join(base_name);
                if base_path.exists() {
                    info!(path = %base_path.display(), "Loading configuration file");
                    figment = merge_fn(figment, &base_path);
                    return (figment, true);
                }
            }
        }
        (figment, false)
    }

    #[allow(unused_mut, unused_variables)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["hoshi.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["hoshi.yaml", "hoshi.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<HoshiConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from one file plus environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<HoshiConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use figment::Jail;

    use super::*;
    use crate::config::schema::{LogFormat, LogLevel};

    #[test]
    fn test_defaults_load_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .expect("defaults load");

            assert_eq!(config.logging.level, LogLevel::Info);
            assert!(config.bot.superusers.is_empty());
            assert_eq!(config.bot.session_expire_timeout_secs, 120);
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_apply() {
        Jail::expect_with(|jail| {
            jail.set_env("HOSHI_BOT__SUPERUSERS", "[10001, 10002]");
            jail.set_env("HOSHI_LOGGING__LEVEL", "debug");
            jail.set_env("HOSHI_STORAGE__SERVICE_DIR", "/srv/hoshi/service");
            jail.set_env("HOSHI_PROFILE", "production");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .expect("env config loads");

            assert_eq!(config.bot.superusers, BTreeSet::from([10001, 10002]));
            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(
                config.storage.service_dir,
                PathBuf::from("/srv/hoshi/service")
            );
            Ok(())
        });
    }

    #[test]
    fn test_merge_sits_below_env() {
        Jail::expect_with(|jail| {
            jail.set_env("HOSHI_BOT__ONLINE_NOTICE", "from env");

            let mut base = HoshiConfig::default();
            base.bot.online_notice = Some("from code".into());
            base.bot.command_start = vec!["!".into()];

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .merge(base)
                .load()
                .expect("merged config loads");

            assert_eq!(config.bot.online_notice.as_deref(), Some("from env"));
            assert_eq!(config.bot.command_start, vec!["!"]);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_and_base_file_are_layered() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "hoshi.production.toml",
                r#"
                [bot]
                session_expire_timeout_secs = 30
                "#,
            )?;
            jail.create_file(
                "hoshi.toml",
                r##"
                [bot]
                superusers = [7]
                command_start = ["#"]

                [logging]
                format = "pretty"
                "##,
            )?;

            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .expect("file config loads");

            assert_eq!(config.bot.session_expire_timeout_secs, 30);
            assert_eq!(config.bot.superusers, BTreeSet::from([7]));
            assert_eq!(config.bot.command_start, vec!["#"]);
            assert_eq!(config.logging.format, LogFormat::Pretty);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.toml", "[bot]\nsession_expire_timeout_secs = 0\n")?;
            let err = ConfigLoader::new()
                .file(jail.directory().join("bad.toml"))
                .without_env()
                .load()
                .unwrap_err();
            assert!(matches!(err, ConfigError::ValidationError { .. }));

            jail.create_file("typo.toml", "[logging]\nlevel = \"loud\"\n")?;
            let err = ConfigLoader::new()
                .file(jail.directory().join("typo.toml"))
                .without_env()
                .load()
                .unwrap_err();
            assert!(matches!(err, ConfigError::Extract(_)));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let err = ConfigLoader::new()
            .file("/nonexistent/hoshi.toml")
            .without_env()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));

        let err = ConfigLoader::new()
            .file(Path::new(env!("CARGO_MANIFEST_DIR")).join("src/lib.rs"))
            .without_env()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(ext) if ext == "rs"));
    }

    #[test]
    fn test_profile_names() {
        assert_eq!(Profile::parse("PROD"), Profile::Production);
        assert_eq!(Profile::parse("dev"), Profile::Development);
        assert_eq!(Profile::parse("staging").as_str(), "staging");
    }
}
