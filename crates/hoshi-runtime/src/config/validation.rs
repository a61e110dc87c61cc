//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, HoshiConfig, LogOutput, LoggingConfig, StorageConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &HoshiConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_storage_config(&config.storage)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if let Some(id) = bot.superusers.iter().find(|id| **id <= 0) {
        return Err(ConfigError::validation(format!(
            "Superuser id must be positive, got {id}"
        )));
    }

    if bot.command_start.is_empty() {
        return Err(ConfigError::validation(
            "bot.command_start needs at least one prefix (use \"\" for bare commands)",
        ));
    }

    if bot.session_expire_timeout_secs == 0 {
        return Err(ConfigError::validation(
            "Session expire timeout must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_storage_config(storage: &StorageConfig) -> ConfigResult<()> {
    for (field, dir) in [
        ("storage.service_dir", &storage.service_dir),
        ("storage.config_dir", &storage.config_dir),
    ] {
        if dir.as_os_str().is_empty() {
            return Err(ConfigError::validation(format!("{field} must not be empty")));
        }
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is \"file\"",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&HoshiConfig::default()).is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = HoshiConfig::default();
        config.bot.superusers.insert(-3);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("-3"));

        let mut config = HoshiConfig::default();
        config.bot.command_start.clear();
        assert!(validate_config(&config).is_err());

        let mut config = HoshiConfig::default();
        config.bot.session_expire_timeout_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = HoshiConfig::default();
        config.storage.config_dir = "".into();
        assert!(
            validate_config(&config)
                .unwrap_err()
                .to_string()
                .contains("storage.config_dir")
        );

        let mut config = HoshiConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
        config.logging.file_path = Some("logs/hoshi.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
