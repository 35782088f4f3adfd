//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use crate::target::SslMode;

const SOURCE_SSL_MODES: [&str; 3] = ["disabled", "preferred", "required"];

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(MigrateError::Config("source.user is required".into()));
    }
    // The prefix is spliced into SQL text.
    if !is_identifier_fragment(&config.source.table_prefix) {
        return Err(MigrateError::Config(format!(
            "source.table_prefix may only contain letters, digits and '_', got '{}'",
            config.source.table_prefix
        )));
    }
    if !SOURCE_SSL_MODES.contains(&config.source.ssl_mode.to_ascii_lowercase().as_str()) {
        return Err(MigrateError::Config(format!(
            "source.ssl_mode must be one of disabled, preferred, required, got '{}'",
            config.source.ssl_mode
        )));
    }
    if config.source.max_connections == 0 {
        return Err(MigrateError::Config(
            "source.max_connections must be at least 1".into(),
        ));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.schema.is_empty() || !is_identifier_fragment(&config.target.schema) {
        return Err(MigrateError::Config(format!(
            "target.schema must be a plain identifier, got '{}'",
            config.target.schema
        )));
    }
    config.target.ssl_mode.parse::<SslMode>()?;
    if config.target.max_connections == 0 {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }

    // Migration validation
    let migration = &config.migration;
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.guest.username.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.guest.username is required".into(),
        ));
    }
    if !migration.guest.email.contains('@') {
        return Err(MigrateError::Config(format!(
            "migration.guest.email is not an email address: '{}'",
            migration.guest.email
        )));
    }
    if migration.passes.is_empty() {
        return Err(MigrateError::Config(
            "migration.passes must name at least one pass".into(),
        ));
    }
    if let Some((from, _)) = migration.group_map.iter().find(|(_, to)| to.trim().is_empty()) {
        return Err(MigrateError::Config(format!(
            "migration.group_map maps '{}' to an empty group name",
            from
        )));
    }
    if migration.import_max_likes_per_day < 1 {
        return Err(MigrateError::Config(
            "migration.import_max_likes_per_day must be at least 1".into(),
        ));
    }

    Ok(())
}

fn is_identifier_fragment(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                database: "flarum".to_string(),
                user: "root".to_string(),
                password: "password".to_string(),
                table_prefix: "flarum_".to_string(),
                ..SourceConfig::default()
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                database: "discourse".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ..TargetConfig::default()
            },
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_database() {
        let mut config = valid_config();
        config.source.database = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_table_prefix_must_be_safe() {
        let mut config = valid_config();
        config.source.table_prefix = "x; DROP TABLE users; --".to_string();
        assert!(validate(&config).is_err());

        config.source.table_prefix = String::new();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_target_ssl_mode() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_guest_needs_email() {
        let mut config = valid_config();
        config.migration.guest.email = "nobody".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
