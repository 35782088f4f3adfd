//! Configuration loading and validation.
//!
//! Configuration comes from a YAML file with `source`, `target` and
//! `migration` sections. Environment variables override individual values:
//!
//! | variable | field |
//! |---|---|
//! | `FLARUM_HOST`, `FLARUM_PORT`, `FLARUM_DB`, `FLARUM_USER`, `FLARUM_PW` | `source.*` |
//! | `TABLE_PREFIX` | `source.table_prefix` |
//! | `FLARUM_UPLOADS_DIR` | `migration.uploads_dir` |
//! | `BATCH_SIZE` | `migration.batch_size` |
//! | `TARGET_HOST`, `TARGET_PORT`, `TARGET_DB`, `TARGET_USER`, `TARGET_PW` | `target.*` |

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file if it exists, apply the process environment, then
    /// validate. Without a file the configuration comes from the environment.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        } else {
            tracing::debug!(
                "Config file {} not found, using environment only",
                path.display()
            );
            Config::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from environment variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).filter(|v| !v.is_empty());

        if let Some(v) = get("FLARUM_HOST") {
            self.source.host = v;
        }
        if let Some(v) = get("FLARUM_PORT") {
            self.source.port = parse_env("FLARUM_PORT", &v)?;
        }
        if let Some(v) = get("FLARUM_DB") {
            self.source.database = v;
        }
        if let Some(v) = get("FLARUM_USER") {
            self.source.user = v;
        }
        if let Some(v) = get("FLARUM_PW") {
            self.source.password = v;
        }
        if let Some(v) = get("TABLE_PREFIX") {
            self.source.table_prefix = v;
        }
        if let Some(v) = get("FLARUM_UPLOADS_DIR") {
            self.migration.uploads_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.migration.batch_size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("TARGET_HOST") {
            self.target.host = v;
        }
        if let Some(v) = get("TARGET_PORT") {
            self.target.port = parse_env("TARGET_PORT", &v)?;
        }
        if let Some(v) = get("TARGET_DB") {
            self.target.database = v;
        }
        if let Some(v) = get("TARGET_USER") {
            self.target.user = v;
        }
        if let Some(v) = get("TARGET_PW") {
            self.target.password = v;
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| MigrateError::Config(format!("{} has an invalid value: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
source:
  host: flarum-db
  database: flarum
  user: flarum
  password: secret
  table_prefix: fl_
target:
  host: pg
  database: discourse
  user: discourse
  password: secret
migration:
  batch_size: 100
  passes: [users, posts]
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.table("users"), "fl_users");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.batch_size, 100);
        assert_eq!(config.migration.guest.username, "guest");
        assert_eq!(config.migration.group_map["Admin"], "admins");
        assert!(config.migration.runs(Pass::Posts));
        assert!(!config.migration.runs(Pass::Likes));
    }

    #[test]
    fn test_from_yaml_rejects_missing_fields() {
        assert!(Config::from_yaml("source:\n  host: x\n").is_err());
    }

    #[test]
    fn test_unknown_pass_rejected() {
        let yaml = YAML.replace("[users, posts]", "[users, topics]");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FLARUM_HOST", "db.internal"),
            ("FLARUM_PORT", "3307"),
            ("TABLE_PREFIX", ""),
            ("BATCH_SIZE", "250"),
            ("FLARUM_UPLOADS_DIR", "/srv/avatars"),
            ("TARGET_PW", "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::from_yaml(YAML).unwrap();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.source.host, "db.internal");
        assert_eq!(config.source.port, 3307);
        // Empty variables are ignored.
        assert_eq!(config.source.table_prefix, "fl_");
        assert_eq!(config.migration.batch_size, 250);
        assert_eq!(
            config.migration.uploads_dir.as_deref(),
            Some(Path::new("/srv/avatars"))
        );
        assert_eq!(config.target.password, "from-env");
    }

    #[test]
    fn test_apply_env_rejects_bad_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "BATCH_SIZE").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("BATCH_SIZE"));
    }

    #[test]
    fn test_env_only_config() {
        let env: HashMap<&str, &str> = [
            ("FLARUM_DB", "flarum"),
            ("FLARUM_USER", "root"),
            ("TARGET_DB", "discourse"),
            ("TARGET_USER", "postgres"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.source.host, "localhost");
    }
}
