//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::{MigrateError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Flarum database (MySQL).
    #[serde(default)]
    pub source: SourceConfig,

    /// Discourse-shaped database (PostgreSQL).
    #[serde(default)]
    pub target: TargetConfig,

    /// Migration behavior.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source database (Flarum on MySQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Prefix of every Flarum table name (default: none).
    #[serde(default)]
    pub table_prefix: String,

    /// MySQL SSL mode: disabled, preferred or required (default: preferred).
    #[serde(default = "default_preferred")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

// Custom Debug implementation to prevent password leakage in logs
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("table_prefix", &self.table_prefix)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_mysql_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            table_prefix: String::new(),
            ssl_mode: default_preferred(),
            max_connections: default_max_connections(),
        }
    }
}

impl SourceConfig {
    /// Prefixed name of a Flarum table.
    pub fn table(&self, name: &str) -> String {
        format!("{}{}", self.table_prefix, name)
    }
}

/// Target database (PostgreSQL) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_localhost")]
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_pg_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            schema: default_public_schema(),
            ssl_mode: default_disable(),
            max_connections: default_max_connections(),
        }
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Records per source page (default: 5000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Directory holding Flarum avatar files. Avatars are skipped if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<PathBuf>,

    /// User that owns posts whose author was not imported.
    #[serde(default)]
    pub guest: GuestConfig,

    /// Flarum group name to target group name. Unlisted groups are skipped.
    #[serde(default = "default_group_map")]
    pub group_map: BTreeMap<String, String>,

    /// Passes to run (default: all). They always run in [`Pass::ALL`] order.
    #[serde(default = "default_passes")]
    pub passes: Vec<Pass>,

    /// Per-user like limit applied while likes are imported.
    #[serde(default = "default_import_max_likes_per_day")]
    pub import_max_likes_per_day: i64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            uploads_dir: None,
            guest: GuestConfig::default(),
            group_map: default_group_map(),
            passes: default_passes(),
            import_max_likes_per_day: default_import_max_likes_per_day(),
        }
    }
}

impl MigrationConfig {
    /// Whether a pass is selected.
    pub fn runs(&self, pass: Pass) -> bool {
        self.passes.contains(&pass)
    }
}

/// The guest user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestConfig {
    #[serde(default = "default_guest_username")]
    pub username: String,

    #[serde(default = "default_guest_email")]
    pub email: String,

    #[serde(default = "default_guest_name")]
    pub name: String,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            username: default_guest_username(),
            email: default_guest_email(),
            name: default_guest_name(),
        }
    }
}

/// One import pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    Users,
    Categories,
    Posts,
    Likes,
    Reactions,
    Groups,
    Close,
}

impl Pass {
    /// All passes, in execution order.
    pub const ALL: [Pass; 7] = [
        Pass::Users,
        Pass::Categories,
        Pass::Posts,
        Pass::Likes,
        Pass::Reactions,
        Pass::Groups,
        Pass::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pass::Users => "users",
            Pass::Categories => "categories",
            Pass::Posts => "posts",
            Pass::Likes => "likes",
            Pass::Reactions => "reactions",
            Pass::Groups => "groups",
            Pass::Close => "close",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Pass::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "Invalid pass '{}'. Valid values: users, categories, posts, likes, reactions, groups, close",
                    s
                ))
            })
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Default value functions for serde
fn default_localhost() -> String {
    "localhost".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_preferred() -> String {
    "preferred".to_string()
}

fn default_disable() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_batch_size() -> usize {
    5000
}

fn default_group_map() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Admin".to_string(), "admins".to_string()),
        ("Moderator".to_string(), "moderators".to_string()),
    ])
}

fn default_passes() -> Vec<Pass> {
    Pass::ALL.to_vec()
}

fn default_import_max_likes_per_day() -> i64 {
    5_000_000
}

fn default_guest_username() -> String {
    "guest".to_string()
}

fn default_guest_email() -> String {
    "guest@example.com".to_string()
}

fn default_guest_name() -> String {
    "Guest User".to_string()
}
