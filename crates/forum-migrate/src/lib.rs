//! # forum-migrate
//!
//! Flarum to Discourse forum migration library.
//!
//! Reads a Flarum MySQL database and writes users, categories, topics, posts,
//! likes, reactions and group memberships into a Discourse-shaped PostgreSQL
//! schema, with support for:
//!
//! - **Re-runnable imports**: every created entity is recorded in an
//!   identity map in the same transaction, so a second run skips it
//! - **Thread reconstruction** for discussions with a missing or hidden
//!   first post
//! - **Content conversion** from Flarum's stored XML to Markdown
//! - **Permalinks** from legacy discussion and post URLs
//! - **Dry runs** against an in-memory target
//!
//! ## Example
//!
//! ```rust,no_run
//! use forum_migrate::{Config, Migrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), forum_migrate::MigrateError> {
//!     let config = Config::load_with_env("config.yaml")?;
//!     let migrator = Migrator::connect(config, false).await?;
//!     let result = migrator.run().await?;
//!     println!("Imported {} records", result.records_changed);
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod content;
pub mod error;
pub mod identity;
pub mod model;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod thread;
pub mod xref;

// Re-exports for convenient access
pub use batch::{BatchRunner, PassStats, RecordOutcome, SkipReason};
pub use config::{Config, GuestConfig, MigrationConfig, Pass, SourceConfig, TargetConfig};
pub use content::{ContentTransformer, MentionResolver, UserDirectory};
pub use error::{MigrateError, Result};
pub use identity::{IdentityBackend, IdentityMapper};
pub use model::{EntityKind, TopicId};
pub use orchestrator::{
    health_check, HealthCheckResult, KindCount, MigrationResult, Migrator, Stores,
    ValidationReport,
};
pub use source::{MemorySource, MysqlSource, SourceStore};
pub use target::{MemoryTargetStore, PgTargetStore, TargetStore};
