//! Store wiring for a migration.
//!
//! The target store also keeps the identity mappings, so one connection
//! serves as both the [`TargetStore`] and the [`IdentityBackend`].

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::identity::IdentityBackend;
use crate::source::{MysqlSource, SourceStore};
use crate::target::{MemoryTargetStore, PgTargetStore, TargetStore};

/// The stores a migrator works against.
#[derive(Clone)]
pub struct Stores {
    pub source: Arc<dyn SourceStore>,
    pub target: Arc<dyn TargetStore>,
    pub identity: Arc<dyn IdentityBackend>,
}

impl Stores {
    /// Connect to the configured source, and to the configured target unless
    /// `dry_run` asks for an in-memory one.
    pub async fn connect(config: &Config, dry_run: bool) -> Result<Self> {
        let source = Arc::new(MysqlSource::new(&config.source).await?);

        if dry_run {
            info!("Dry run: writing to an in-memory target");
            return Ok(Self::with_memory_target(source, Arc::new(MemoryTargetStore::new())));
        }

        let target = Arc::new(PgTargetStore::new(&config.target).await?);
        Ok(Self {
            source,
            target: target.clone(),
            identity: target,
        })
    }

    /// Stores over an in-memory target.
    pub fn with_memory_target(
        source: Arc<dyn SourceStore>,
        target: Arc<MemoryTargetStore>,
    ) -> Self {
        Self {
            source,
            target: target.clone(),
            identity: target,
        }
    }
}
