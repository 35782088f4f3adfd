//! Migration orchestrator - runs the import passes in order.
//!
//! Every pass streams its records through a [`BatchRunner`] into an importer
//! that consults the [`IdentityMapper`] first, so a migration that was
//! interrupted, failed or completed can simply be run again.

mod artifacts;
mod categories;
mod pages;
mod posts;
mod stores;
mod users;

pub use categories::{normalize_color, parents_first};
pub use stores::Stores;
pub use users::is_valid_email;

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{BatchRunner, PassStats, VecPages};
use crate::config::{Config, Pass};
use crate::content::{ContentTransformer, UserDirectory};
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapper;
use crate::model::{
    EntityKind, NewUser, SiteSettings, SourceGroupMember, SourceLike, SourceReaction, SourceUser,
};
use crate::source::{MysqlSource, SourceSet, SourceStore};
use crate::target::{with_settings, PgTargetStore, TargetStore};
use artifacts::{CloseImporter, GroupImporter, LikeImporter, ReactionImporter};
use categories::CategoryImporter;
use pages::{LockedPages, SetPages, ThreadPages};
use posts::PostImporter;
use users::UserImporter;

/// Migration orchestrator.
pub struct Migrator {
    config: Config,
    stores: Stores,
    cancel: Option<CancellationToken>,
    progress: bool,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status: completed, failed or cancelled.
    pub status: String,

    /// Why the run stopped, unless it completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Target store type (`postgres`, or `memory` for dry runs).
    pub target: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the migration completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Statistics of every pass that ran, in order.
    pub passes: Vec<PassStats>,

    /// Records created or updated across all passes.
    pub records_changed: u64,

    /// Records skipped across all passes, excluding already-imported ones.
    pub records_skipped: u64,

    /// Records that failed across all passes.
    pub records_failed: u64,
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Source count against mapped count for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: EntityKind,
    pub source: u64,
    pub mapped: u64,
}

impl KindCount {
    /// Whether every source record of the kind has a mapping.
    pub fn is_complete(&self) -> bool {
        self.mapped >= self.source
    }
}

/// Per-kind comparison of source records and identity mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub kinds: Vec<KindCount>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.kinds.iter().all(KindCount::is_complete)
    }
}

/// Connectivity of both stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
}

/// Connect to both configured stores and report how that went.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let start = Instant::now();
    let source = match MysqlSource::new(&config.source).await {
        Ok(source) => source.ping().await,
        Err(e) => Err(e),
    };
    let source_latency_ms = start.elapsed().as_millis() as u64;

    let start = Instant::now();
    let target = match PgTargetStore::new(&config.target).await {
        Ok(target) => target.ping().await,
        Err(e) => Err(e),
    };
    let target_latency_ms = start.elapsed().as_millis() as u64;

    HealthCheckResult {
        healthy: source.is_ok() && target.is_ok(),
        source_connected: source.is_ok(),
        source_latency_ms,
        source_error: source.err().map(|e| e.to_string()),
        target_connected: target.is_ok(),
        target_latency_ms,
        target_error: target.err().map(|e| e.to_string()),
    }
}

impl Migrator {
    pub fn new(config: Config, stores: Stores) -> Self {
        Self {
            config,
            stores,
            cancel: None,
            progress: false,
        }
    }

    /// Connect to the configured stores. A dry run writes to memory.
    pub async fn connect(config: Config, dry_run: bool) -> Result<Self> {
        let stores = Stores::connect(&config, dry_run).await?;
        Ok(Self::new(config, stores))
    }

    /// Stop between pages once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Print JSON progress lines to stderr.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Run the selected passes.
    pub async fn run(&self) -> Result<MigrationResult> {
        let (result, outcome) = self.run_with_report().await?;
        outcome.map(|()| result)
    }

    /// Run the selected passes and report on them whether or not they all
    /// succeed. The returned result carries the final status and the stats of
    /// the passes that finished; the inner error is why the run stopped. The
    /// outer error means setup failed before any pass ran.
    pub async fn run_with_report(&self) -> Result<(MigrationResult, Result<()>)> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let target = self.stores.target.as_ref();

        info!(
            "Starting migration run {}: {} source -> {} target",
            run_id,
            self.stores.source.store_type(),
            target.store_type()
        );

        target.init_schema().await?;
        self.stores.identity.init_schema().await?;
        let mut identity = IdentityMapper::load(self.stores.identity.clone()).await?;
        let mut directory = UserDirectory::from_users(target.list_users().await?);
        debug!("User directory preloaded with {} users", directory.len());

        let mut passes = Vec::new();
        let outcome = self
            .run_passes(&mut identity, &mut directory, &mut passes)
            .await;

        let completed_at = Utc::now();
        let status = match &outcome {
            Ok(()) => "completed",
            Err(MigrateError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        let result = MigrationResult {
            run_id,
            status: status.to_string(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            target: target.store_type().to_string(),
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            records_changed: passes.iter().map(PassStats::changed).sum(),
            records_skipped: passes.iter().map(|p| p.skipped).sum(),
            records_failed: passes.iter().map(|p| p.failed).sum(),
            passes,
        };

        info!(
            "Migration run {} {} in {:.1}s: {} changed, {} skipped, {} failed",
            result.run_id,
            result.status,
            result.duration_seconds,
            result.records_changed,
            result.records_skipped,
            result.records_failed
        );
        Ok((result, outcome))
    }

    async fn run_passes(
        &self,
        identity: &mut IdentityMapper,
        directory: &mut UserDirectory,
        passes: &mut Vec<PassStats>,
    ) -> Result<()> {
        for pass in Pass::ALL {
            if !self.config.migration.runs(pass) {
                debug!("Pass {} not selected", pass);
                continue;
            }
            info!("Pass {}", pass);
            let stats = match pass {
                Pass::Users => self.import_users(identity, directory).await?,
                Pass::Categories => self.import_categories(identity).await?,
                Pass::Posts => self.import_posts(identity, directory).await?,
                Pass::Likes => self.import_likes(identity).await?,
                Pass::Reactions => self.import_reactions(identity).await?,
                Pass::Groups => self.import_groups(identity).await?,
                Pass::Close => self.close_topics(identity).await?,
            };
            passes.push(stats);
        }
        Ok(())
    }

    fn runner(&self, pass: Pass) -> BatchRunner {
        let runner = BatchRunner::new(pass.as_str(), self.config.migration.batch_size)
            .with_progress(self.progress);
        match &self.cancel {
            Some(token) => runner.with_cancel(token.clone()),
            None => runner,
        }
    }

    async fn import_users(
        &self,
        identity: &mut IdentityMapper,
        directory: &mut UserDirectory,
    ) -> Result<PassStats> {
        let mut sink = UserImporter {
            target: self.stores.target.as_ref(),
            identity,
            directory,
            uploads_dir: self.config.migration.uploads_dir.as_deref(),
        };
        let mut pages = SetPages::<SourceUser>::new(self.stores.source.as_ref());
        self.runner(Pass::Users).run(&mut pages, &mut sink).await
    }

    async fn import_categories(&self, identity: &mut IdentityMapper) -> Result<PassStats> {
        let categories = parents_first(self.stores.source.categories().await?);
        let mut sink = CategoryImporter {
            target: self.stores.target.as_ref(),
            identity,
        };
        self.runner(Pass::Categories)
            .run(&mut VecPages::new(categories), &mut sink)
            .await
    }

    async fn import_posts(
        &self,
        identity: &mut IdentityMapper,
        directory: &mut UserDirectory,
    ) -> Result<PassStats> {
        let target = self.stores.target.as_ref();
        let guest = &self.config.migration.guest;
        let guest_id = target
            .ensure_user(&NewUser {
                username: guest.username.clone(),
                name: guest.name.clone(),
                email: guest.email.clone(),
                created_at: None,
                last_seen_at: None,
                suspended_till: None,
                bio_raw: None,
                approved: true,
            })
            .await?;
        directory.insert(&guest.username, Some(&guest.name));
        debug!("Guest user '{}' is target user {}", guest.username, guest_id);

        let tag_parents: HashMap<i64, Option<i64>> = self
            .stores
            .source
            .categories()
            .await?
            .into_iter()
            .map(|c| (c.id, c.parent_id))
            .collect();

        let mut sink = PostImporter {
            target,
            identity,
            transformer: ContentTransformer::new(&*directory, &guest.username),
            guest_id,
            tag_parents,
        };
        let mut pages = ThreadPages::new(self.stores.source.as_ref());
        self.runner(Pass::Posts).run(&mut pages, &mut sink).await
    }

    async fn import_likes(&self, identity: &IdentityMapper) -> Result<PassStats> {
        let target = self.stores.target.as_ref();
        let source = self.stores.source.as_ref();
        let runner = self.runner(Pass::Likes);
        let settings = SiteSettings {
            max_likes_per_day: Some(self.config.migration.import_max_likes_per_day),
            rate_limits_enabled: None,
        };

        with_settings(target, &settings, || async move {
            let mut sink = LikeImporter { target, identity };
            runner
                .run(&mut SetPages::<SourceLike>::new(source), &mut sink)
                .await
        })
        .await
    }

    async fn import_reactions(&self, identity: &mut IdentityMapper) -> Result<PassStats> {
        let target = self.stores.target.as_ref();
        let source = self.stores.source.as_ref();
        let runner = self.runner(Pass::Reactions);
        let settings = SiteSettings {
            max_likes_per_day: None,
            rate_limits_enabled: Some(false),
        };

        with_settings(target, &settings, || async move {
            let mut sink = ReactionImporter { target, identity };
            runner
                .run(&mut SetPages::<SourceReaction>::new(source), &mut sink)
                .await
        })
        .await
    }

    async fn import_groups(&self, identity: &IdentityMapper) -> Result<PassStats> {
        let mut sink = GroupImporter {
            target: self.stores.target.as_ref(),
            identity,
            group_map: &self.config.migration.group_map,
        };
        let mut pages = SetPages::<SourceGroupMember>::new(self.stores.source.as_ref());
        self.runner(Pass::Groups).run(&mut pages, &mut sink).await
    }

    async fn close_topics(&self, identity: &IdentityMapper) -> Result<PassStats> {
        let mut sink = CloseImporter {
            source: self.stores.source.as_ref(),
            target: self.stores.target.as_ref(),
            identity,
        };
        let mut pages = LockedPages::new(self.stores.source.as_ref());
        self.runner(Pass::Close).run(&mut pages, &mut sink).await
    }

    /// Compare source counts with stored mappings, per entity kind.
    pub async fn validate(&self) -> Result<ValidationReport> {
        let mut report = ValidationReport::default();
        for kind in EntityKind::ALL {
            let set = match kind {
                EntityKind::User => SourceSet::Users,
                EntityKind::Category => SourceSet::Tags,
                EntityKind::Post => SourceSet::Posts,
                EntityKind::Reaction => SourceSet::Reactions,
            };
            let source = self.stores.source.count(set).await?;
            let mapped = self.stores.identity.count(kind).await?.max(0) as u64;
            let count = KindCount {
                kind,
                source,
                mapped,
            };

            if count.is_complete() {
                info!("{}: {} source, {} mapped (complete)", kind, source, mapped);
            } else {
                warn!(
                    "{}: {} source, {} mapped ({} not imported)",
                    kind,
                    source,
                    mapped,
                    source - mapped
                );
            }
            report.kinds.push(count);
        }
        Ok(report)
    }
}
