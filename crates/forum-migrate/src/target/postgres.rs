//! PostgreSQL target store.
//!
//! Writes a Discourse-shaped schema through deadpool-postgres. Every create
//! call that maps a source record inserts the entity and its `import_ids` row
//! in one transaction, so a crash never leaves an unmapped entity behind.
//!
//! Topics and posts draw ids from one sequence; a topic takes the id of its
//! first post.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Transaction};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use super::{SslMode, TargetStore, TlsBuilder};
use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityBackend;
use crate::model::{
    next_post_number, ArtifactOutcome, CreatedPost, CrossRefArtifact, EntityKind, NewCategory,
    NewPost, NewUser, PermalinkTarget, PostPlacement, SiteSettings, SourceRef, TopicId, UserName,
};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_LIKES_PER_DAY: &str = "max_likes_per_day";
const RATE_LIMITS_ENABLED: &str = "rate_limits_enabled";

/// Groups every site starts with.
const DEFAULT_GROUPS: [&str; 2] = ["admins", "moderators"];

/// PostgreSQL target store.
pub struct PgTargetStore {
    pool: Pool,
    schema: String,
}

impl PgTargetStore {
    /// Connect to the target database.
    pub async fn new(config: &TargetConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode: SslMode = config.ssl_mode.parse()?;
        let max_size = config.max_connections as usize;
        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr).max_size(max_size).build()
            }
            Some(tls) => {
                let mgr = Manager::from_config(pg_config, tls, mgr_config);
                Pool::builder(mgr).max_size(max_size).build()
            }
        }
        .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL target pool"))?;

        let store = Self {
            pool,
            schema: config.schema.clone(),
        };
        store.ping().await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (schema '{}')",
            config.host, config.port, config.database, config.schema
        );

        Ok(store)
    }

    /// Schema-qualified, quoted table name.
    fn table(&self, name: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(name))
    }

    async fn next_post_id(&self, tx: &Transaction<'_>) -> Result<i64> {
        let sql = format!("SELECT nextval('{}')", self.table("post_ids"));
        Ok(tx.query_one(&sql, &[]).await?.get(0))
    }

    async fn ensure_unmapped(
        &self,
        tx: &Transaction<'_>,
        kind: EntityKind,
        source_id: i64,
    ) -> Result<()> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE kind = $1 AND source_id = $2",
            self.table("import_ids")
        );
        if tx
            .query_opt(&sql, &[&kind.as_str(), &source_id])
            .await?
            .is_some()
        {
            return Err(MigrateError::DuplicateMapping { kind, source_id });
        }
        Ok(())
    }

    /// Write a mapping. The identical mapping already present is accepted.
    async fn record_mapping(
        &self,
        tx: &Transaction<'_>,
        kind: EntityKind,
        source_id: i64,
        target_id: i64,
    ) -> Result<()> {
        let table = self.table("import_ids");
        let inserted = tx
            .execute(
                &format!(
                    "INSERT INTO {} (kind, source_id, target_id) VALUES ($1, $2, $3) \
                     ON CONFLICT DO NOTHING",
                    table
                ),
                &[&kind.as_str(), &source_id, &target_id],
            )
            .await?;
        if inserted == 1 {
            return Ok(());
        }

        let by_source = tx
            .query_opt(
                &format!(
                    "SELECT target_id FROM {} WHERE kind = $1 AND source_id = $2",
                    table
                ),
                &[&kind.as_str(), &source_id],
            )
            .await?;
        if let Some(row) = by_source {
            let existing: i64 = row.get(0);
            if existing == target_id {
                return Ok(());
            }
            return Err(MigrateError::DuplicateMapping { kind, source_id });
        }

        let by_target = tx
            .query_opt(
                &format!(
                    "SELECT source_id FROM {} WHERE kind = $1 AND target_id = $2",
                    table
                ),
                &[&kind.as_str(), &target_id],
            )
            .await?;
        match by_target {
            Some(row) => Err(MigrateError::TargetAlreadyMapped {
                kind,
                target_id,
                existing_source_id: row.get(0),
            }),
            None => Err(MigrateError::Validation(format!(
                "{} mapping {} -> {} was rejected",
                kind, source_id, target_id
            ))),
        }
    }

    async fn find_user_id(&self, tx: &Transaction<'_>, username: &str) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT id FROM {} WHERE username_lower = $1",
            self.table("users")
        );
        Ok(tx
            .query_opt(&sql, &[&username.to_lowercase()])
            .await?
            .map(|row| row.get(0)))
    }

    async fn validate_user(&self, tx: &Transaction<'_>, user: &NewUser) -> Result<()> {
        if user.username.trim().is_empty() {
            return Err(MigrateError::Validation("username is blank".into()));
        }
        if self.find_user_id(tx, &user.username).await?.is_some() {
            return Err(MigrateError::Validation(format!(
                "username '{}' is taken",
                user.username
            )));
        }
        let sql = format!(
            "SELECT 1 FROM {} WHERE lower(email) = lower($1)",
            self.table("users")
        );
        if tx.query_opt(&sql, &[&user.email]).await?.is_some() {
            return Err(MigrateError::Validation(format!(
                "email '{}' is taken",
                user.email
            )));
        }
        Ok(())
    }

    async fn insert_user(&self, tx: &Transaction<'_>, user: &NewUser) -> Result<i64> {
        let sql = format!(
            "INSERT INTO {} (username, username_lower, name, email, created_at, last_seen_at, \
                             suspended_till, bio_raw, approved) \
             VALUES ($1, $2, $3, $4, COALESCE($5, NOW()), $6, $7, $8, $9) RETURNING id",
            self.table("users")
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &user.username,
                    &user.username.to_lowercase(),
                    &user.name,
                    &user.email,
                    &user.created_at,
                    &user.last_seen_at,
                    &user.suspended_till,
                    &user.bio_raw,
                    &user.approved,
                ],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn require_row(
        &self,
        tx: &Transaction<'_>,
        table: &str,
        id: i64,
        child: &str,
    ) -> Result<()> {
        let sql = format!("SELECT 1 FROM {} WHERE id = $1", self.table(table));
        if tx.query_opt(&sql, &[&id]).await?.is_none() {
            let singular = table.trim_end_matches('s');
            return Err(MigrateError::missing_reference(
                format!("target {} {}", singular, id),
                child,
            ));
        }
        Ok(())
    }

    /// Set a site setting, returning its previous value.
    async fn swap_setting(
        &self,
        tx: &Transaction<'_>,
        name: &str,
        value: String,
    ) -> Result<Option<String>> {
        let table = self.table("site_settings");
        let previous = tx
            .query_opt(
                &format!("SELECT value FROM {} WHERE name = $1 FOR UPDATE", table),
                &[&name],
            )
            .await?
            .map(|row| row.get::<_, String>(0));
        tx.execute(
            &format!(
                "INSERT INTO {} (name, value, updated_at) VALUES ($1, $2, NOW()) \
                 ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
                table
            ),
            &[&name, &value],
        )
        .await?;
        Ok(previous)
    }

    fn schema_ddl(&self) -> Vec<String> {
        let t = |name: &str| self.table(name);
        vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)),
            format!("CREATE SEQUENCE IF NOT EXISTS {}", t("post_ids")),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    username TEXT NOT NULL,
                    username_lower TEXT NOT NULL UNIQUE,
                    name TEXT,
                    email TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    last_seen_at TIMESTAMPTZ,
                    suspended_till TIMESTAMPTZ,
                    bio_raw TEXT,
                    approved BOOLEAN NOT NULL DEFAULT TRUE
                )",
                t("users")
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_lower ON {} (lower(email))",
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    user_id BIGINT PRIMARY KEY REFERENCES {} (id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    data BYTEA NOT NULL,
                    uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                t("user_avatars"),
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    slug TEXT,
                    position INTEGER,
                    description TEXT,
                    color TEXT,
                    parent_category_id BIGINT REFERENCES {} (id),
                    read_restricted BOOLEAN NOT NULL DEFAULT FALSE,
                    icon TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                t("categories"),
                t("categories")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGINT PRIMARY KEY,
                    title TEXT NOT NULL,
                    category_id BIGINT REFERENCES {} (id),
                    pinned_at TIMESTAMPTZ,
                    visible BOOLEAN NOT NULL DEFAULT TRUE,
                    closed BOOLEAN NOT NULL DEFAULT FALSE,
                    highest_post_number INTEGER NOT NULL DEFAULT 0,
                    posts_count INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL
                )",
                t("topics"),
                t("categories")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGINT PRIMARY KEY,
                    topic_id BIGINT NOT NULL REFERENCES {} (id),
                    post_number INTEGER NOT NULL,
                    user_id BIGINT NOT NULL REFERENCES {} (id),
                    raw TEXT NOT NULL,
                    reply_to_post_number INTEGER,
                    created_at TIMESTAMPTZ NOT NULL,
                    UNIQUE (topic_id, post_number)
                )",
                t("posts"),
                t("topics"),
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    url TEXT NOT NULL UNIQUE,
                    topic_id BIGINT REFERENCES {} (id),
                    post_id BIGINT REFERENCES {} (id),
                    CHECK ((topic_id IS NULL) <> (post_id IS NULL))
                )",
                t("permalinks"),
                t("topics"),
                t("posts")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    post_id BIGINT NOT NULL REFERENCES {} (id),
                    user_id BIGINT NOT NULL REFERENCES {} (id),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    UNIQUE (post_id, user_id)
                )",
                t("post_likes"),
                t("posts"),
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    post_id BIGINT NOT NULL REFERENCES {} (id),
                    user_id BIGINT NOT NULL REFERENCES {} (id),
                    identifier TEXT NOT NULL,
                    UNIQUE (post_id, user_id, identifier)
                )",
                t("post_reactions"),
                t("posts"),
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE
                )",
                t("groups")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    group_id BIGINT NOT NULL REFERENCES {} (id),
                    user_id BIGINT NOT NULL REFERENCES {} (id),
                    PRIMARY KEY (group_id, user_id)
                )",
                t("group_users"),
                t("groups"),
                t("users")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    name TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                t("site_settings")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    kind TEXT NOT NULL,
                    source_id BIGINT NOT NULL,
                    target_id BIGINT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (kind, source_id),
                    UNIQUE (kind, target_id)
                )",
                t("import_ids")
            ),
        ]
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Parse a stored setting value; unparseable values restore as untouched.
fn parse_setting<T: std::str::FromStr>(name: &str, value: Option<String>) -> Option<T> {
    let value = value?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring unparseable site setting {}={:?}", name, value);
            None
        }
    }
}

#[async_trait]
impl TargetStore for PgTargetStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;
        for ddl in self.schema_ddl() {
            client.execute(&ddl, &[]).await?;
        }

        let groups = self.table("groups");
        for group in DEFAULT_GROUPS {
            client
                .execute(
                    &format!(
                        "INSERT INTO {} (name) VALUES ($1) ON CONFLICT (name) DO NOTHING",
                        groups
                    ),
                    &[&group],
                )
                .await?;
        }

        let settings = self.table("site_settings");
        for (name, value) in [(MAX_LIKES_PER_DAY, "50"), (RATE_LIMITS_ENABLED, "true")] {
            client
                .execute(
                    &format!(
                        "INSERT INTO {} (name, value) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING",
                        settings
                    ),
                    &[&name, &value],
                )
                .await?;
        }

        debug!("Initialized target schema '{}'", self.schema);
        Ok(())
    }

    async fn create_user(&self, source_id: i64, user: &NewUser) -> Result<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.ensure_unmapped(&tx, EntityKind::User, source_id).await?;
        self.validate_user(&tx, user).await?;
        let id = self.insert_user(&tx, user).await?;
        self.record_mapping(&tx, EntityKind::User, source_id, id)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn ensure_user(&self, user: &NewUser) -> Result<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        if let Some(id) = self.find_user_id(&tx, &user.username).await? {
            return Ok(id);
        }
        self.validate_user(&tx, user).await?;
        let id = self.insert_user(&tx, user).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn list_users(&self) -> Result<Vec<UserName>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT username, name FROM {} ORDER BY id", self.table("users"));
        let rows = client.query(&sql, &[]).await?;
        Ok(rows
            .iter()
            .map(|row| UserName {
                username: row.get(0),
                name: row.get(1),
            })
            .collect())
    }

    async fn upload_avatar(&self, user_id: i64, path: &Path) -> Result<()> {
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.require_row(&tx, "users", user_id, "avatar").await?;
        tx.execute(
            &format!(
                "INSERT INTO {} (user_id, file_name, data) VALUES ($1, $2, $3) \
                 ON CONFLICT (user_id) DO UPDATE SET file_name = EXCLUDED.file_name, \
                 data = EXCLUDED.data, uploaded_at = NOW()",
                self.table("user_avatars")
            ),
            &[&user_id, &file_name, &data],
        )
        .await?;
        tx.commit().await?;
        debug!("Uploaded avatar {} for user {}", file_name, user_id);
        Ok(())
    }

    async fn create_category(&self, source_id: i64, category: &NewCategory) -> Result<i64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.ensure_unmapped(&tx, EntityKind::Category, source_id)
            .await?;
        if let Some(parent) = category.parent_category_id {
            self.require_row(&tx, "categories", parent, &format!("category {}", source_id))
                .await?;
        }
        let sql = format!(
            "INSERT INTO {} (name, slug, position, description, color, parent_category_id, \
                             read_restricted, icon, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, COALESCE($9, NOW()), COALESCE($10, NOW())) \
             RETURNING id",
            self.table("categories")
        );
        let id: i64 = tx
            .query_one(
                &sql,
                &[
                    &category.name,
                    &category.slug,
                    &category.position,
                    &category.description,
                    &category.color,
                    &category.parent_category_id,
                    &category.read_restricted,
                    &category.icon,
                    &category.created_at,
                    &category.updated_at,
                ],
            )
            .await?
            .get(0);
        self.record_mapping(&tx, EntityKind::Category, source_id, id)
            .await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn create_post(&self, source_id: i64, post: &NewPost) -> Result<CreatedPost> {
        let child = format!("post {}", source_id);
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.ensure_unmapped(&tx, EntityKind::Post, source_id).await?;
        self.require_row(&tx, "users", post.author_id, &child).await?;

        let topics = self.table("topics");
        let (topic_id, post_id, post_number) = match &post.placement {
            PostPlacement::NewTopic(attrs) => {
                if attrs.title.trim().is_empty() {
                    return Err(MigrateError::Validation("topic title is blank".into()));
                }
                let id = self.next_post_id(&tx).await?;
                tx.execute(
                    &format!(
                        "INSERT INTO {} (id, title, category_id, pinned_at, visible, closed, created_at) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                        topics
                    ),
                    &[
                        &id,
                        &attrs.title,
                        &attrs.category_id,
                        &attrs.pinned_at,
                        &attrs.visible,
                        &attrs.closed,
                        &post.created_at,
                    ],
                )
                .await?;
                (TopicId::of_first_post(id), id, 1)
            }
            PostPlacement::Reply {
                topic_id,
                post_number,
            } => {
                let highest: i32 = tx
                    .query_opt(
                        &format!(
                            "SELECT highest_post_number FROM {} WHERE id = $1 FOR UPDATE",
                            topics
                        ),
                        &[&topic_id.get()],
                    )
                    .await?
                    .ok_or_else(|| {
                        MigrateError::missing_reference(format!("topic {}", topic_id), &child)
                    })?
                    .get(0);
                let id = self.next_post_id(&tx).await?;
                (*topic_id, id, next_post_number(highest, *post_number))
            }
        };

        tx.execute(
            &format!(
                "INSERT INTO {} (id, topic_id, post_number, user_id, raw, reply_to_post_number, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                self.table("posts")
            ),
            &[
                &post_id,
                &topic_id.get(),
                &post_number,
                &post.author_id,
                &post.raw,
                &post.reply_to_post_number,
                &post.created_at,
            ],
        )
        .await?;
        tx.execute(
            &format!(
                "UPDATE {} SET highest_post_number = $2, posts_count = posts_count + 1 WHERE id = $1",
                topics
            ),
            &[&topic_id.get(), &post_number],
        )
        .await?;
        self.record_mapping(&tx, EntityKind::Post, source_id, post_id)
            .await?;
        tx.commit().await?;

        Ok(CreatedPost {
            post_id,
            topic_id,
            post_number,
        })
    }

    async fn find_post_number(&self, topic_id: TopicId, post_number: i32) -> Result<Option<i64>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT id FROM {} WHERE topic_id = $1 AND post_number = $2",
            self.table("posts")
        );
        Ok(client
            .query_opt(&sql, &[&topic_id.get(), &post_number])
            .await?
            .map(|row| row.get(0)))
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<CreatedPost>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT topic_id, post_number FROM {} WHERE id = $1",
            self.table("posts")
        );
        Ok(client.query_opt(&sql, &[&post_id]).await?.map(|row| CreatedPost {
            post_id,
            topic_id: TopicId::of_first_post(row.get(0)),
            post_number: row.get(1),
        }))
    }

    async fn create_artifact(
        &self,
        artifact: &CrossRefArtifact,
        source: Option<SourceRef>,
    ) -> Result<ArtifactOutcome> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let label = artifact.label();

        let created: Option<i64> = match artifact {
            CrossRefArtifact::Permalink { url, target } => {
                let (topic_id, post_id) = match target {
                    PermalinkTarget::Topic(topic) => (Some(topic.get()), None),
                    PermalinkTarget::Post(post) => (None, Some(*post)),
                };
                tx.query_opt(
                    &format!(
                        "INSERT INTO {} (url, topic_id, post_id) VALUES ($1, $2, $3) \
                         ON CONFLICT (url) DO NOTHING RETURNING id",
                        self.table("permalinks")
                    ),
                    &[url, &topic_id, &post_id],
                )
                .await?
                .map(|row| row.get(0))
            }
            CrossRefArtifact::Like {
                post_id,
                user_id,
                created_at,
            } => {
                self.require_row(&tx, "posts", *post_id, label).await?;
                self.require_row(&tx, "users", *user_id, label).await?;
                tx.query_opt(
                    &format!(
                        "INSERT INTO {} (post_id, user_id, created_at) \
                         VALUES ($1, $2, COALESCE($3, NOW())) \
                         ON CONFLICT (post_id, user_id) DO NOTHING RETURNING id",
                        self.table("post_likes")
                    ),
                    &[post_id, user_id, created_at],
                )
                .await?
                .map(|row| row.get(0))
            }
            CrossRefArtifact::Reaction {
                post_id,
                user_id,
                identifier,
            } => {
                self.require_row(&tx, "posts", *post_id, label).await?;
                self.require_row(&tx, "users", *user_id, label).await?;
                let id: Option<i64> = tx
                    .query_opt(
                        &format!(
                            "INSERT INTO {} (post_id, user_id, identifier) VALUES ($1, $2, $3) \
                             ON CONFLICT (post_id, user_id, identifier) DO NOTHING RETURNING id",
                            self.table("post_reactions")
                        ),
                        &[post_id, user_id, identifier],
                    )
                    .await?
                    .map(|row| row.get(0));
                if let (Some(id), Some(source)) = (id, source) {
                    self.record_mapping(&tx, source.kind, source.id, id).await?;
                }
                id
            }
            CrossRefArtifact::GroupMembership { user_id, group } => {
                let group_id: i64 = tx
                    .query_opt(
                        &format!("SELECT id FROM {} WHERE name = $1", self.table("groups")),
                        &[group],
                    )
                    .await?
                    .ok_or_else(|| {
                        MigrateError::Validation(format!("group '{}' does not exist", group))
                    })?
                    .get(0);
                self.require_row(&tx, "users", *user_id, label).await?;
                let inserted = tx
                    .execute(
                        &format!(
                            "INSERT INTO {} (group_id, user_id) VALUES ($1, $2) \
                             ON CONFLICT DO NOTHING",
                            self.table("group_users")
                        ),
                        &[&group_id, user_id],
                    )
                    .await?;
                (inserted == 1).then_some(group_id)
            }
        };

        tx.commit().await?;
        Ok(match created {
            Some(id) => ArtifactOutcome::Created(id),
            None => ArtifactOutcome::AlreadyExists,
        })
    }

    async fn close_topic(&self, topic_id: TopicId) -> Result<bool> {
        let client = self.pool.get().await?;
        let topics = self.table("topics");
        let row = client
            .query_opt(
                &format!("SELECT closed FROM {} WHERE id = $1", topics),
                &[&topic_id.get()],
            )
            .await?
            .ok_or_else(|| MigrateError::missing_reference(format!("topic {}", topic_id), "close"))?;
        if row.get::<_, bool>(0) {
            return Ok(false);
        }
        let updated = client
            .execute(
                &format!("UPDATE {} SET closed = TRUE WHERE id = $1 AND NOT closed", topics),
                &[&topic_id.get()],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn apply_settings(&self, settings: &SiteSettings) -> Result<SiteSettings> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let mut previous = SiteSettings::default();
        if let Some(value) = settings.max_likes_per_day {
            let old = self
                .swap_setting(&tx, MAX_LIKES_PER_DAY, value.to_string())
                .await?;
            previous.max_likes_per_day = parse_setting(MAX_LIKES_PER_DAY, old);
        }
        if let Some(value) = settings.rate_limits_enabled {
            let old = self
                .swap_setting(&tx, RATE_LIMITS_ENABLED, value.to_string())
                .await?;
            previous.rate_limits_enabled = parse_setting(RATE_LIMITS_ENABLED, old);
        }
        tx.commit().await?;
        Ok(previous)
    }

    async fn ping(&self) -> Result<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl IdentityBackend for PgTargetStore {
    async fn init_schema(&self) -> Result<()> {
        TargetStore::init_schema(self).await
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<(i64, i64)>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT source_id, target_id FROM {} WHERE kind = $1 ORDER BY source_id",
            self.table("import_ids")
        );
        let rows = client.query(&sql, &[&kind.as_str()]).await?;
        Ok(rows.iter().map(|row| (row.get(0), row.get(1))).collect())
    }

    async fn insert(&self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        self.record_mapping(&tx, kind, source_id, target_id).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE kind = $1",
            self.table("import_ids")
        );
        Ok(client.query_one(&sql, &[&kind.as_str()]).await?.get(0))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("groups"), "\"groups\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting::<i64>("n", Some("50".into())), Some(50));
        assert_eq!(parse_setting::<bool>("b", Some("true".into())), Some(true));
        assert_eq!(parse_setting::<i64>("n", Some("lots".into())), None);
        assert_eq!(parse_setting::<i64>("n", None), None);
    }
}
