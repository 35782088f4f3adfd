//! Flarum source reader for MySQL/MariaDB.
//!
//! Uses SQLx for connection pooling and async query execution. Integer
//! columns are CAST to SIGNED and text columns to CHAR so that decoding does
//! not depend on the exact column types of a given Flarum install.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::{SourceSet, SourceStore};
use crate::batch::{Page, PageRequest};
use crate::config::SourceConfig;
use crate::error::{is_source_connectivity, MigrateError, Result};
use crate::model::{
    DiscussionTag, SourceCategory, SourceDiscussion, SourceGroupMember, SourceLike, SourcePost,
    SourceReaction, SourceUser,
};

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const DISCUSSION_COLUMNS: &str = "CAST(id AS SIGNED) AS id, \
     CAST(title AS CHAR) AS title, \
     CAST(slug AS CHAR) AS slug, \
     CAST(first_post_id AS SIGNED) AS first_post_id, \
     CAST(is_sticky AS SIGNED) AS is_sticky, \
     CAST(is_locked AS SIGNED) AS is_locked, \
     CAST(is_private AS SIGNED) AS is_private";

/// Flarum database reader.
pub struct MysqlSource {
    pool: MySqlPool,
    config: SourceConfig,
}

impl MysqlSource {
    /// Connect to the Flarum database.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let ssl_mode = match config.ssl_mode.to_ascii_lowercase().as_str() {
            "disabled" => MySqlSslMode::Disabled,
            "required" => MySqlSslMode::Required,
            _ => MySqlSslMode::Preferred,
        };

        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .charset("utf8mb4")
            .ssl_mode(ssl_mode);

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "creating Flarum source pool"))?;

        let source = Self {
            pool,
            config: config.clone(),
        };
        source.ping().await?;

        info!(
            "Connected to Flarum source: {}:{}/{} (table prefix '{}')",
            config.host, config.port, config.database, config.table_prefix
        );

        Ok(source)
    }

    /// Quoted, prefixed table name.
    fn table(&self, name: &str) -> String {
        format!("`{}`", self.config.table(name))
    }

    /// Run a query, treating failures other than connectivity as no rows.
    async fn fetch(&self, what: &str, query: MySqlQuery<'_>) -> Result<Vec<MySqlRow>> {
        match query.fetch_all(&self.pool).await {
            Ok(rows) => Ok(rows),
            Err(e) if is_source_connectivity(&e) => Err(MigrateError::Source(e)),
            Err(e) => {
                warn!("Source query for {} failed, reading it as empty: {}", what, e);
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_page<T>(
        &self,
        what: &str,
        sql: &str,
        page: PageRequest,
        decode: fn(&MySqlRow) -> std::result::Result<T, sqlx::Error>,
    ) -> Result<Page<T>> {
        let query = sqlx::query(sql)
            .bind(page.limit as u64)
            .bind(page.offset as u64);
        let rows = self.fetch(what, query).await?;
        Ok(Page {
            rows: rows.len(),
            items: decode_rows(what, &rows, decode),
        })
    }

    /// Run `sql` with a `{ids}` placeholder expanded to one bind per id.
    async fn fetch_for_ids<T>(
        &self,
        what: &str,
        sql: &str,
        ids: &[i64],
        decode: fn(&MySqlRow) -> std::result::Result<T, sqlx::Error>,
    ) -> Result<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = sql.replace("{ids}", &placeholders);
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(*id);
        }
        let rows = self.fetch(what, query).await?;
        Ok(decode_rows(what, &rows, decode))
    }

    fn count_sql(&self, set: SourceSet) -> String {
        match set {
            SourceSet::Users => format!("SELECT COUNT(*) FROM {}", self.table("users")),
            SourceSet::Tags => format!("SELECT COUNT(*) FROM {}", self.table("tags")),
            SourceSet::Discussions => format!(
                "SELECT COUNT(*) FROM {} WHERE hidden_at IS NULL",
                self.table("discussions")
            ),
            SourceSet::Posts => format!(
                "SELECT COUNT(*) FROM {} p JOIN {} d ON d.id = p.discussion_id \
                 WHERE p.type = 'comment' AND p.hidden_at IS NULL AND d.hidden_at IS NULL",
                self.table("posts"),
                self.table("discussions")
            ),
            SourceSet::Likes => format!("SELECT COUNT(*) FROM {}", self.table("post_likes")),
            SourceSet::Reactions => format!(
                "SELECT COUNT(*) FROM {} pr JOIN {} r ON pr.reaction_id = r.id",
                self.table("post_reactions"),
                self.table("reactions")
            ),
            SourceSet::GroupMembers => format!(
                "SELECT COUNT(*) FROM {} gu JOIN {} g ON gu.group_id = g.id",
                self.table("group_user"),
                self.table("groups")
            ),
            SourceSet::LockedDiscussions => format!(
                "SELECT COUNT(*) FROM {} WHERE is_locked = 1 AND hidden_at IS NULL",
                self.table("discussions")
            ),
        }
    }
}

#[async_trait]
impl SourceStore for MysqlSource {
    async fn count(&self, set: SourceSet) -> Result<u64> {
        let sql = self.count_sql(set);
        let rows = self.fetch(&set.to_string(), sqlx::query(&sql)).await?;
        let count = rows
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok())
            .unwrap_or(0);
        debug!("Source has {} {}", count, set);
        Ok(count.max(0) as u64)
    }

    async fn users(&self, page: PageRequest) -> Result<Page<SourceUser>> {
        let sql = format!(
            "SELECT CAST(id AS SIGNED) AS id, \
                    CAST(username AS CHAR) AS username, \
                    CAST(nickname AS CHAR) AS nickname, \
                    CAST(email AS CHAR) AS email, \
                    joined_at, last_seen_at, \
                    CAST(is_email_confirmed AS SIGNED) AS is_email_confirmed, \
                    suspended_until, \
                    CAST(bio AS CHAR) AS bio, \
                    CAST(avatar_url AS CHAR) AS avatar_url \
             FROM {} ORDER BY id LIMIT ? OFFSET ?",
            self.table("users")
        );
        self.fetch_page("users", &sql, page, decode_user).await
    }

    async fn categories(&self) -> Result<Vec<SourceCategory>> {
        let sql = format!(
            "SELECT CAST(id AS SIGNED) AS id, \
                    CAST(name AS CHAR) AS name, \
                    CAST(slug AS CHAR) AS slug, \
                    CAST(position AS SIGNED) AS position, \
                    CAST(description AS CHAR) AS description, \
                    CAST(color AS CHAR) AS color, \
                    CAST(parent_id AS SIGNED) AS parent_id, \
                    CAST(is_restricted AS SIGNED) AS is_restricted, \
                    CAST(icon AS CHAR) AS icon, \
                    created_at, updated_at \
             FROM {} ORDER BY id",
            self.table("tags")
        );
        let rows = self.fetch("tags", sqlx::query(&sql)).await?;
        Ok(decode_rows("tags", &rows, decode_category))
    }

    async fn discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE hidden_at IS NULL ORDER BY id LIMIT ? OFFSET ?",
            DISCUSSION_COLUMNS,
            self.table("discussions")
        );
        self.fetch_page("discussions", &sql, page, decode_discussion)
            .await
    }

    async fn posts_in(&self, discussion_ids: &[i64]) -> Result<Vec<SourcePost>> {
        let sql = format!(
            "SELECT CAST(p.id AS SIGNED) AS id, \
                    CAST(p.discussion_id AS SIGNED) AS discussion_id, \
                    CAST(d.first_post_id AS SIGNED) AS first_post_id, \
                    CAST(p.user_id AS SIGNED) AS user_id, \
                    CAST(p.content AS CHAR) AS content, \
                    p.created_at AS created_at, \
                    CAST(p.number AS SIGNED) AS number \
             FROM {} p JOIN {} d ON d.id = p.discussion_id \
             WHERE p.type = 'comment' AND p.hidden_at IS NULL AND p.discussion_id IN ({{ids}}) \
             ORDER BY p.discussion_id, p.created_at, p.id",
            self.table("posts"),
            self.table("discussions")
        );
        self.fetch_for_ids("posts", &sql, discussion_ids, decode_post)
            .await
    }

    async fn discussion_tags(&self, discussion_ids: &[i64]) -> Result<Vec<DiscussionTag>> {
        let sql = format!(
            "SELECT CAST(discussion_id AS SIGNED) AS discussion_id, \
                    CAST(tag_id AS SIGNED) AS tag_id \
             FROM {} WHERE discussion_id IN ({{ids}}) ORDER BY discussion_id, tag_id",
            self.table("discussion_tag")
        );
        self.fetch_for_ids("discussion tags", &sql, discussion_ids, |row| {
            Ok(DiscussionTag {
                discussion_id: row.try_get("discussion_id")?,
                tag_id: row.try_get("tag_id")?,
            })
        })
        .await
    }

    async fn likes(&self, page: PageRequest) -> Result<Page<SourceLike>> {
        let sql = format!(
            "SELECT CAST(post_id AS SIGNED) AS post_id, \
                    CAST(user_id AS SIGNED) AS user_id, \
                    created_at \
             FROM {} ORDER BY post_id, user_id LIMIT ? OFFSET ?",
            self.table("post_likes")
        );
        self.fetch_page("likes", &sql, page, |row| {
            Ok(SourceLike {
                post_id: row.try_get("post_id")?,
                user_id: row.try_get("user_id")?,
                created_at: optional_time(row, "created_at"),
            })
        })
        .await
    }

    async fn reactions(&self, page: PageRequest) -> Result<Page<SourceReaction>> {
        // A post reaction references its reaction type through reaction_id.
        let sql = format!(
            "SELECT CAST(pr.id AS SIGNED) AS id, \
                    CAST(pr.post_id AS SIGNED) AS post_id, \
                    CAST(pr.user_id AS SIGNED) AS user_id, \
                    CAST(r.identifier AS CHAR) AS identifier \
             FROM {} pr JOIN {} r ON pr.reaction_id = r.id \
             ORDER BY pr.id LIMIT ? OFFSET ?",
            self.table("post_reactions"),
            self.table("reactions")
        );
        self.fetch_page("reactions", &sql, page, |row| {
            Ok(SourceReaction {
                id: row.try_get("id")?,
                post_id: row.try_get("post_id")?,
                user_id: row.try_get("user_id")?,
                identifier: row.try_get("identifier")?,
            })
        })
        .await
    }

    async fn group_members(&self, page: PageRequest) -> Result<Page<SourceGroupMember>> {
        let sql = format!(
            "SELECT CAST(gu.user_id AS SIGNED) AS user_id, \
                    CAST(g.name_singular AS CHAR) AS group_name \
             FROM {} gu JOIN {} g ON gu.group_id = g.id \
             ORDER BY gu.user_id, gu.group_id LIMIT ? OFFSET ?",
            self.table("group_user"),
            self.table("groups")
        );
        self.fetch_page("group members", &sql, page, |row| {
            Ok(SourceGroupMember {
                user_id: row.try_get("user_id")?,
                group_name: row.try_get("group_name")?,
            })
        })
        .await
    }

    async fn locked_discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE is_locked = 1 AND hidden_at IS NULL \
             ORDER BY id LIMIT ? OFFSET ?",
            DISCUSSION_COLUMNS,
            self.table("discussions")
        );
        self.fetch_page("locked discussions", &sql, page, decode_discussion)
            .await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "testing Flarum source connection"))?;
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "mysql"
    }
}

/// Decode rows, logging and dropping those that fail.
fn decode_rows<T>(
    what: &str,
    rows: &[MySqlRow],
    decode: fn(&MySqlRow) -> std::result::Result<T, sqlx::Error>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| match decode(row) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping undecodable {} row: {}", what, e);
                None
            }
        })
        .collect()
}

/// A nullable timestamp. Zero dates and other undecodable values read as absent.
fn optional_time(row: &MySqlRow, column: &str) -> Option<DateTime<Utc>> {
    row.try_get::<Option<DateTime<Utc>>, _>(column)
        .ok()
        .flatten()
}

fn flag(row: &MySqlRow, column: &str) -> std::result::Result<bool, sqlx::Error> {
    Ok(row.try_get::<Option<i64>, _>(column)?.unwrap_or(0) != 0)
}

fn decode_user(row: &MySqlRow) -> std::result::Result<SourceUser, sqlx::Error> {
    Ok(SourceUser {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        nickname: row.try_get("nickname")?,
        email: row.try_get("email")?,
        joined_at: optional_time(row, "joined_at"),
        last_seen_at: optional_time(row, "last_seen_at"),
        is_email_confirmed: flag(row, "is_email_confirmed")?,
        suspended_until: optional_time(row, "suspended_until"),
        bio: row.try_get("bio")?,
        avatar_url: row.try_get("avatar_url")?,
    })
}

fn decode_category(row: &MySqlRow) -> std::result::Result<SourceCategory, sqlx::Error> {
    Ok(SourceCategory {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        position: row
            .try_get::<Option<i64>, _>("position")?
            .and_then(|p| i32::try_from(p).ok()),
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        parent_id: row.try_get("parent_id")?,
        is_restricted: flag(row, "is_restricted")?,
        icon: row.try_get("icon")?,
        created_at: optional_time(row, "created_at"),
        updated_at: optional_time(row, "updated_at"),
    })
}

fn decode_discussion(row: &MySqlRow) -> std::result::Result<SourceDiscussion, sqlx::Error> {
    Ok(SourceDiscussion {
        id: row.try_get("id")?,
        title: row.try_get::<Option<String>, _>("title")?.unwrap_or_default(),
        slug: row.try_get::<Option<String>, _>("slug")?.unwrap_or_default(),
        first_post_id: row.try_get("first_post_id")?,
        is_sticky: flag(row, "is_sticky")?,
        is_locked: flag(row, "is_locked")?,
        is_private: flag(row, "is_private")?,
    })
}

fn decode_post(row: &MySqlRow) -> std::result::Result<SourcePost, sqlx::Error> {
    Ok(SourcePost {
        id: row.try_get("id")?,
        discussion_id: row.try_get("discussion_id")?,
        first_post_id: row.try_get("first_post_id")?,
        user_id: row.try_get("user_id")?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
        number: row
            .try_get::<Option<i64>, _>("number")?
            .and_then(|n| i32::try_from(n).ok()),
    })
}
