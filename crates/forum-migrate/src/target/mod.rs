//! Target (Discourse-shaped) store operations.
//!
//! The engine creates everything through [`TargetStore`]. Each create call
//! that maps a source record takes that record's source id, so a store can
//! write the identity mapping in the same transaction as the entity.
//!
//! - [`PgTargetStore`]: PostgreSQL via deadpool-postgres
//! - [`MemoryTargetStore`]: in process, for dry runs and tests

mod memory;
mod postgres;
mod tls;

pub use memory::{MemoryTargetStore, StoredPost};
pub use postgres::PgTargetStore;
pub use tls::{SslMode, TlsBuilder};

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::model::{
    ArtifactOutcome, CreatedPost, CrossRefArtifact, NewCategory, NewPost, NewUser, SiteSettings,
    SourceRef, TopicId, UserName,
};

/// Trait for target store operations.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Create the store's tables if they don't exist.
    async fn init_schema(&self) -> Result<()>;

    /// Create a user imported from a source user.
    async fn create_user(&self, source_id: i64, user: &NewUser) -> Result<i64>;

    /// Find a user by username, case-insensitively, or create it.
    ///
    /// Used for users that have no source record, such as the guest.
    async fn ensure_user(&self, user: &NewUser) -> Result<i64>;

    /// Usernames and display names of every existing user.
    async fn list_users(&self) -> Result<Vec<UserName>>;

    /// Attach an avatar file to a user.
    async fn upload_avatar(&self, user_id: i64, path: &Path) -> Result<()>;

    /// Create a category imported from a source tag.
    async fn create_category(&self, source_id: i64, category: &NewCategory) -> Result<i64>;

    /// Create a post imported from a source post, and its topic for first posts.
    ///
    /// A reply receives an ordinal following [`crate::model::next_post_number`].
    async fn create_post(&self, source_id: i64, post: &NewPost) -> Result<CreatedPost>;

    /// Target id of the post with the given ordinal in a topic.
    async fn find_post_number(&self, topic_id: TopicId, post_number: i32) -> Result<Option<i64>>;

    /// Topic and ordinal of a stored post.
    async fn find_post(&self, post_id: i64) -> Result<Option<CreatedPost>>;

    /// Record a cross-reference artifact.
    ///
    /// `source` is given for artifacts that carry an identity mapping.
    /// Recording an artifact that already exists is not an error.
    async fn create_artifact(
        &self,
        artifact: &CrossRefArtifact,
        source: Option<SourceRef>,
    ) -> Result<ArtifactOutcome>;

    /// Close a topic. Returns false when it was already closed.
    async fn close_topic(&self, topic_id: TopicId) -> Result<bool>;

    /// Apply site settings, returning the previous values of those changed.
    async fn apply_settings(&self, settings: &SiteSettings) -> Result<SiteSettings>;

    /// Test the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the store type.
    fn store_type(&self) -> &'static str;
}

/// Run `f` with `settings` applied, restoring the previous values afterwards
/// whether or not `f` succeeds.
pub async fn with_settings<T, F, Fut>(
    target: &dyn TargetStore,
    settings: &SiteSettings,
    f: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    if settings.is_empty() {
        return f().await;
    }

    let previous = target.apply_settings(settings).await?;
    tracing::debug!("Applied scoped site settings {:?}", settings);

    let result = f().await;

    match target.apply_settings(&previous).await {
        Ok(_) => tracing::debug!("Restored site settings {:?}", previous),
        Err(e) if result.is_ok() => return Err(e),
        Err(e) => tracing::warn!("Failed to restore site settings {:?}: {}", previous, e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;

    fn raised() -> SiteSettings {
        SiteSettings {
            max_likes_per_day: Some(5_000_000),
            rate_limits_enabled: None,
        }
    }

    #[tokio::test]
    async fn test_with_settings_restores_after_success() {
        let store = MemoryTargetStore::new();
        let before = store.settings().await;

        let seen = with_settings(&store, &raised(), || async {
            Ok(store.settings().await.max_likes_per_day)
        })
        .await
        .unwrap();

        assert_eq!(seen, Some(5_000_000));
        assert_eq!(store.settings().await, before);
    }

    #[tokio::test]
    async fn test_with_settings_restores_after_failure() {
        let store = MemoryTargetStore::new();
        let before = store.settings().await;

        let result: Result<()> = with_settings(&store, &raised(), || async {
            Err(MigrateError::Validation("boom".into()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(store.settings().await, before);
    }
}
