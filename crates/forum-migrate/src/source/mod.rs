//! Source (Flarum) store operations.
//!
//! - [`MysqlSource`]: the Flarum MySQL/MariaDB database, read with sqlx
//! - [`MemorySource`]: rows held in memory, for tests
//!
//! Only visible content is read: hidden discussions and posts and non-comment
//! posts (renames, tag changes, ...) never leave the source.

mod memory;
mod mysql;

pub use memory::MemorySource;
pub use mysql::MysqlSource;

use async_trait::async_trait;
use std::fmt;

use crate::batch::{Page, PageRequest};
use crate::error::Result;
use crate::model::{
    DiscussionTag, SourceCategory, SourceDiscussion, SourceGroupMember, SourceLike, SourcePost,
    SourceReaction, SourceUser,
};

/// Countable record sets of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceSet {
    Users,
    Tags,
    Discussions,
    /// Visible comment posts of visible discussions.
    Posts,
    Likes,
    Reactions,
    GroupMembers,
    /// Visible discussions that are locked.
    LockedDiscussions,
}

impl fmt::Display for SourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceSet::Users => "users",
            SourceSet::Tags => "tags",
            SourceSet::Discussions => "discussions",
            SourceSet::Posts => "posts",
            SourceSet::Likes => "likes",
            SourceSet::Reactions => "reactions",
            SourceSet::GroupMembers => "group members",
            SourceSet::LockedDiscussions => "locked discussions",
        })
    }
}

/// Trait for source store operations.
///
/// Paged reads are ordered by a stable key so an interrupted run resumes
/// deterministically. Query failures are logged and read as empty results;
/// only connectivity failures are returned as errors.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Number of records in a set.
    async fn count(&self, set: SourceSet) -> Result<u64>;

    /// Users, by id.
    async fn users(&self, page: PageRequest) -> Result<Page<SourceUser>>;

    /// All tags, by id.
    async fn categories(&self) -> Result<Vec<SourceCategory>>;

    /// Visible discussions, by id.
    async fn discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>>;

    /// Visible comment posts of the given discussions.
    async fn posts_in(&self, discussion_ids: &[i64]) -> Result<Vec<SourcePost>>;

    /// Tags of the given discussions.
    async fn discussion_tags(&self, discussion_ids: &[i64]) -> Result<Vec<DiscussionTag>>;

    /// Post likes, by post then user.
    async fn likes(&self, page: PageRequest) -> Result<Page<SourceLike>>;

    /// Post reactions joined with their reaction type, by id.
    async fn reactions(&self, page: PageRequest) -> Result<Page<SourceReaction>>;

    /// Group memberships, by user then group.
    async fn group_members(&self, page: PageRequest) -> Result<Page<SourceGroupMember>>;

    /// Visible locked discussions, by id.
    async fn locked_discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>>;

    /// Test the connection.
    async fn ping(&self) -> Result<()>;

    /// Get the store type.
    fn store_type(&self) -> &'static str;
}
