//! Rows read from the Flarum database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Flarum user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceUser {
    pub id: i64,
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub is_email_confirmed: bool,
    pub suspended_until: Option<DateTime<Utc>>,
    pub bio: Option<String>,
    /// File name relative to the uploads directory.
    pub avatar_url: Option<String>,
}

/// A Flarum tag, imported as a category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceCategory {
    pub id: i64,
    pub name: String,
    pub slug: Option<String>,
    pub position: Option<i32>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub parent_id: Option<i64>,
    pub is_restricted: bool,
    pub icon: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A visible Flarum discussion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceDiscussion {
    pub id: i64,
    pub title: String,
    pub slug: String,
    /// Declared first post; may be absent or point at a hidden post.
    pub first_post_id: Option<i64>,
    pub is_sticky: bool,
    pub is_locked: bool,
    pub is_private: bool,
}

/// A visible comment post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcePost {
    pub id: i64,
    pub discussion_id: i64,
    /// The owning discussion's declared first post.
    pub first_post_id: Option<i64>,
    pub user_id: Option<i64>,
    /// Raw s9e XML body.
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Ordinal within the discussion.
    pub number: Option<i32>,
}

/// A row of the discussion/tag join table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscussionTag {
    pub discussion_id: i64,
    pub tag_id: i64,
}

/// A row of the post likes join table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceLike {
    pub post_id: i64,
    pub user_id: i64,
    pub created_at: Option<DateTime<Utc>>,
}

/// A post reaction joined with its reaction type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReaction {
    /// Id of the post reaction row.
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    /// Emoji identifier of the reaction type.
    pub identifier: String,
}

/// A user's membership in a named group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceGroupMember {
    pub user_id: i64,
    pub group_name: String,
}
