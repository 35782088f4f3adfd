//! Drafts handed to the target store and the records it returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TopicId;

/// A user to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub created_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub suspended_till: Option<DateTime<Utc>>,
    pub bio_raw: Option<String>,
    pub approved: bool,
}

/// Username and display name of an existing target user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserName {
    pub username: String,
    pub name: Option<String>,
}

/// A category to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub slug: Option<String>,
    pub position: Option<i32>,
    pub description: Option<String>,
    /// Six hex digits, no leading `#`.
    pub color: Option<String>,
    pub parent_category_id: Option<i64>,
    pub read_restricted: bool,
    pub icon: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Topic attributes carried by a topic's first post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicAttrs {
    pub title: String,
    pub category_id: Option<i64>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub visible: bool,
    pub closed: bool,
}

/// Where a new post goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PostPlacement {
    /// First post of a new topic.
    NewTopic(TopicAttrs),
    /// Reply in an existing topic, asking for the given ordinal.
    Reply {
        topic_id: TopicId,
        post_number: Option<i32>,
    },
}

/// A post to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPost {
    pub author_id: i64,
    pub raw: String,
    pub created_at: DateTime<Utc>,
    pub reply_to_post_number: Option<i32>,
    pub placement: PostPlacement,
}

impl NewPost {
    pub fn is_first_post(&self) -> bool {
        matches!(self.placement, PostPlacement::NewTopic(_))
    }
}

/// A post as created by the target store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub post_id: i64,
    pub topic_id: TopicId,
    pub post_number: i32,
}

/// Where a permalink points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermalinkTarget {
    Topic(TopicId),
    Post(i64),
}

/// Side artifacts that reference already-created entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CrossRefArtifact {
    Permalink {
        url: String,
        target: PermalinkTarget,
    },
    Like {
        post_id: i64,
        user_id: i64,
        created_at: Option<DateTime<Utc>>,
    },
    Reaction {
        post_id: i64,
        user_id: i64,
        identifier: String,
    },
    GroupMembership {
        user_id: i64,
        group: String,
    },
}

impl CrossRefArtifact {
    pub fn label(&self) -> &'static str {
        match self {
            CrossRefArtifact::Permalink { .. } => "permalink",
            CrossRefArtifact::Like { .. } => "like",
            CrossRefArtifact::Reaction { .. } => "reaction",
            CrossRefArtifact::GroupMembership { .. } => "group membership",
        }
    }
}

/// Result of creating an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactOutcome {
    Created(i64),
    AlreadyExists,
}

/// Site-wide settings the import relaxes around some passes.
///
/// `None` leaves a setting untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_likes_per_day: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits_enabled: Option<bool>,
}

impl SiteSettings {
    pub fn is_empty(&self) -> bool {
        self.max_likes_per_day.is_none() && self.rate_limits_enabled.is_none()
    }
}
