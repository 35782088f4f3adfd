//! Entity model shared by the source reader, the engine and the target writer.
//!
//! - [`source`]: immutable rows read from the Flarum database
//! - [`target`]: drafts handed to the target store and what it hands back

pub mod source;
pub mod target;

pub use source::*;
pub use target::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MigrateError, Result};

/// Kinds of entity that carry an identity mapping.
///
/// Topics have no kind of their own: a topic is identified by its first post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Category,
    Post,
    Reaction,
}

impl EntityKind {
    /// All kinds, in import order.
    pub const ALL: [EntityKind; 4] = [
        EntityKind::User,
        EntityKind::Category,
        EntityKind::Post,
        EntityKind::Reaction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Category => "category",
            EntityKind::Post => "post",
            EntityKind::Reaction => "reaction",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(EntityKind::User),
            "category" => Ok(EntityKind::Category),
            "post" => Ok(EntityKind::Post),
            "reaction" => Ok(EntityKind::Reaction),
            _ => Err(MigrateError::Config(format!("Invalid entity kind: {}", s))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The source row a target entity is created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl SourceRef {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Identifier of a target topic.
///
/// The target platform uses one id space for topics and their first posts,
/// so a `TopicId` can only be obtained from a first post's target id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicId(i64);

impl TopicId {
    /// The topic whose first post has this target id.
    pub fn of_first_post(post_id: i64) -> Self {
        TopicId(post_id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordinal for the next post of a topic whose highest ordinal is `highest`.
///
/// Ordinals start at 1 and strictly increase. A requested ordinal is kept when
/// it preserves that, otherwise the post is appended. An empty topic always
/// starts at 1.
pub fn next_post_number(highest: i32, requested: Option<i32>) -> i32 {
    match requested {
        Some(n) if highest > 0 && n > highest => n,
        _ => highest + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(EntityKind::parse("topic").is_err());
    }

    #[test]
    fn test_topic_id_is_first_post_id() {
        assert_eq!(TopicId::of_first_post(42).get(), 42);
    }

    #[test]
    fn test_first_post_gets_one() {
        assert_eq!(next_post_number(0, None), 1);
        assert_eq!(next_post_number(0, Some(3)), 1);
    }

    #[test]
    fn test_requested_number_kept_when_increasing() {
        assert_eq!(next_post_number(1, Some(2)), 2);
        assert_eq!(next_post_number(2, Some(7)), 7);
    }

    #[test]
    fn test_requested_number_appended_when_not_increasing() {
        assert_eq!(next_post_number(5, Some(5)), 6);
        assert_eq!(next_post_number(5, Some(2)), 6);
        assert_eq!(next_post_number(5, None), 6);
    }
}
