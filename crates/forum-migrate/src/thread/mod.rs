//! Thread reconstruction for one discussion.
//!
//! Flarum records the first post on the discussion row, and that pointer is
//! not always usable: it may be null, or it may name a post that is hidden or
//! deleted and therefore not part of the export. Reconstruction falls back to
//! the oldest post of the group (smallest id) so every non-empty discussion
//! has a first post.

use std::collections::HashSet;

use crate::model::SourcePost;

/// Normalized thread position of one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadEntry {
    pub post_id: i64,
    /// Corrected first-post pointer; always a member of the group.
    pub first_post_id: i64,
    pub is_first: bool,
    /// Source ordinal, used as the requested reply sequence.
    pub post_number: Option<i32>,
}

/// The normalized posts of one discussion.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    entries: Vec<ThreadEntry>,
}

impl Thread {
    /// Entries in processing order: first posts, then by creation time and id.
    pub fn entries(&self) -> &[ThreadEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, post_id: i64) -> Option<&ThreadEntry> {
        self.entries.iter().find(|e| e.post_id == post_id)
    }
}

/// Reconstruct the thread of a group of posts from one discussion.
pub fn reconstruct(posts: &[SourcePost]) -> Thread {
    let Some(candidate_first) = posts.iter().map(|p| p.id).min() else {
        return Thread::default();
    };
    let ids: HashSet<i64> = posts.iter().map(|p| p.id).collect();

    let mut ordered: Vec<&SourcePost> = posts.iter().collect();
    ordered.sort_by_key(|p| (p.created_at, p.id));

    let mut entries: Vec<ThreadEntry> = ordered
        .into_iter()
        .map(|post| {
            let first_post_id = match post.first_post_id {
                Some(id) if ids.contains(&id) => id,
                _ => candidate_first,
            };
            ThreadEntry {
                post_id: post.id,
                first_post_id,
                is_first: post.id == first_post_id,
                post_number: post.number,
            }
        })
        .collect();

    // Stable sort keeps the time order within each half.
    entries.sort_by_key(|entry| !entry.is_first);

    Thread { entries }
}
