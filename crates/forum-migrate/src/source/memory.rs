//! Flarum rows held in memory.

use async_trait::async_trait;

use super::{SourceSet, SourceStore};
use crate::batch::{Page, PageRequest};
use crate::error::Result;
use crate::model::{
    DiscussionTag, SourceCategory, SourceDiscussion, SourceGroupMember, SourceLike, SourcePost,
    SourceReaction, SourceUser,
};

/// A source whose tables are plain vectors.
///
/// Reads apply the same visibility rules and orderings as the MySQL reader,
/// except that hidden rows are simply never added.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    pub users: Vec<SourceUser>,
    pub categories: Vec<SourceCategory>,
    pub discussions: Vec<SourceDiscussion>,
    pub posts: Vec<SourcePost>,
    pub discussion_tags: Vec<DiscussionTag>,
    pub likes: Vec<SourceLike>,
    pub reactions: Vec<SourceReaction>,
    pub group_members: Vec<SourceGroupMember>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_discussions(&self) -> Vec<SourceDiscussion> {
        let mut discussions = self.discussions.clone();
        discussions.sort_by_key(|d| d.id);
        discussions
    }

    fn locked(&self) -> Vec<SourceDiscussion> {
        self.sorted_discussions()
            .into_iter()
            .filter(|d| d.is_locked)
            .collect()
    }

    /// Posts whose discussion exists.
    fn visible_posts(&self) -> impl Iterator<Item = &SourcePost> + '_ {
        self.posts
            .iter()
            .filter(|p| self.discussions.iter().any(|d| d.id == p.discussion_id))
    }
}

fn slice<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let start = page.offset.min(items.len());
    let end = start.saturating_add(page.limit).min(items.len());
    Page::of(items[start..end].to_vec())
}

#[async_trait]
impl SourceStore for MemorySource {
    async fn count(&self, set: SourceSet) -> Result<u64> {
        let count = match set {
            SourceSet::Users => self.users.len(),
            SourceSet::Tags => self.categories.len(),
            SourceSet::Discussions => self.discussions.len(),
            SourceSet::Posts => self.visible_posts().count(),
            SourceSet::Likes => self.likes.len(),
            SourceSet::Reactions => self.reactions.len(),
            SourceSet::GroupMembers => self.group_members.len(),
            SourceSet::LockedDiscussions => self.discussions.iter().filter(|d| d.is_locked).count(),
        };
        Ok(count as u64)
    }

    async fn users(&self, page: PageRequest) -> Result<Page<SourceUser>> {
        let mut users = self.users.clone();
        users.sort_by_key(|u| u.id);
        Ok(slice(&users, page))
    }

    async fn categories(&self) -> Result<Vec<SourceCategory>> {
        let mut categories = self.categories.clone();
        categories.sort_by_key(|c| c.id);
        Ok(categories)
    }

    async fn discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>> {
        Ok(slice(&self.sorted_discussions(), page))
    }

    async fn posts_in(&self, discussion_ids: &[i64]) -> Result<Vec<SourcePost>> {
        let mut posts: Vec<SourcePost> = self
            .visible_posts()
            .filter(|p| discussion_ids.contains(&p.discussion_id))
            .map(|p| {
                let mut post = p.clone();
                post.first_post_id = self
                    .discussions
                    .iter()
                    .find(|d| d.id == p.discussion_id)
                    .and_then(|d| d.first_post_id);
                post
            })
            .collect();
        posts.sort_by_key(|p| (p.discussion_id, p.created_at, p.id));
        Ok(posts)
    }

    async fn discussion_tags(&self, discussion_ids: &[i64]) -> Result<Vec<DiscussionTag>> {
        let mut tags: Vec<DiscussionTag> = self
            .discussion_tags
            .iter()
            .filter(|t| discussion_ids.contains(&t.discussion_id))
            .copied()
            .collect();
        tags.sort_by_key(|t| (t.discussion_id, t.tag_id));
        Ok(tags)
    }

    async fn likes(&self, page: PageRequest) -> Result<Page<SourceLike>> {
        let mut likes = self.likes.clone();
        likes.sort_by_key(|l| (l.post_id, l.user_id));
        Ok(slice(&likes, page))
    }

    async fn reactions(&self, page: PageRequest) -> Result<Page<SourceReaction>> {
        let mut reactions = self.reactions.clone();
        reactions.sort_by_key(|r| r.id);
        Ok(slice(&reactions, page))
    }

    async fn group_members(&self, page: PageRequest) -> Result<Page<SourceGroupMember>> {
        let mut members = self.group_members.clone();
        members.sort_by(|a, b| {
            a.user_id
                .cmp(&b.user_id)
                .then_with(|| a.group_name.cmp(&b.group_name))
        });
        Ok(slice(&members, page))
    }

    async fn locked_discussions(&self, page: PageRequest) -> Result<Page<SourceDiscussion>> {
        Ok(slice(&self.locked(), page))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
