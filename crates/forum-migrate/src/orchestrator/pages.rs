//! Paging adapters between the source store and the batch runner.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::batch::{Page, PageRequest, PageSource};
use crate::error::Result;
use crate::model::{
    SourceDiscussion, SourceGroupMember, SourceLike, SourcePost, SourceReaction, SourceUser,
};
use crate::source::{SourceSet, SourceStore};
use crate::thread::{self, ThreadEntry};

/// Row types the source hands out page by page.
#[async_trait]
pub(crate) trait PagedRows: Sized + Send + Sync + 'static {
    const SET: SourceSet;

    async fn fetch(source: &dyn SourceStore, page: PageRequest) -> Result<Page<Self>>;
}

#[async_trait]
impl PagedRows for SourceUser {
    const SET: SourceSet = SourceSet::Users;

    async fn fetch(source: &dyn SourceStore, page: PageRequest) -> Result<Page<Self>> {
        source.users(page).await
    }
}

#[async_trait]
impl PagedRows for SourceLike {
    const SET: SourceSet = SourceSet::Likes;

    async fn fetch(source: &dyn SourceStore, page: PageRequest) -> Result<Page<Self>> {
        source.likes(page).await
    }
}

#[async_trait]
impl PagedRows for SourceReaction {
    const SET: SourceSet = SourceSet::Reactions;

    async fn fetch(source: &dyn SourceStore, page: PageRequest) -> Result<Page<Self>> {
        source.reactions(page).await
    }
}

#[async_trait]
impl PagedRows for SourceGroupMember {
    const SET: SourceSet = SourceSet::GroupMembers;

    async fn fetch(source: &dyn SourceStore, page: PageRequest) -> Result<Page<Self>> {
        source.group_members(page).await
    }
}

/// Pages over one source record set.
pub(crate) struct SetPages<'a, T> {
    source: &'a dyn SourceStore,
    rows: PhantomData<fn() -> T>,
}

impl<'a, T> SetPages<'a, T> {
    pub fn new(source: &'a dyn SourceStore) -> Self {
        Self {
            source,
            rows: PhantomData,
        }
    }
}

#[async_trait]
impl<T: PagedRows> PageSource for SetPages<'_, T> {
    type Item = T;

    async fn total(&mut self) -> Result<u64> {
        self.source.count(T::SET).await
    }

    async fn fetch(&mut self, page: PageRequest) -> Result<Page<T>> {
        T::fetch(self.source, page).await
    }
}

/// Visible locked discussions.
pub(crate) struct LockedPages<'a> {
    source: &'a dyn SourceStore,
}

impl<'a> LockedPages<'a> {
    pub fn new(source: &'a dyn SourceStore) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PageSource for LockedPages<'_> {
    type Item = SourceDiscussion;

    async fn total(&mut self) -> Result<u64> {
        self.source.count(SourceSet::LockedDiscussions).await
    }

    async fn fetch(&mut self, page: PageRequest) -> Result<Page<SourceDiscussion>> {
        self.source.locked_discussions(page).await
    }
}

/// A post with its thread position and its discussion.
#[derive(Debug, Clone)]
pub(crate) struct ThreadedPost {
    pub post: SourcePost,
    pub entry: ThreadEntry,
    pub discussion: Arc<SourceDiscussion>,
    /// Tag ids of the discussion.
    pub tags: Arc<Vec<i64>>,
}

/// Posts, paged by discussion so that a thread is never split across pages.
///
/// Each page covers `limit` discussions and yields all of their posts in
/// processing order: discussions by id, and within a discussion the first
/// post before its replies.
pub(crate) struct ThreadPages<'a> {
    source: &'a dyn SourceStore,
}

impl<'a> ThreadPages<'a> {
    pub fn new(source: &'a dyn SourceStore) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PageSource for ThreadPages<'_> {
    type Item = ThreadedPost;

    async fn total(&mut self) -> Result<u64> {
        self.source.count(SourceSet::Posts).await
    }

    async fn fetch(&mut self, page: PageRequest) -> Result<Page<ThreadedPost>> {
        let discussions = self.source.discussions(page).await?;
        if discussions.is_empty() {
            return Ok(Page::default());
        }

        let ids: Vec<i64> = discussions.items.iter().map(|d| d.id).collect();
        let posts = self.source.posts_in(&ids).await?;
        let tags = self.source.discussion_tags(&ids).await?;

        let mut items = Vec::with_capacity(posts.len());
        for discussion in discussions.items {
            let group: Vec<SourcePost> = posts
                .iter()
                .filter(|p| p.discussion_id == discussion.id)
                .cloned()
                .collect();
            let thread = thread::reconstruct(&group);
            if thread.is_empty() {
                continue;
            }

            let discussion = Arc::new(discussion);
            let tag_ids: Arc<Vec<i64>> = Arc::new(
                tags.iter()
                    .filter(|t| t.discussion_id == discussion.id)
                    .map(|t| t.tag_id)
                    .collect(),
            );
            for entry in thread.entries() {
                let Some(post) = group.iter().find(|p| p.id == entry.post_id) else {
                    continue;
                };
                items.push(ThreadedPost {
                    post: post.clone(),
                    entry: *entry,
                    discussion: Arc::clone(&discussion),
                    tags: Arc::clone(&tag_ids),
                });
            }
        }

        Ok(Page {
            rows: discussions.rows,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DiscussionTag;
    use crate::source::MemorySource;
    use chrono::{TimeZone, Utc};

    fn discussion(id: i64, first_post_id: Option<i64>) -> SourceDiscussion {
        SourceDiscussion {
            id,
            title: format!("Discussion {}", id),
            slug: format!("discussion-{}", id),
            first_post_id,
            ..Default::default()
        }
    }

    fn post(id: i64, discussion_id: i64, minute: u32) -> SourcePost {
        SourcePost {
            id,
            discussion_id,
            created_at: Utc.with_ymd_and_hms(2022, 3, 1, 9, minute, 0).unwrap(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_thread_pages_keep_threads_whole() {
        let source = MemorySource {
            discussions: vec![discussion(1, Some(10)), discussion(2, None), discussion(3, None)],
            // Reply 11 is older than its first post.
            posts: vec![post(11, 1, 0), post(10, 1, 1), post(20, 2, 2), post(21, 2, 3)],
            discussion_tags: vec![DiscussionTag {
                discussion_id: 1,
                tag_id: 5,
            }],
            ..Default::default()
        };
        let mut pages = ThreadPages::new(&source);

        let first = pages
            .fetch(PageRequest {
                offset: 0,
                limit: 1,
            })
            .await
            .unwrap();
        let ids: Vec<i64> = first.items.iter().map(|p| p.post.id).collect();
        assert_eq!(first.rows, 1);
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(first.items[0].tags.as_slice(), &[5]);
        assert!(first.items[0].entry.is_first);

        // Discussion 3 has no posts: the page still covers two discussions.
        let rest = pages
            .fetch(PageRequest {
                offset: 1,
                limit: 5,
            })
            .await
            .unwrap();
        let ids: Vec<i64> = rest.items.iter().map(|p| p.post.id).collect();
        assert_eq!(rest.rows, 2);
        assert_eq!(ids, vec![20, 21]);

        assert!(pages
            .fetch(PageRequest {
                offset: 3,
                limit: 5,
            })
            .await
            .unwrap()
            .is_empty());
        assert_eq!(pages.total().await.unwrap(), 4);
    }
}
