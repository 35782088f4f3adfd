//! Posts pass: topics from first posts, replies joined to them.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::pages::ThreadedPost;
use crate::batch::{RecordOutcome, RecordSink, SkipReason};
use crate::content::ContentTransformer;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapper;
use crate::model::{EntityKind, NewPost, PermalinkTarget, PostPlacement, TopicAttrs};
use crate::target::TargetStore;
use crate::xref::{self, CrossReferenceResolver};

/// Body of a first post whose content converts to nothing.
pub(crate) const EMPTY_FIRST_POST: &str = "(This post has no content.)";

pub(crate) struct PostImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a mut IdentityMapper,
    pub transformer: ContentTransformer<'a>,
    /// Author of posts whose user was not imported.
    pub guest_id: i64,
    /// Parent of every source tag, to prefer child tags.
    pub tag_parents: HashMap<i64, Option<i64>>,
}

impl PostImporter<'_> {
    /// Target category for a discussion's tags: a mapped child tag wins over
    /// a mapped parent, and lower tag ids win among equals.
    fn preferred_category(&self, tags: &[i64]) -> Option<i64> {
        let mut mapped: Vec<(bool, i64, i64)> = tags
            .iter()
            .filter_map(|tag| {
                let target = self.identity.lookup(EntityKind::Category, *tag)?;
                let is_child = matches!(self.tag_parents.get(tag), Some(Some(_)));
                Some((!is_child, *tag, target))
            })
            .collect();
        mapped.sort_unstable();
        mapped.first().map(|(_, _, target)| *target)
    }

    fn topic_attrs(&self, item: &ThreadedPost) -> TopicAttrs {
        let discussion = &item.discussion;
        TopicAttrs {
            title: html_escape::decode_html_entities(discussion.title.trim()).into_owned(),
            category_id: self.preferred_category(&item.tags),
            pinned_at: discussion.is_sticky.then_some(item.post.created_at),
            visible: !discussion.is_private,
            closed: discussion.is_locked,
        }
    }
}

#[async_trait]
impl RecordSink<ThreadedPost> for PostImporter<'_> {
    async fn import(&mut self, item: &ThreadedPost) -> Result<RecordOutcome> {
        let post = &item.post;
        let discussion = &item.discussion;
        if self.identity.contains(EntityKind::Post, post.id) {
            return Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported));
        }

        let xref = CrossReferenceResolver::new(self.target);
        let (placement, reply_to_post_number) = if item.entry.is_first {
            let attrs = self.topic_attrs(item);
            if attrs.title.is_empty() {
                return Ok(RecordOutcome::skipped_invalid("blank title"));
            }
            (PostPlacement::NewTopic(attrs), None)
        } else {
            let first_post_id = item.entry.first_post_id;
            let Some(topic_id) = self.identity.topic_of_first_post(first_post_id) else {
                return Ok(RecordOutcome::Skipped(SkipReason::MissingReference {
                    missing: format!("parent post {}", first_post_id),
                    child: format!("post {} ({})", post.id, discussion.title),
                }));
            };
            let reply_to = xref
                .reply_target(&*self.identity, post.content.as_deref(), discussion.id, topic_id)
                .await?;
            (
                PostPlacement::Reply {
                    topic_id,
                    post_number: item.entry.post_number,
                },
                reply_to,
            )
        };

        let mut raw = self.transformer.transform(post.content.as_deref());
        if raw.is_empty() {
            if !item.entry.is_first {
                return Ok(RecordOutcome::skipped_invalid("empty body"));
            }
            // The replies of the discussion still need a topic.
            debug!("First post {} has an empty body, using a placeholder", post.id);
            raw = EMPTY_FIRST_POST.to_string();
        }
        let author_id = post
            .user_id
            .and_then(|user| self.identity.lookup(EntityKind::User, user))
            .unwrap_or(self.guest_id);

        let draft = NewPost {
            author_id,
            raw,
            created_at: post.created_at,
            reply_to_post_number,
            placement,
        };
        let created = match self.target.create_post(post.id, &draft).await {
            Ok(created) => created,
            Err(MigrateError::Validation(reason)) => {
                return Ok(RecordOutcome::skipped_invalid(reason))
            }
            Err(MigrateError::MissingReference { missing, child }) => {
                return Ok(RecordOutcome::Skipped(SkipReason::MissingReference { missing, child }))
            }
            Err(e) => return Err(e),
        };
        self.identity
            .register(EntityKind::Post, post.id, created.post_id)
            .await?;

        let (url, target) = if draft.is_first_post() {
            (
                xref::topic_permalink(discussion.id, &discussion.slug),
                PermalinkTarget::Topic(created.topic_id),
            )
        } else {
            let number = item.entry.post_number.unwrap_or(created.post_number);
            (
                xref::post_permalink(discussion.id, &discussion.slug, number),
                PermalinkTarget::Post(created.post_id),
            )
        };
        xref.register_permalink(url, target).await?;

        Ok(RecordOutcome::Created)
    }

    fn describe(&self, item: &ThreadedPost) -> String {
        format!("post {} of discussion {}", item.post.id, item.discussion.id)
    }
}
