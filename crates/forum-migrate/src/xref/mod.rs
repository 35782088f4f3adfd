//! Cross references around a created post: reply targets and legacy
//! permalinks.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identity::IdentityMapper;
use crate::model::{ArtifactOutcome, CrossRefArtifact, EntityKind, PermalinkTarget, TopicId};
use crate::target::TargetStore;

static POST_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<POSTMENTION\b([^>]*)>").expect("post mention pattern must compile")
});
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([A-Za-z_][\w-]*)="([^"]*)""#).expect("attribute pattern must compile")
});

/// Source post id of the first post mention in `raw` that points into the
/// same discussion.
///
/// The mention's `number` is the ordinal in the source discussion and is not
/// used: target ordinals differ from it when a thread was repaired or replies
/// were renumbered.
pub fn mentioned_post_id(raw: &str, discussion_id: i64) -> Option<i64> {
    POST_MENTION.captures_iter(raw).find_map(|tag| {
        let mut same_discussion = false;
        let mut post_id = None;
        for attr in ATTRIBUTE.captures_iter(&tag[1]) {
            match attr[1].to_ascii_lowercase().as_str() {
                "discussionid" => {
                    same_discussion = attr[2].trim().parse::<i64>().ok() == Some(discussion_id)
                }
                "id" => post_id = attr[2].trim().parse::<i64>().ok(),
                _ => {}
            }
        }
        post_id.filter(|id| same_discussion && *id > 0)
    })
}

/// Legacy address of a discussion.
pub fn topic_permalink(discussion_id: i64, slug: &str) -> String {
    format!("d/{}-{}", discussion_id, slug)
}

/// Legacy address of one post of a discussion.
pub fn post_permalink(discussion_id: i64, slug: &str, post_number: i32) -> String {
    format!("{}/{}", topic_permalink(discussion_id, slug), post_number)
}

/// Resolves reply targets and records permalinks against the target store.
///
/// Neither ever fails a post: unresolvable replies are dropped and permalink
/// failures are logged. Only connectivity errors propagate.
pub struct CrossReferenceResolver<'a> {
    target: &'a dyn TargetStore,
}

impl<'a> CrossReferenceResolver<'a> {
    pub fn new(target: &'a dyn TargetStore) -> Self {
        Self { target }
    }

    /// Target ordinal of the post a reply in `topic_id` answers.
    ///
    /// The mentioned source post must be imported into the same topic;
    /// otherwise the reply link is omitted.
    pub async fn reply_target(
        &self,
        identity: &IdentityMapper,
        raw: Option<&str>,
        discussion_id: i64,
        topic_id: TopicId,
    ) -> Result<Option<i32>> {
        let Some(source_id) = raw.and_then(|r| mentioned_post_id(r, discussion_id)) else {
            return Ok(None);
        };
        let Some(post_id) = identity.lookup(EntityKind::Post, source_id) else {
            debug!("Reply target post {} is not imported, omitting reply link", source_id);
            return Ok(None);
        };

        match self.target.find_post(post_id).await {
            Ok(Some(post)) if post.topic_id == topic_id => Ok(Some(post.post_number)),
            Ok(Some(post)) => {
                debug!(
                    "Reply target post {} is in topic {}, not {}, omitting reply link",
                    source_id, post.topic_id, topic_id
                );
                Ok(None)
            }
            Ok(None) => {
                debug!(
                    "Reply target post {} (target {}) not found, omitting reply link",
                    source_id, post_id
                );
                Ok(None)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Failed to look up reply target post {}: {}", source_id, e);
                Ok(None)
            }
        }
    }

    /// Record a legacy URL pointing at a topic or post.
    pub async fn register_permalink(&self, url: String, target: PermalinkTarget) -> Result<()> {
        let artifact = CrossRefArtifact::Permalink { url, target };
        match self.target.create_artifact(&artifact, None).await {
            Ok(ArtifactOutcome::Created(_)) => {
                debug!("Registered {:?}", artifact);
                Ok(())
            }
            Ok(ArtifactOutcome::AlreadyExists) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Failed to register {:?}: {}", artifact, e);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreatedPost, NewPost, NewUser, PostPlacement, TopicAttrs};
    use crate::target::MemoryTargetStore;
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn test_mention_in_same_discussion() {
        let raw = r#"<r><POSTMENTION discussionid="7" displayname="a" id="31" number="3">@a#31</POSTMENTION> yes</r>"#;
        assert_eq!(mentioned_post_id(raw, 7), Some(31));
    }

    #[test]
    fn test_mention_attribute_order_does_not_matter() {
        let raw = r#"<POSTMENTION number="4" id="12" discussionid="7">x</POSTMENTION>"#;
        assert_eq!(mentioned_post_id(raw, 7), Some(12));
    }

    #[test]
    fn test_mention_in_other_discussion_ignored() {
        let raw = concat!(
            r#"<POSTMENTION discussionid="8" id="2" number="2">x</POSTMENTION>"#,
            r#"<POSTMENTION discussionid="7" id="5" number="5">y</POSTMENTION>"#
        );
        assert_eq!(mentioned_post_id(raw, 7), Some(5));
        assert_eq!(mentioned_post_id(raw, 9), None);
    }

    #[test]
    fn test_mention_without_post_id_ignored() {
        let raw = concat!(
            r#"<POSTMENTION discussionid="7" number="3">x</POSTMENTION>"#,
            r#"<POSTMENTION discussionid="7" id="0" number="1">y</POSTMENTION>"#
        );
        assert_eq!(mentioned_post_id(raw, 7), None);
    }

    #[test]
    fn test_permalinks() {
        assert_eq!(topic_permalink(12, "hello-world"), "d/12-hello-world");
        assert_eq!(post_permalink(12, "hello-world", 3), "d/12-hello-world/3");
    }

    fn topic_post(author_id: i64) -> NewPost {
        NewPost {
            author_id,
            raw: "first".into(),
            created_at: Utc::now(),
            reply_to_post_number: None,
            placement: PostPlacement::NewTopic(TopicAttrs {
                title: "T".into(),
                category_id: None,
                pinned_at: None,
                visible: true,
                closed: false,
            }),
        }
    }

    fn reply(author_id: i64, topic_id: TopicId, post_number: Option<i32>) -> NewPost {
        NewPost {
            author_id,
            raw: "reply".into(),
            created_at: Utc::now(),
            reply_to_post_number: None,
            placement: PostPlacement::Reply {
                topic_id,
                post_number,
            },
        }
    }

    async fn author(store: &MemoryTargetStore) -> i64 {
        store
            .ensure_user(&NewUser {
                username: "amy".into(),
                name: "Amy".into(),
                email: "amy@example.com".into(),
                created_at: None,
                last_seen_at: None,
                suspended_till: None,
                bio_raw: None,
                approved: true,
            })
            .await
            .unwrap()
    }

    /// Create a post and map it the way the posts pass does.
    async fn import(
        store: &MemoryTargetStore,
        identity: &mut IdentityMapper,
        source_id: i64,
        post: NewPost,
    ) -> CreatedPost {
        let created = store.create_post(source_id, &post).await.unwrap();
        identity
            .register(EntityKind::Post, source_id, created.post_id)
            .await
            .unwrap();
        created
    }

    #[tokio::test]
    async fn test_reply_target_uses_target_ordinal() {
        let store = Arc::new(MemoryTargetStore::new());
        let mut identity = IdentityMapper::new(store.clone());
        let amy = author(&store).await;

        let first = import(&store, &mut identity, 10, topic_post(amy)).await;
        let topic = first.topic_id;
        // Source #3 lands first and keeps its number; source #2 follows as #4.
        import(&store, &mut identity, 12, reply(amy, topic, Some(3))).await;
        let renumbered = import(&store, &mut identity, 11, reply(amy, topic, Some(2))).await;
        assert_eq!(renumbered.post_number, 4);

        let resolver = CrossReferenceResolver::new(store.as_ref());
        let to_renumbered = r#"<POSTMENTION discussionid="7" id="11" number="2">x</POSTMENTION>"#;
        let to_first = r#"<POSTMENTION discussionid="7" id="10" number="1">x</POSTMENTION>"#;
        assert_eq!(
            resolver
                .reply_target(&identity, Some(to_renumbered), 7, topic)
                .await
                .unwrap(),
            Some(4)
        );
        assert_eq!(
            resolver
                .reply_target(&identity, Some(to_first), 7, topic)
                .await
                .unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_reply_target_of_promoted_first_post() {
        let store = Arc::new(MemoryTargetStore::new());
        let mut identity = IdentityMapper::new(store.clone());
        let amy = author(&store).await;

        // Source #2 opens the topic when the recorded first post is missing.
        let topic = import(&store, &mut identity, 12, topic_post(amy)).await.topic_id;
        import(&store, &mut identity, 13, reply(amy, topic, Some(3))).await;

        let resolver = CrossReferenceResolver::new(store.as_ref());
        let raw = r#"<POSTMENTION discussionid="2" id="12" number="2">x</POSTMENTION>"#;
        assert_eq!(
            resolver.reply_target(&identity, Some(raw), 2, topic).await.unwrap(),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_reply_target_omitted_when_unresolvable() {
        let store = Arc::new(MemoryTargetStore::new());
        let mut identity = IdentityMapper::new(store.clone());
        let amy = author(&store).await;

        let topic = import(&store, &mut identity, 10, topic_post(amy)).await.topic_id;
        let other_topic = import(&store, &mut identity, 20, topic_post(amy)).await.topic_id;
        assert_ne!(topic, other_topic);

        let resolver = CrossReferenceResolver::new(store.as_ref());
        let unmapped = r#"<POSTMENTION discussionid="7" id="99" number="1">x</POSTMENTION>"#;
        let elsewhere = r#"<POSTMENTION discussionid="7" id="20" number="1">x</POSTMENTION>"#;
        for raw in [Some(unmapped), Some(elsewhere), None] {
            assert_eq!(
                resolver.reply_target(&identity, raw, 7, topic).await.unwrap(),
                None
            );
        }
    }

    #[tokio::test]
    async fn test_register_permalink_twice() {
        let store = MemoryTargetStore::new();
        let amy = author(&store).await;
        let topic = store.create_post(1, &topic_post(amy)).await.unwrap().topic_id;
        let resolver = CrossReferenceResolver::new(&store);

        let url = topic_permalink(7, "t");
        resolver
            .register_permalink(url.clone(), PermalinkTarget::Topic(topic))
            .await
            .unwrap();
        resolver
            .register_permalink(url.clone(), PermalinkTarget::Topic(topic))
            .await
            .unwrap();
        assert_eq!(store.permalink(&url).await, Some(PermalinkTarget::Topic(topic)));
        assert_eq!(store.permalink_count().await, 1);
    }
}
