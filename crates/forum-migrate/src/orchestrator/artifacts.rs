//! Passes that attach artifacts to imported entities: likes, reactions,
//! group memberships and topic closing.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::batch::{RecordOutcome, RecordSink, SkipReason};
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapper;
use crate::model::{
    ArtifactOutcome, CrossRefArtifact, EntityKind, SourceDiscussion, SourceGroupMember,
    SourceLike, SourceReaction, SourceRef, TopicId,
};
use crate::source::SourceStore;
use crate::target::TargetStore;
use crate::thread;

/// Map a store's answer for an artifact to a record outcome.
fn artifact_outcome(result: Result<ArtifactOutcome>) -> Result<RecordOutcome> {
    match result {
        Ok(ArtifactOutcome::Created(_)) => Ok(RecordOutcome::Created),
        Ok(ArtifactOutcome::AlreadyExists) => {
            Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported))
        }
        Err(MigrateError::Validation(reason)) => Ok(RecordOutcome::skipped_invalid(reason)),
        Err(MigrateError::MissingReference { missing, child }) => {
            Ok(RecordOutcome::Skipped(SkipReason::MissingReference { missing, child }))
        }
        Err(e) => Err(e),
    }
}

/// Target ids of the user and post of an artifact, or the outcome to report
/// when either isn't imported.
fn user_and_post(
    identity: &IdentityMapper,
    user_id: i64,
    post_id: i64,
) -> std::result::Result<(i64, i64), RecordOutcome> {
    let user = identity
        .lookup(EntityKind::User, user_id)
        .ok_or_else(|| RecordOutcome::skipped_unmapped(format!("user {}", user_id)))?;
    let post = identity
        .lookup(EntityKind::Post, post_id)
        .ok_or_else(|| RecordOutcome::skipped_unmapped(format!("post {}", post_id)))?;
    Ok((user, post))
}

pub(crate) struct LikeImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a IdentityMapper,
}

#[async_trait]
impl RecordSink<SourceLike> for LikeImporter<'_> {
    async fn import(&mut self, like: &SourceLike) -> Result<RecordOutcome> {
        let (user_id, post_id) = match user_and_post(self.identity, like.user_id, like.post_id) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };
        let artifact = CrossRefArtifact::Like {
            post_id,
            user_id,
            created_at: like.created_at,
        };
        artifact_outcome(self.target.create_artifact(&artifact, None).await)
    }

    fn describe(&self, like: &SourceLike) -> String {
        format!("like of post {} by user {}", like.post_id, like.user_id)
    }
}

pub(crate) struct ReactionImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a mut IdentityMapper,
}

#[async_trait]
impl RecordSink<SourceReaction> for ReactionImporter<'_> {
    async fn import(&mut self, reaction: &SourceReaction) -> Result<RecordOutcome> {
        if self.identity.contains(EntityKind::Reaction, reaction.id) {
            return Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported));
        }
        if reaction.identifier.trim().is_empty() {
            return Ok(RecordOutcome::skipped_invalid("blank reaction identifier"));
        }
        let (user_id, post_id) =
            match user_and_post(self.identity, reaction.user_id, reaction.post_id) {
                Ok(ids) => ids,
                Err(outcome) => return Ok(outcome),
            };

        let artifact = CrossRefArtifact::Reaction {
            post_id,
            user_id,
            identifier: reaction.identifier.trim().to_string(),
        };
        let source = SourceRef::new(EntityKind::Reaction, reaction.id);
        let result = self.target.create_artifact(&artifact, Some(source)).await;
        if let Ok(ArtifactOutcome::Created(target_id)) = result {
            self.identity
                .register(EntityKind::Reaction, reaction.id, target_id)
                .await?;
        }
        artifact_outcome(result)
    }

    fn describe(&self, reaction: &SourceReaction) -> String {
        format!("reaction {}", reaction.id)
    }
}

pub(crate) struct GroupImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a IdentityMapper,
    /// Source group name to target group name.
    pub group_map: &'a BTreeMap<String, String>,
}

#[async_trait]
impl RecordSink<SourceGroupMember> for GroupImporter<'_> {
    async fn import(&mut self, member: &SourceGroupMember) -> Result<RecordOutcome> {
        let Some(group) = self.group_map.get(&member.group_name) else {
            return Ok(RecordOutcome::skipped_unmapped(format!(
                "group '{}'",
                member.group_name
            )));
        };
        let Some(user_id) = self.identity.lookup(EntityKind::User, member.user_id) else {
            return Ok(RecordOutcome::skipped_unmapped(format!("user {}", member.user_id)));
        };
        let artifact = CrossRefArtifact::GroupMembership {
            user_id,
            group: group.clone(),
        };
        artifact_outcome(self.target.create_artifact(&artifact, None).await)
    }

    fn describe(&self, member: &SourceGroupMember) -> String {
        format!("membership of user {} in '{}'", member.user_id, member.group_name)
    }
}

/// Closes the topics of locked discussions.
pub(crate) struct CloseImporter<'a> {
    pub source: &'a dyn SourceStore,
    pub target: &'a dyn TargetStore,
    pub identity: &'a IdentityMapper,
}

impl CloseImporter<'_> {
    /// Topic of a discussion. When the declared first post isn't imported the
    /// thread is reconstructed to find the post the topic was created from.
    async fn topic_of(&self, discussion: &SourceDiscussion) -> Result<Option<TopicId>> {
        if let Some(topic) = discussion
            .first_post_id
            .and_then(|id| self.identity.topic_of_first_post(id))
        {
            return Ok(Some(topic));
        }
        let posts = self.source.posts_in(&[discussion.id]).await?;
        let thread = thread::reconstruct(&posts);
        Ok(thread
            .entries()
            .iter()
            .find(|entry| entry.is_first)
            .and_then(|entry| self.identity.topic_of_first_post(entry.post_id)))
    }
}

#[async_trait]
impl RecordSink<SourceDiscussion> for CloseImporter<'_> {
    async fn import(&mut self, discussion: &SourceDiscussion) -> Result<RecordOutcome> {
        let Some(topic) = self.topic_of(discussion).await? else {
            return Ok(RecordOutcome::skipped_unmapped(format!(
                "first post of discussion {}",
                discussion.id
            )));
        };
        match self.target.close_topic(topic).await {
            Ok(true) => Ok(RecordOutcome::Updated),
            Ok(false) => Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported)),
            Err(MigrateError::MissingReference { missing, child }) => {
                Ok(RecordOutcome::Skipped(SkipReason::MissingReference { missing, child }))
            }
            Err(e) => Err(e),
        }
    }

    fn describe(&self, discussion: &SourceDiscussion) -> String {
        format!("discussion {}", discussion.id)
    }
}
