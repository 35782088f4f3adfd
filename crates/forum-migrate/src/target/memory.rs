//! In-process target store.
//!
//! Holds a Discourse-shaped model in memory. Dry runs write here instead of
//! PostgreSQL, and the engine tests inspect it after a run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::TargetStore;
use crate::error::{MigrateError, Result};
use crate::identity::IdentityBackend;
use crate::model::{
    next_post_number, ArtifactOutcome, CreatedPost, CrossRefArtifact, EntityKind, NewCategory,
    NewPost, NewUser, PermalinkTarget, PostPlacement, SiteSettings, SourceRef, TopicAttrs,
    TopicId, UserName,
};

/// Default per-user like limit of a fresh site.
const DEFAULT_MAX_LIKES_PER_DAY: i64 = 50;

/// A stored topic.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTopic {
    pub id: TopicId,
    pub attrs: TopicAttrs,
    pub highest_post_number: i32,
    pub posts_count: i32,
}

/// A stored post.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPost {
    pub id: i64,
    pub topic_id: TopicId,
    pub post_number: i32,
    pub author_id: i64,
    pub raw: String,
    pub reply_to_post_number: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredUser {
    id: i64,
    user: NewUser,
}

#[derive(Debug)]
struct State {
    users: Vec<StoredUser>,
    avatars: HashMap<i64, PathBuf>,
    categories: BTreeMap<i64, NewCategory>,
    topics: BTreeMap<i64, StoredTopic>,
    posts: BTreeMap<i64, StoredPost>,
    permalinks: HashMap<String, PermalinkTarget>,
    likes: HashSet<(i64, i64)>,
    reactions: HashMap<(i64, i64, String), i64>,
    groups: HashMap<String, HashSet<i64>>,
    settings: SiteSettings,
    import_ids: HashMap<EntityKind, BTreeMap<i64, i64>>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn map(&mut self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        let ids = self.import_ids.entry(kind).or_default();
        if let Some(existing) = ids.get(&source_id) {
            if *existing == target_id {
                return Ok(());
            }
            return Err(MigrateError::DuplicateMapping { kind, source_id });
        }
        if let Some((existing_source_id, _)) = ids.iter().find(|(_, t)| **t == target_id) {
            return Err(MigrateError::TargetAlreadyMapped {
                kind,
                target_id,
                existing_source_id: *existing_source_id,
            });
        }
        ids.insert(source_id, target_id);
        Ok(())
    }

    fn ensure_unmapped(&self, kind: EntityKind, source_id: i64) -> Result<()> {
        match self.import_ids.get(&kind) {
            Some(ids) if ids.contains_key(&source_id) => {
                Err(MigrateError::DuplicateMapping { kind, source_id })
            }
            _ => Ok(()),
        }
    }

    fn find_user(&self, username: &str) -> Option<&StoredUser> {
        self.users
            .iter()
            .find(|u| u.user.username.eq_ignore_ascii_case(username))
    }

    fn validate_user(&self, user: &NewUser) -> Result<()> {
        if user.username.trim().is_empty() {
            return Err(MigrateError::Validation("username is blank".into()));
        }
        if self.find_user(&user.username).is_some() {
            return Err(MigrateError::Validation(format!(
                "username '{}' is taken",
                user.username
            )));
        }
        if self
            .users
            .iter()
            .any(|u| u.user.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(MigrateError::Validation(format!(
                "email '{}' is taken",
                user.email
            )));
        }
        Ok(())
    }

    fn insert_user(&mut self, user: &NewUser) -> i64 {
        let id = self.next_id();
        self.users.push(StoredUser {
            id,
            user: user.clone(),
        });
        id
    }

    fn user_exists(&self, id: i64) -> bool {
        self.users.iter().any(|u| u.id == id)
    }

    fn post_exists(&self, id: i64) -> Result<()> {
        if self.posts.contains_key(&id) {
            Ok(())
        } else {
            Err(MigrateError::missing_reference(format!("target post {}", id), "artifact"))
        }
    }
}

/// Target store kept in memory.
pub struct MemoryTargetStore {
    state: Mutex<State>,
}

impl MemoryTargetStore {
    /// Create an empty store with the `admins` and `moderators` groups.
    pub fn new() -> Self {
        let groups = ["admins", "moderators"]
            .into_iter()
            .map(|g| (g.to_string(), HashSet::new()))
            .collect();

        Self {
            state: Mutex::new(State {
                users: Vec::new(),
                avatars: HashMap::new(),
                categories: BTreeMap::new(),
                topics: BTreeMap::new(),
                posts: BTreeMap::new(),
                permalinks: HashMap::new(),
                likes: HashSet::new(),
                reactions: HashMap::new(),
                groups,
                settings: SiteSettings {
                    max_likes_per_day: Some(DEFAULT_MAX_LIKES_PER_DAY),
                    rate_limits_enabled: Some(true),
                },
                import_ids: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Current site settings.
    pub async fn settings(&self) -> SiteSettings {
        self.state.lock().await.settings.clone()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    /// Target id of a user by username.
    pub async fn user_id(&self, username: &str) -> Option<i64> {
        self.state.lock().await.find_user(username).map(|u| u.id)
    }

    pub async fn avatar(&self, user_id: i64) -> Option<PathBuf> {
        self.state.lock().await.avatars.get(&user_id).cloned()
    }

    pub async fn category(&self, id: i64) -> Option<NewCategory> {
        self.state.lock().await.categories.get(&id).cloned()
    }

    pub async fn category_count(&self) -> usize {
        self.state.lock().await.categories.len()
    }

    pub async fn topic(&self, id: TopicId) -> Option<StoredTopic> {
        self.state.lock().await.topics.get(&id.get()).cloned()
    }

    pub async fn topic_count(&self) -> usize {
        self.state.lock().await.topics.len()
    }

    pub async fn post(&self, id: i64) -> Option<StoredPost> {
        self.state.lock().await.posts.get(&id).cloned()
    }

    pub async fn post_count(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    pub async fn permalink(&self, url: &str) -> Option<PermalinkTarget> {
        self.state.lock().await.permalinks.get(url).copied()
    }

    pub async fn permalink_count(&self) -> usize {
        self.state.lock().await.permalinks.len()
    }

    pub async fn like_count(&self) -> usize {
        self.state.lock().await.likes.len()
    }

    pub async fn reaction_count(&self) -> usize {
        self.state.lock().await.reactions.len()
    }

    /// Members of a group, sorted.
    pub async fn group_members(&self, group: &str) -> Vec<i64> {
        let state = self.state.lock().await;
        let mut members: Vec<i64> = state
            .groups
            .get(group)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        members
    }
}

impl Default for MemoryTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, source_id: i64, user: &NewUser) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.ensure_unmapped(EntityKind::User, source_id)?;
        state.validate_user(user)?;
        let id = state.insert_user(user);
        state.map(EntityKind::User, source_id, id)?;
        Ok(id)
    }

    async fn ensure_user(&self, user: &NewUser) -> Result<i64> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.find_user(&user.username) {
            return Ok(existing.id);
        }
        state.validate_user(user)?;
        Ok(state.insert_user(user))
    }

    async fn list_users(&self) -> Result<Vec<UserName>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .map(|u| UserName {
                username: u.user.username.clone(),
                name: Some(u.user.name.clone()),
            })
            .collect())
    }

    async fn upload_avatar(&self, user_id: i64, path: &Path) -> Result<()> {
        if !path.is_file() {
            return Err(MigrateError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("avatar file not found: {}", path.display()),
            )));
        }
        let mut state = self.state.lock().await;
        if !state.user_exists(user_id) {
            return Err(MigrateError::missing_reference(
                format!("target user {}", user_id),
                "avatar",
            ));
        }
        state.avatars.insert(user_id, path.to_path_buf());
        Ok(())
    }

    async fn create_category(&self, source_id: i64, category: &NewCategory) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.ensure_unmapped(EntityKind::Category, source_id)?;
        if let Some(parent) = category.parent_category_id {
            if !state.categories.contains_key(&parent) {
                return Err(MigrateError::missing_reference(
                    format!("target category {}", parent),
                    format!("category {}", source_id),
                ));
            }
        }
        let id = state.next_id();
        state.categories.insert(id, category.clone());
        state.map(EntityKind::Category, source_id, id)?;
        Ok(id)
    }

    async fn create_post(&self, source_id: i64, post: &NewPost) -> Result<CreatedPost> {
        let mut state = self.state.lock().await;
        state.ensure_unmapped(EntityKind::Post, source_id)?;
        if !state.user_exists(post.author_id) {
            return Err(MigrateError::missing_reference(
                format!("target user {}", post.author_id),
                format!("post {}", source_id),
            ));
        }

        let (topic_id, post_number) = match &post.placement {
            PostPlacement::NewTopic(attrs) => {
                if attrs.title.trim().is_empty() {
                    return Err(MigrateError::Validation("topic title is blank".into()));
                }
                let id = state.next_id();
                let topic_id = TopicId::of_first_post(id);
                state.topics.insert(
                    id,
                    StoredTopic {
                        id: topic_id,
                        attrs: attrs.clone(),
                        highest_post_number: 0,
                        posts_count: 0,
                    },
                );
                (topic_id, 1)
            }
            PostPlacement::Reply {
                topic_id,
                post_number,
            } => {
                let topic = state.topics.get(&topic_id.get()).ok_or_else(|| {
                    MigrateError::missing_reference(
                        format!("topic {}", topic_id),
                        format!("post {}", source_id),
                    )
                })?;
                (
                    *topic_id,
                    next_post_number(topic.highest_post_number, *post_number),
                )
            }
        };

        let post_id = match post.placement {
            PostPlacement::NewTopic(_) => topic_id.get(),
            PostPlacement::Reply { .. } => state.next_id(),
        };
        state.posts.insert(
            post_id,
            StoredPost {
                id: post_id,
                topic_id,
                post_number,
                author_id: post.author_id,
                raw: post.raw.clone(),
                reply_to_post_number: post.reply_to_post_number,
                created_at: post.created_at,
            },
        );
        if let Some(topic) = state.topics.get_mut(&topic_id.get()) {
            topic.highest_post_number = post_number;
            topic.posts_count += 1;
        }
        state.map(EntityKind::Post, source_id, post_id)?;

        Ok(CreatedPost {
            post_id,
            topic_id,
            post_number,
        })
    }

    async fn find_post_number(&self, topic_id: TopicId, post_number: i32) -> Result<Option<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .values()
            .find(|p| p.topic_id == topic_id && p.post_number == post_number)
            .map(|p| p.id))
    }

    async fn find_post(&self, post_id: i64) -> Result<Option<CreatedPost>> {
        let state = self.state.lock().await;
        Ok(state.posts.get(&post_id).map(|p| CreatedPost {
            post_id,
            topic_id: p.topic_id,
            post_number: p.post_number,
        }))
    }

    async fn create_artifact(
        &self,
        artifact: &CrossRefArtifact,
        source: Option<SourceRef>,
    ) -> Result<ArtifactOutcome> {
        let mut state = self.state.lock().await;
        match artifact {
            CrossRefArtifact::Permalink { url, target } => {
                if state.permalinks.contains_key(url) {
                    return Ok(ArtifactOutcome::AlreadyExists);
                }
                state.permalinks.insert(url.clone(), *target);
                Ok(ArtifactOutcome::Created(state.next_id()))
            }
            CrossRefArtifact::Like {
                post_id, user_id, ..
            } => {
                state.post_exists(*post_id)?;
                if !state.likes.insert((*post_id, *user_id)) {
                    return Ok(ArtifactOutcome::AlreadyExists);
                }
                Ok(ArtifactOutcome::Created(state.next_id()))
            }
            CrossRefArtifact::Reaction {
                post_id,
                user_id,
                identifier,
            } => {
                state.post_exists(*post_id)?;
                let key = (*post_id, *user_id, identifier.clone());
                if state.reactions.contains_key(&key) {
                    return Ok(ArtifactOutcome::AlreadyExists);
                }
                if let Some(source) = source {
                    state.ensure_unmapped(source.kind, source.id)?;
                }
                let id = state.next_id();
                state.reactions.insert(key, id);
                if let Some(source) = source {
                    state.map(source.kind, source.id, id)?;
                }
                Ok(ArtifactOutcome::Created(id))
            }
            CrossRefArtifact::GroupMembership { user_id, group } => {
                let members = state.groups.get_mut(group).ok_or_else(|| {
                    MigrateError::Validation(format!("group '{}' does not exist", group))
                })?;
                if !members.insert(*user_id) {
                    return Ok(ArtifactOutcome::AlreadyExists);
                }
                Ok(ArtifactOutcome::Created(state.next_id()))
            }
        }
    }

    async fn close_topic(&self, topic_id: TopicId) -> Result<bool> {
        let mut state = self.state.lock().await;
        let topic = state
            .topics
            .get_mut(&topic_id.get())
            .ok_or_else(|| MigrateError::missing_reference(format!("topic {}", topic_id), "close"))?;
        if topic.attrs.closed {
            return Ok(false);
        }
        topic.attrs.closed = true;
        Ok(true)
    }

    async fn apply_settings(&self, settings: &SiteSettings) -> Result<SiteSettings> {
        let mut state = self.state.lock().await;
        let mut previous = SiteSettings::default();
        if let Some(value) = settings.max_likes_per_day {
            previous.max_likes_per_day = state.settings.max_likes_per_day.replace(value);
        }
        if let Some(value) = settings.rate_limits_enabled {
            previous.rate_limits_enabled = state.settings.rate_limits_enabled.replace(value);
        }
        Ok(previous)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl IdentityBackend for MemoryTargetStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self, kind: EntityKind) -> Result<Vec<(i64, i64)>> {
        let state = self.state.lock().await;
        Ok(state
            .import_ids
            .get(&kind)
            .map(|ids| ids.iter().map(|(s, t)| (*s, *t)).collect())
            .unwrap_or_default())
    }

    async fn insert(&self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        self.state.lock().await.map(kind, source_id, target_id)
    }

    async fn count(&self, kind: EntityKind) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.import_ids.get(&kind).map_or(0, |ids| ids.len() as i64))
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
