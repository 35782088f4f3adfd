//! Identity mapping between source ids and target ids.
//!
//! The [`IdentityMapper`] is the re-entrancy guard of the whole migration:
//! every importer looks a record up before doing any work and skips it when a
//! mapping exists, so an interrupted run can simply be started again.
//!
//! Lookups are served from an in-memory cache preloaded from the backend;
//! registrations write through to the backend.

mod backend;

pub use backend::IdentityBackend;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::model::{EntityKind, TopicId};

/// Bidirectional per-kind mapping of source ids to target ids.
pub struct IdentityMapper {
    backend: Arc<dyn IdentityBackend>,
    forward: HashMap<EntityKind, HashMap<i64, i64>>,
    reverse: HashMap<EntityKind, HashMap<i64, i64>>,
}

impl IdentityMapper {
    /// Create an empty mapper over a backend without loading it.
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self {
            backend,
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Create a mapper and preload every stored mapping.
    pub async fn load(backend: Arc<dyn IdentityBackend>) -> Result<Self> {
        let mut mapper = Self::new(backend);
        for kind in EntityKind::ALL {
            let pairs = mapper.backend.load(kind).await?;
            debug!("Loaded {} {} mappings", pairs.len(), kind);
            for (source_id, target_id) in pairs {
                mapper.insert_cached(kind, source_id, target_id)?;
            }
        }
        info!(
            "Identity mappings loaded from {} backend: {}",
            mapper.backend.backend_type(),
            EntityKind::ALL
                .iter()
                .map(|k| format!("{}={}", k, mapper.len(*k)))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(mapper)
    }

    /// Target id for a source id, if the record was imported.
    pub fn lookup(&self, kind: EntityKind, source_id: i64) -> Option<i64> {
        self.forward
            .get(&kind)
            .and_then(|m| m.get(&source_id))
            .copied()
    }

    /// Source id a target id was imported from.
    pub fn reverse_lookup(&self, kind: EntityKind, target_id: i64) -> Option<i64> {
        self.reverse
            .get(&kind)
            .and_then(|m| m.get(&target_id))
            .copied()
    }

    /// Whether the record was imported.
    pub fn contains(&self, kind: EntityKind, source_id: i64) -> bool {
        self.lookup(kind, source_id).is_some()
    }

    /// Topic started by a source post. Only meaningful for first posts.
    pub fn topic_of_first_post(&self, source_post_id: i64) -> Option<TopicId> {
        self.lookup(EntityKind::Post, source_post_id)
            .map(TopicId::of_first_post)
    }

    /// Record a new mapping.
    ///
    /// Fails if the source id is already mapped, or if the target id is
    /// already mapped from a different source id of the same kind.
    pub async fn register(&mut self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        self.check_new(kind, source_id, target_id)?;
        self.backend.insert(kind, source_id, target_id).await?;
        self.insert_cached(kind, source_id, target_id)
    }

    /// Number of cached mappings of a kind.
    pub fn len(&self, kind: EntityKind) -> usize {
        self.forward.get(&kind).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.forward.values().all(HashMap::is_empty)
    }

    /// Number of mappings the backend holds for a kind.
    pub async fn stored_count(&self, kind: EntityKind) -> Result<i64> {
        self.backend.count(kind).await
    }

    fn check_new(&self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        if self.contains(kind, source_id) {
            return Err(MigrateError::DuplicateMapping { kind, source_id });
        }
        if let Some(existing_source_id) = self.reverse_lookup(kind, target_id) {
            return Err(MigrateError::TargetAlreadyMapped {
                kind,
                target_id,
                existing_source_id,
            });
        }
        Ok(())
    }

    fn insert_cached(&mut self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()> {
        self.check_new(kind, source_id, target_id)?;
        self.forward
            .entry(kind)
            .or_default()
            .insert(source_id, target_id);
        self.reverse
            .entry(kind)
            .or_default()
            .insert(target_id, source_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MemoryTargetStore;

    fn mapper() -> IdentityMapper {
        IdentityMapper::new(Arc::new(MemoryTargetStore::new()))
    }

    #[tokio::test]
    async fn test_lookup_absent_is_none() {
        let mapper = mapper();
        assert_eq!(mapper.lookup(EntityKind::User, 1), None);
        assert!(!mapper.contains(EntityKind::Post, 1));
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let mut mapper = mapper();
        mapper.register(EntityKind::User, 7, 100).await.unwrap();
        assert_eq!(mapper.lookup(EntityKind::User, 7), Some(100));
        assert_eq!(mapper.reverse_lookup(EntityKind::User, 100), Some(7));
        assert_eq!(mapper.len(EntityKind::User), 1);
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let mut mapper = mapper();
        mapper.register(EntityKind::User, 1, 50).await.unwrap();
        mapper.register(EntityKind::Category, 1, 50).await.unwrap();
        assert_eq!(mapper.lookup(EntityKind::User, 1), Some(50));
        assert_eq!(mapper.lookup(EntityKind::Category, 1), Some(50));
        assert_eq!(mapper.lookup(EntityKind::Post, 1), None);
    }

    #[tokio::test]
    async fn test_duplicate_source_rejected() {
        let mut mapper = mapper();
        mapper.register(EntityKind::Post, 10, 1).await.unwrap();
        let err = mapper.register(EntityKind::Post, 10, 2).await.unwrap_err();
        assert!(matches!(err, MigrateError::DuplicateMapping { source_id: 10, .. }));
        assert_eq!(mapper.lookup(EntityKind::Post, 10), Some(1));
    }

    #[tokio::test]
    async fn test_injectivity_per_kind() {
        let mut mapper = mapper();
        mapper.register(EntityKind::Post, 10, 1).await.unwrap();
        let err = mapper.register(EntityKind::Post, 11, 1).await.unwrap_err();
        assert!(matches!(
            err,
            MigrateError::TargetAlreadyMapped {
                target_id: 1,
                existing_source_id: 10,
                ..
            }
        ));
        assert_eq!(mapper.lookup(EntityKind::Post, 11), None);
    }

    #[tokio::test]
    async fn test_distinct_sources_map_to_distinct_targets() {
        let mut mapper = mapper();
        for (source, target) in [(1, 10), (2, 20), (3, 30)] {
            mapper.register(EntityKind::User, source, target).await.unwrap();
        }
        let targets: std::collections::HashSet<_> = (1..=3)
            .filter_map(|s| mapper.lookup(EntityKind::User, s))
            .collect();
        assert_eq!(targets.len(), 3);
    }

    #[tokio::test]
    async fn test_load_restores_mappings() {
        let store = Arc::new(MemoryTargetStore::new());
        {
            let mut first = IdentityMapper::new(store.clone());
            first.register(EntityKind::User, 1, 11).await.unwrap();
            first.register(EntityKind::Post, 5, 55).await.unwrap();
        }
        let reloaded = IdentityMapper::load(store).await.unwrap();
        assert_eq!(reloaded.lookup(EntityKind::User, 1), Some(11));
        assert_eq!(reloaded.topic_of_first_post(5), Some(TopicId::of_first_post(55)));
        assert_eq!(reloaded.stored_count(EntityKind::Post).await.unwrap(), 1);
    }
}
