//! Categories pass. Flarum tags become categories, parents before children.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::batch::{RecordOutcome, RecordSink, SkipReason};
use crate::error::{MigrateError, Result};
use crate::identity::IdentityMapper;
use crate::model::{EntityKind, NewCategory, SourceCategory};
use crate::target::TargetStore;

/// Color without `#`, cut to six characters.
pub fn normalize_color(color: Option<&str>) -> Option<String> {
    let color: String = color?.replace('#', "").trim().chars().take(6).collect();
    (!color.is_empty()).then_some(color)
}

/// Order categories so that every parent precedes its children.
///
/// Categories are sorted by depth, then id. A parent outside the set counts
/// as a root; its children are then skipped at import.
pub fn parents_first(categories: Vec<SourceCategory>) -> Vec<SourceCategory> {
    let parents: HashMap<i64, Option<i64>> =
        categories.iter().map(|c| (c.id, c.parent_id)).collect();

    let depth = |category: &SourceCategory| {
        let mut depth = 0;
        let mut parent = category.parent_id;
        // Bounded so a parent cycle can't loop forever.
        while let Some(id) = parent {
            depth += 1;
            if depth > parents.len() {
                break;
            }
            parent = parents.get(&id).copied().flatten();
        }
        depth
    };

    let mut ordered: Vec<(usize, SourceCategory)> =
        categories.into_iter().map(|c| (depth(&c), c)).collect();
    ordered.sort_by_key(|(depth, c)| (*depth, c.id));
    ordered.into_iter().map(|(_, c)| c).collect()
}

pub(crate) struct CategoryImporter<'a> {
    pub target: &'a dyn TargetStore,
    pub identity: &'a mut IdentityMapper,
}

#[async_trait]
impl RecordSink<SourceCategory> for CategoryImporter<'_> {
    async fn import(&mut self, category: &SourceCategory) -> Result<RecordOutcome> {
        if self.identity.contains(EntityKind::Category, category.id) {
            return Ok(RecordOutcome::Skipped(SkipReason::AlreadyImported));
        }
        let name = category.name.trim();
        if name.is_empty() {
            return Ok(RecordOutcome::skipped_invalid("blank name"));
        }

        let parent_category_id = match category.parent_id {
            Some(parent) => match self.identity.lookup(EntityKind::Category, parent) {
                Some(id) => Some(id),
                None => {
                    return Ok(RecordOutcome::Skipped(SkipReason::MissingReference {
                        missing: format!("parent category {}", parent),
                        child: format!("category {}", category.id),
                    }))
                }
            },
            None => None,
        };

        let draft = NewCategory {
            name: name.to_string(),
            slug: category.slug.clone(),
            position: category.position,
            description: category.description.clone(),
            color: normalize_color(category.color.as_deref()),
            parent_category_id,
            read_restricted: category.is_restricted,
            icon: category.icon.clone(),
            created_at: category.created_at,
            updated_at: category.updated_at,
        };

        let target_id = match self.target.create_category(category.id, &draft).await {
            Ok(id) => id,
            Err(MigrateError::Validation(reason)) => {
                return Ok(RecordOutcome::skipped_invalid(reason))
            }
            Err(e) => return Err(e),
        };
        self.identity
            .register(EntityKind::Category, category.id, target_id)
            .await?;
        Ok(RecordOutcome::Created)
    }

    fn describe(&self, category: &SourceCategory) -> String {
        format!("category {} ({})", category.id, category.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(id: i64, parent_id: Option<i64>) -> SourceCategory {
        SourceCategory {
            id,
            name: format!("Tag {}", id),
            parent_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_color() {
        assert_eq!(normalize_color(Some("#4d698e")), Some("4d698e".into()));
        assert_eq!(normalize_color(Some("#B72A2AFF")), Some("B72A2A".into()));
        assert_eq!(normalize_color(Some("#")), None);
        assert_eq!(normalize_color(None), None);
    }

    #[test]
    fn test_parents_first() {
        let ordered = parents_first(vec![
            category(1, Some(3)),
            category(2, None),
            category(3, None),
            category(4, Some(1)),
        ]);
        let ids: Vec<i64> = ordered.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let ordered = parents_first(vec![category(1, Some(2)), category(2, Some(1))]);
        assert_eq!(ordered.len(), 2);
    }
}
