//! Backend trait for identity mapping storage.
//!
//! The [`IdentityBackend`] trait defines where `(kind, source_id) -> target_id`
//! mappings are persisted. Implementations:
//!
//! - **PostgreSQL**: `PgTargetStore` keeps them in its `import_ids` table,
//!   written in the same transaction as the entity they map
//! - **Memory**: `MemoryTargetStore`, for dry runs and tests
//!
//! The migrator works with `Arc<dyn IdentityBackend>` without knowing the
//! concrete type.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::EntityKind;

/// Trait for identity mapping persistence backends.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across async tasks.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Initialize the storage schema. Idempotent.
    async fn init_schema(&self) -> Result<()>;

    /// Load every `(source_id, target_id)` pair of a kind.
    async fn load(&self, kind: EntityKind) -> Result<Vec<(i64, i64)>>;

    /// Persist a mapping.
    ///
    /// Succeeds without change when the identical mapping is already stored
    /// (stores that record the mapping while creating the entity rely on
    /// this). Fails when either side is already mapped differently.
    async fn insert(&self, kind: EntityKind, source_id: i64, target_id: i64) -> Result<()>;

    /// Number of mappings of a kind.
    async fn count(&self, kind: EntityKind) -> Result<i64>;

    /// Get the backend type name for logging/debugging.
    fn backend_type(&self) -> &'static str;
}
