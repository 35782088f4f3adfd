//! Error types for the migration library.

use thiserror::Error;

use crate::model::EntityKind;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database connection or query error
    #[error("Source database error: {0}")]
    Source(#[from] sqlx::Error),

    /// Target database connection or query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A record failed validation on the target side
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A record references an entity that has not been imported
    #[error("Referenced {missing} is not imported (needed by {child})")]
    MissingReference { missing: String, child: String },

    /// A mapping already exists for this source id
    #[error("{kind} {source_id} is already mapped")]
    DuplicateMapping { kind: EntityKind, source_id: i64 },

    /// The target id is already claimed by another source id of the same kind
    #[error("{kind} target id {target_id} is already mapped from source id {existing_source_id}")]
    TargetAlreadyMapped {
        kind: EntityKind,
        target_id: i64,
        existing_source_id: i64,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl From<deadpool_postgres::PoolError> for MigrateError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        MigrateError::pool(err.to_string(), "getting target connection")
    }
}

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a MissingReference error
    pub fn missing_reference(missing: impl Into<String>, child: impl Into<String>) -> Self {
        MigrateError::MissingReference {
            missing: missing.into(),
            child: child.into(),
        }
    }

    /// Whether this error means a store is unreachable.
    ///
    /// Everything else is handled per record; connectivity loss aborts the run.
    pub fn is_fatal(&self) -> bool {
        match self {
            MigrateError::Source(e) => is_source_connectivity(e),
            MigrateError::Target(e) => e.is_closed(),
            MigrateError::Pool { .. } | MigrateError::Cancelled => true,
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 1,
            MigrateError::Source(_) => 2,
            MigrateError::Target(_) => 3,
            MigrateError::Pool { .. } => 4,
            MigrateError::Validation(_)
            | MigrateError::MissingReference { .. }
            | MigrateError::DuplicateMapping { .. }
            | MigrateError::TargetAlreadyMapped { .. } => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
            MigrateError::Json(_) => 8,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Connectivity failures of the source pool, as opposed to query failures.
pub(crate) fn is_source_connectivity(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_errors_are_fatal() {
        assert!(MigrateError::Source(sqlx::Error::PoolTimedOut).is_fatal());
        assert!(MigrateError::pool("refused", "connecting").is_fatal());
        assert!(!MigrateError::Source(sqlx::Error::RowNotFound).is_fatal());
        assert!(!MigrateError::Validation("blank username".into()).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), 1);
        assert_eq!(MigrateError::Cancelled.exit_code(), 6);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(MigrateError::Io(io).exit_code(), 7);
    }

    #[test]
    fn test_duplicate_mapping_message() {
        let err = MigrateError::DuplicateMapping {
            kind: EntityKind::Post,
            source_id: 10,
        };
        assert_eq!(err.to_string(), "post 10 is already mapped");
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::missing_reference("post 9", "post 12");
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: Referenced post 9 is not imported"));
    }
}
