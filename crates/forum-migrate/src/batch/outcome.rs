//! Per-record outcomes and per-pass statistics.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What importing one record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    /// An existing target entity was changed, e.g. a topic closed.
    Updated,
    Skipped(SkipReason),
}

impl RecordOutcome {
    pub fn skipped_invalid(reason: impl Into<String>) -> Self {
        RecordOutcome::Skipped(SkipReason::Invalid(reason.into()))
    }

    pub fn skipped_unmapped(what: impl Into<String>) -> Self {
        RecordOutcome::Skipped(SkipReason::Unmapped(what.into()))
    }
}

/// Why a record was not imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The record has an identity mapping from an earlier run.
    AlreadyImported,
    /// The record failed validation (blank username, invalid email, ...).
    Invalid(String),
    /// A referenced parent is not imported.
    MissingReference { missing: String, child: String },
    /// A referenced entity is not mapped, so there is nothing to attach to.
    Unmapped(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyImported => write!(f, "already imported"),
            SkipReason::Invalid(reason) => write!(f, "invalid: {}", reason),
            SkipReason::MissingReference { missing, child } => {
                write!(f, "{} doesn't exist, skipping {}", missing, child)
            }
            SkipReason::Unmapped(what) => write!(f, "{} is not imported", what),
        }
    }
}

/// Counters of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassStats {
    pub pass: String,
    /// Pre-counted number of source records.
    pub total: u64,
    /// Records handled, clamped to `total`.
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub already_imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl PassStats {
    pub fn new(pass: impl Into<String>, total: u64) -> Self {
        Self {
            pass: pass.into(),
            total,
            ..Self::default()
        }
    }

    pub(crate) fn record(&mut self, outcome: &RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Updated => self.updated += 1,
            RecordOutcome::Skipped(SkipReason::AlreadyImported) => self.already_imported += 1,
            RecordOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Records that changed the target.
    pub fn changed(&self) -> u64 {
        self.created + self.updated
    }
}

impl fmt::Display for PassStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} processed, {} created, {} updated, {} already imported, {} skipped, {} failed",
            self.pass,
            self.processed,
            self.total,
            self.created,
            self.updated,
            self.already_imported,
            self.skipped,
            self.failed
        )
    }
}
