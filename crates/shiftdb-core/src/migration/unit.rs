//! Migration units and their lifecycle states.

use std::fmt;
use std::sync::Arc;

use crate::storage::Database;

/// Why a migration unit failed permanently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The source table or database cannot be read.
    SourceUnavailable,
    /// Source rows no longer fit the destination schema.
    SchemaMismatch,
    /// The storage layer failed while moving rows.
    Storage,
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailReason::SourceUnavailable => write!(f, "source unavailable"),
            FailReason::SchemaMismatch => write!(f, "schema mismatch"),
            FailReason::Storage => write!(f, "storage failure"),
        }
    }
}

/// Lifecycle state of a migration unit.
///
/// States only move forward: Pending -> InProgress -> Completed or
/// Failed. Completed and Failed are terminal; a unit never re-enters an
/// active state, so routing decisions taken at a transition stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    /// Registered, no step has run yet.
    Pending,
    /// At least one step has run and source rows may remain.
    InProgress,
    /// Every source row relocated and the source table removed.
    Completed,
    /// A permanent error stopped this unit.
    Failed(FailReason),
}

impl MigrationState {
    /// Whether the unit may still have rows to move.
    pub fn is_active(&self) -> bool {
        matches!(self, MigrationState::Pending | MigrationState::InProgress)
    }

    /// Whether the state accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Whether `next` is a legal forward transition from this state.
    pub fn can_advance(&self, next: MigrationState) -> bool {
        matches!(
            (self, next),
            (MigrationState::Pending, MigrationState::InProgress)
                | (MigrationState::Pending, MigrationState::Completed)
                | (MigrationState::Pending, MigrationState::Failed(_))
                | (MigrationState::InProgress, MigrationState::Completed)
                | (MigrationState::InProgress, MigrationState::Failed(_))
        )
    }
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationState::Pending => write!(f, "pending"),
            MigrationState::InProgress => write!(f, "in_progress"),
            MigrationState::Completed => write!(f, "completed"),
            MigrationState::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// One table migration job: drain `source_table` into `destination_table`.
///
/// The source database may be the destination database itself (same-file
/// migration) or a separate, possibly keyed, file.
#[derive(Clone)]
pub struct MigrationUnit {
    /// Table rows move into. Unique among registered units.
    pub destination_table: String,
    /// Table rows drain from.
    pub source_table: String,
    /// Database holding the source table.
    pub source: Arc<Database>,
}

impl MigrationUnit {
    /// Describe a table migration job.
    pub fn new(
        destination_table: impl Into<String>,
        source_table: impl Into<String>,
        source: Arc<Database>,
    ) -> Self {
        Self {
            destination_table: destination_table.into(),
            source_table: source_table.into(),
            source,
        }
    }
}

impl fmt::Debug for MigrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationUnit")
            .field("destination_table", &self.destination_table)
            .field("source_table", &self.source_table)
            .field("source", &self.source.path())
            .finish()
    }
}
