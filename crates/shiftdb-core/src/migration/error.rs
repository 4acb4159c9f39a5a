//! Migration error types.

use thiserror::Error;

/// Errors raised while configuring or registering migrations.
///
/// These indicate caller mistakes and are reported before any unit is
/// registered; they are never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Cross-database migration requested without a source path.
    #[error("cross-database migration requires a source path")]
    MissingSourcePath,

    /// The source database could not be opened.
    #[error("cannot open source database at {path}: {reason}")]
    SourceOpenFailed {
        /// Path of the source database.
        path: String,
        /// Why the open failed.
        reason: String,
    },

    /// A migration into this destination table is already registered.
    #[error("migration already registered for table {0}")]
    DuplicateDestination(String),

    /// The destination table is not defined.
    #[error("destination table {0} does not exist")]
    UnknownDestination(String),

    /// The source table is not defined in the source database.
    #[error("source table {0} does not exist")]
    UnknownSource(String),

    /// Source and destination schemas cannot hold the same rows.
    #[error("schema of {source} is incompatible with {destination}: {reason}")]
    IncompatibleSchema {
        /// Source table name.
        ///
        /// Raw identifier so thiserror does not treat it as `Error::source`.
        r#source: String,
        /// Destination table name.
        destination: String,
        /// What does not line up.
        reason: String,
    },

    /// Storage error while validating the configuration.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

/// Errors raised by a single migration step.
#[derive(Debug, Error)]
pub enum StepError {
    /// The destination write gate could not be acquired in time.
    ///
    /// Transient: no state changed and no rows moved. The step is retried
    /// on a later pass.
    #[error("write gate busy for table {0}")]
    Busy(String),

    /// The source table or database has become unreadable.
    ///
    /// Permanent for this unit.
    #[error("source table {table} unavailable: {reason}")]
    SourceUnavailable {
        /// Source table name.
        table: String,
        /// Why the source could not be read.
        reason: String,
    },

    /// A source row no longer fits the destination schema.
    ///
    /// Permanent for this unit.
    #[error("source rows do not fit destination table {table}: {reason}")]
    SchemaMismatch {
        /// Destination table name.
        table: String,
        /// What does not fit.
        reason: String,
    },

    /// The storage layer failed while moving rows.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

/// Errors surfaced by the migration coordinator.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Configuration was rejected.
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigError),

    /// A step failed.
    #[error("step failed: {0}")]
    Step(#[from] StepError),

    /// The wait deadline passed before the watched migrations finished.
    #[error("timed out waiting for migration to finish")]
    WaitTimedOut,
}
