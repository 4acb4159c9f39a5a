//! Bounded migration steps.
//!
//! A step relocates at most one batch of rows from a unit's source table
//! to its destination table. Steps hold the destination write gate for
//! their whole duration, so application writes and row relocation never
//! interleave within a batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use super::error::StepError;
use super::unit::MigrationUnit;
use crate::error::Error;
use crate::storage::{Database, Row, RowKey};

/// Tuning for migration steps.
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// Maximum rows relocated per step.
    pub batch_size: usize,
    /// How long a step waits for the destination write gate before
    /// reporting Busy.
    pub lock_timeout: Duration,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            lock_timeout: Duration::from_millis(100),
        }
    }
}

/// Result of one successful step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    /// Source rows consumed by this step.
    pub rows_moved: u64,
    /// True when no source rows remain after this step.
    pub source_exhausted: bool,
}

/// Executes bounded migration steps against one destination database.
pub struct StepExecutor {
    destination: Arc<Database>,
    config: StepConfig,
}

impl StepExecutor {
    /// Create a step executor.
    pub fn new(destination: Arc<Database>, config: StepConfig) -> Self {
        Self {
            destination,
            config,
        }
    }

    /// Move one batch of rows for the unit.
    ///
    /// Returns [`StepError::Busy`] without side effects when the write
    /// gate cannot be taken within the configured timeout.
    #[instrument(skip(self))]
    pub fn run_step(&self, unit: &MigrationUnit) -> Result<StepResult, StepError> {
        let _gate = self
            .destination
            .try_lock_writes(self.config.lock_timeout)
            .ok_or_else(|| StepError::Busy(unit.destination_table.clone()))?;

        // Everything still in the source is unmigrated, so the batch is
        // always the lowest remaining keys. One extra row tells us whether
        // this batch drains the table.
        let mut batch = unit
            .source
            .scan_from(
                &unit.source_table,
                None,
                Some(self.config.batch_size.saturating_add(1)),
            )
            .map_err(|e| Self::source_error(unit, e))?;
        let source_exhausted = batch.len() <= self.config.batch_size;
        batch.truncate(self.config.batch_size);

        if batch.is_empty() {
            return Ok(StepResult {
                rows_moved: 0,
                source_exhausted: true,
            });
        }

        // Destination wins on key collisions: the stale source copy is
        // consumed without overwriting the newer destination row.
        let mut moves: Vec<(RowKey, Option<Row>)> = Vec::with_capacity(batch.len());
        for (key, row) in batch {
            let shadowed = self
                .destination
                .contains_key(&unit.destination_table, &key)
                .map_err(StepError::Storage)?;
            moves.push((key, if shadowed { None } else { Some(row) }));
        }

        let rows_moved = moves.len() as u64;
        if Arc::ptr_eq(&self.destination, &unit.source) {
            self.commit_same_database(unit, &moves)?;
        } else {
            self.commit_cross_database(unit, &moves)?;
        }

        debug!(
            table = %unit.destination_table,
            rows_moved,
            source_exhausted,
            "Migration step committed"
        );

        Ok(StepResult {
            rows_moved,
            source_exhausted,
        })
    }

    /// Inserts and deletes land in one transaction across the two tables.
    fn commit_same_database(
        &self,
        unit: &MigrationUnit,
        moves: &[(RowKey, Option<Row>)],
    ) -> Result<(), StepError> {
        let mut batch = self.destination.write_batch();
        for (key, row) in moves {
            if let Some(row) = row {
                batch.put(&unit.destination_table, row.clone());
            }
            batch.delete(&unit.source_table, key.clone());
        }
        batch.commit().map_err(|e| Self::destination_error(unit, e))
    }

    /// Two commits across two files: rows land durably in the destination
    /// before they leave the source. A crash in between leaves a key
    /// present in both; the union read hides the stale source copy and a
    /// later step consumes it.
    fn commit_cross_database(
        &self,
        unit: &MigrationUnit,
        moves: &[(RowKey, Option<Row>)],
    ) -> Result<(), StepError> {
        let mut inserts = self.destination.write_batch();
        for (_, row) in moves {
            if let Some(row) = row {
                inserts.put(&unit.destination_table, row.clone());
            }
        }
        inserts
            .commit()
            .map_err(|e| Self::destination_error(unit, e))?;
        self.destination.flush().map_err(StepError::Storage)?;

        let mut deletes = unit.source.write_batch();
        for (key, _) in moves {
            deletes.delete(&unit.source_table, key.clone());
        }
        deletes.commit().map_err(|e| Self::source_error(unit, e))
    }

    fn source_error(unit: &MigrationUnit, error: Error) -> StepError {
        StepError::SourceUnavailable {
            table: unit.source_table.clone(),
            reason: error.to_string(),
        }
    }

    fn destination_error(unit: &MigrationUnit, error: Error) -> StepError {
        match error {
            Error::RowMismatch { reason, .. } => StepError::SchemaMismatch {
                table: unit.destination_table.clone(),
                reason,
            },
            other => StepError::Storage(other),
        }
    }
}
