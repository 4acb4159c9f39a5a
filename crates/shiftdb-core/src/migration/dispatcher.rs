//! Round-robin scheduling of migration units.
//!
//! The dispatcher owns every registered unit, picks which one steps
//! next, and applies the outcome: advancing state, flipping the table
//! route at transitions, and dropping drained source tables. The
//! registry lock is never held while a step touches storage.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::error::{ConfigError, StepError};
use super::stepper::{StepExecutor, StepResult};
use super::unit::{FailReason, MigrationState, MigrationUnit};
use crate::query::{SourceRef, TableRoute, TableRouter};
use crate::schema::TableDef;
use crate::storage::Database;

/// Outcome of one dispatcher pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A unit moved rows and has more to do.
    Advanced {
        /// Destination table of the unit that stepped.
        table: String,
        /// Source rows consumed by this step.
        rows_moved: u64,
    },
    /// A unit drained its source and is now complete.
    UnitCompleted {
        /// Destination table of the completed unit.
        table: String,
    },
    /// A unit hit a permanent error and stopped.
    UnitFailed {
        /// Destination table of the failed unit.
        table: String,
        /// Why it stopped.
        reason: FailReason,
    },
    /// A runnable unit lost the write gate; nothing changed. Try later.
    Deferred {
        /// Destination table of the deferred unit.
        table: String,
    },
    /// Every registered unit is in a terminal state.
    NoWorkRemaining,
}

/// Live state of one registered unit.
struct UnitSlot {
    destination_table: String,
    source_table: String,
    state: MigrationState,
    rows_moved: u64,
    /// Claimed while a step for this unit runs outside the registry lock.
    in_flight: bool,
    /// Present while the unit is active. Dropped at terminal transitions
    /// so shared source handles can close.
    source: Option<Arc<Database>>,
}

struct Registry {
    slots: Vec<UnitSlot>,
    /// Round-robin position of the next unit to try.
    cursor: usize,
}

/// Owns registered units and drives them one bounded step at a time.
pub struct MigrationDispatcher {
    destination: Arc<Database>,
    router: Arc<TableRouter>,
    registry: Mutex<Registry>,
}

impl MigrationDispatcher {
    /// Create a dispatcher for one destination database.
    pub fn new(destination: Arc<Database>, router: Arc<TableRouter>) -> Self {
        Self {
            destination,
            router,
            registry: Mutex::new(Registry {
                slots: vec![],
                cursor: 0,
            }),
        }
    }

    /// Check a unit without registering it.
    pub fn validate(&self, unit: &MigrationUnit) -> Result<(), ConfigError> {
        if Arc::ptr_eq(&self.destination, &unit.source)
            && unit.destination_table == unit.source_table
        {
            return Err(ConfigError::IncompatibleSchema {
                source: unit.source_table.clone(),
                destination: unit.destination_table.clone(),
                reason: "a table cannot migrate into itself".to_string(),
            });
        }
        let destination_def = self
            .destination
            .table(&unit.destination_table)
            .ok_or_else(|| ConfigError::UnknownDestination(unit.destination_table.clone()))?;
        let source_def = unit
            .source
            .table(&unit.source_table)
            .ok_or_else(|| ConfigError::UnknownSource(unit.source_table.clone()))?;
        Self::check_compatible(&source_def, &destination_def)?;

        let registry = self.registry.lock();
        if registry
            .slots
            .iter()
            .any(|slot| slot.destination_table == unit.destination_table)
        {
            return Err(ConfigError::DuplicateDestination(
                unit.destination_table.clone(),
            ));
        }
        Ok(())
    }

    /// Register a unit and route its destination through the union view.
    ///
    /// From this moment reads of the destination table see unmigrated
    /// source rows; the first step may run much later.
    pub fn register(&self, unit: MigrationUnit) -> Result<(), ConfigError> {
        self.validate(&unit)?;

        let mut registry = self.registry.lock();
        if registry
            .slots
            .iter()
            .any(|slot| slot.destination_table == unit.destination_table)
        {
            return Err(ConfigError::DuplicateDestination(unit.destination_table));
        }

        self.router.set_route(
            &unit.destination_table,
            TableRoute::UnionWithSource(SourceRef {
                database: unit.source.clone(),
                table: unit.source_table.clone(),
            }),
        );
        info!(
            destination = %unit.destination_table,
            source = %unit.source_table,
            "Migration registered"
        );
        registry.slots.push(UnitSlot {
            destination_table: unit.destination_table,
            source_table: unit.source_table,
            state: MigrationState::Pending,
            rows_moved: 0,
            in_flight: false,
            source: Some(unit.source),
        });
        Ok(())
    }

    /// Run one bounded step on the next runnable unit.
    pub fn step_once(&self, stepper: &StepExecutor) -> StepOutcome {
        let picked = {
            let mut registry = self.registry.lock();
            let len = registry.slots.len();
            if len == 0 {
                return StepOutcome::NoWorkRemaining;
            }
            let mut picked = None;
            for offset in 0..len {
                let idx = (registry.cursor + offset) % len;
                let slot = &mut registry.slots[idx];
                if slot.in_flight || !slot.state.is_active() {
                    continue;
                }
                let Some(source) = slot.source.clone() else {
                    continue;
                };
                slot.in_flight = true;
                if slot.state == MigrationState::Pending {
                    Self::advance(slot, MigrationState::InProgress);
                }
                let unit = MigrationUnit::new(
                    slot.destination_table.clone(),
                    slot.source_table.clone(),
                    source,
                );
                registry.cursor = (idx + 1) % len;
                picked = Some((idx, unit));
                break;
            }
            picked
        };

        let Some((idx, unit)) = picked else {
            let registry = self.registry.lock();
            return match registry.slots.iter().find(|slot| slot.state.is_active()) {
                // Active units exist but their steps are running elsewhere.
                Some(slot) => StepOutcome::Deferred {
                    table: slot.destination_table.clone(),
                },
                None => StepOutcome::NoWorkRemaining,
            };
        };

        match stepper.run_step(&unit) {
            Ok(result) => self.apply_step(idx, &unit, result),
            Err(StepError::Busy(_)) => {
                self.registry.lock().slots[idx].in_flight = false;
                StepOutcome::Deferred {
                    table: unit.destination_table,
                }
            }
            Err(error) => self.apply_failure(idx, &unit, &error),
        }
    }

    /// Whether the given table (or any table) still has an active unit.
    ///
    /// Computed from unit states on every call; completed and failed
    /// units are not migrating.
    pub fn is_migrating(&self, table: Option<&str>) -> bool {
        let registry = self.registry.lock();
        registry.slots.iter().any(|slot| {
            slot.state.is_active() && table.map_or(true, |t| slot.destination_table == t)
        })
    }

    /// Lifecycle state of the unit migrating into `table`.
    pub fn status(&self, table: &str) -> Option<MigrationState> {
        let registry = self.registry.lock();
        registry
            .slots
            .iter()
            .find(|slot| slot.destination_table == table)
            .map(|slot| slot.state)
    }

    /// Total source rows consumed by the unit migrating into `table`.
    pub fn rows_moved(&self, table: &str) -> Option<u64> {
        let registry = self.registry.lock();
        registry
            .slots
            .iter()
            .find(|slot| slot.destination_table == table)
            .map(|slot| slot.rows_moved)
    }

    fn apply_step(&self, idx: usize, unit: &MigrationUnit, result: StepResult) -> StepOutcome {
        {
            let mut registry = self.registry.lock();
            let slot = &mut registry.slots[idx];
            slot.rows_moved += result.rows_moved;
            if !result.source_exhausted {
                slot.in_flight = false;
                return StepOutcome::Advanced {
                    table: unit.destination_table.clone(),
                    rows_moved: result.rows_moved,
                };
            }
            // Keep the in_flight claim while completion runs below.
        }

        // The source is drained. Readers flip to the direct route first,
        // then the empty source table goes away under the write gate.
        self.router
            .set_route(&unit.destination_table, TableRoute::Direct);
        {
            let _gate = self.destination.lock_writes();
            if let Err(error) = unit.source.drop_table(&unit.source_table) {
                warn!(
                    table = %unit.source_table,
                    error = %error,
                    "Failed to drop drained source table"
                );
            }
        }

        let mut registry = self.registry.lock();
        let slot = &mut registry.slots[idx];
        Self::advance(slot, MigrationState::Completed);
        slot.source = None;
        slot.in_flight = false;
        StepOutcome::UnitCompleted {
            table: unit.destination_table.clone(),
        }
    }

    fn apply_failure(&self, idx: usize, unit: &MigrationUnit, error: &StepError) -> StepOutcome {
        let reason = match error {
            StepError::SourceUnavailable { .. } => FailReason::SourceUnavailable,
            StepError::SchemaMismatch { .. } => FailReason::SchemaMismatch,
            StepError::Busy(_) | StepError::Storage(_) => FailReason::Storage,
        };
        warn!(
            table = %unit.destination_table,
            error = %error,
            "Migration step failed"
        );

        if reason == FailReason::SourceUnavailable {
            // Nothing is readable behind the union view; stop consulting it.
            self.router
                .set_route(&unit.destination_table, TableRoute::Direct);
        }

        let mut registry = self.registry.lock();
        let slot = &mut registry.slots[idx];
        Self::advance(slot, MigrationState::Failed(reason));
        slot.source = None;
        slot.in_flight = false;
        StepOutcome::UnitFailed {
            table: unit.destination_table.clone(),
            reason,
        }
    }

    fn advance(slot: &mut UnitSlot, next: MigrationState) {
        if slot.state.can_advance(next) {
            info!(
                table = %slot.destination_table,
                from = %slot.state,
                to = %next,
                "Migration state changed"
            );
            slot.state = next;
        }
    }

    fn check_compatible(source: &TableDef, destination: &TableDef) -> Result<(), ConfigError> {
        let incompatible = |reason: String| ConfigError::IncompatibleSchema {
            source: source.name.clone(),
            destination: destination.name.clone(),
            reason,
        };

        if source.columns.len() != destination.columns.len() {
            return Err(incompatible(format!(
                "column count differs ({} vs {})",
                source.columns.len(),
                destination.columns.len()
            )));
        }
        for (src, dst) in source.columns.iter().zip(&destination.columns) {
            if src.name != dst.name {
                return Err(incompatible(format!(
                    "column {} does not line up with {}",
                    src.name, dst.name
                )));
            }
            if src.nullable && !dst.nullable {
                return Err(incompatible(format!(
                    "column {} may hold nulls the destination rejects",
                    src.name
                )));
            }
        }
        if source.key_column != destination.key_column {
            return Err(incompatible(format!(
                "key column {} does not match {}",
                source.key_column, destination.key_column
            )));
        }
        // Source keys become destination keys directly, so the storage
        // classes must agree exactly.
        match (
            source.column(&source.key_column),
            destination.column(&destination.key_column),
        ) {
            (Some((_, src)), Some((_, dst))) if src.column_type == dst.column_type => Ok(()),
            (Some(_), Some(_)) => Err(incompatible("key column types differ".to_string())),
            _ => Err(incompatible("key column missing".to_string())),
        }
    }
}
