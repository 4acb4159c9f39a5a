//! Online table migration.
//!
//! Moves rows from a source table into a destination table in small
//! crash-safe steps while both stay fully readable and writable. Reads
//! of a migrating table are served from the union of destination and
//! source until the source drains; writes land in the destination and
//! consume any stale source copy. Progress needs no persisted cursor,
//! so an interrupted migration resumes from whatever rows remain.

mod coordinator;
mod dispatcher;
mod error;
mod stepper;
mod unit;

pub use coordinator::{MigrationCoordinator, MigrationObserver, MigrationSettings};
pub use dispatcher::{MigrationDispatcher, StepOutcome};
pub use error::{ConfigError, MigrationError, StepError};
pub use stepper::{StepConfig, StepExecutor, StepResult};
pub use unit::{FailReason, MigrationState, MigrationUnit};
