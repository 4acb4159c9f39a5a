//! Embedded storage engine with online table migration.
//!
//! shiftdb moves rows from old tables into new ones in small crash-safe
//! steps while the database stays fully readable and writable. Tables
//! can migrate within one database file or from a separately opened
//! source file, with an optional cipher key for keyed sources. Until a
//! table's source drains, reads see the union of both tables and writes
//! land in the destination while consuming stale source copies, so
//! callers never observe a half-migrated table.
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use shiftdb_core::{
//!     Database, DatabaseConfig, MigrationCoordinator, MigrationSettings, StatementExecutor,
//!     StepConfig, TableRouter,
//! };
//!
//! let database = Arc::new(Database::open(DatabaseConfig::new("./data"))?);
//! let router = Arc::new(TableRouter::new());
//! let executor = StatementExecutor::new(database.clone(), router.clone());
//!
//! let coordinator = MigrationCoordinator::new(database, router, StepConfig::default());
//! coordinator.configure(
//!     MigrationSettings::new()
//!         .migrate("accounts", "accounts_old")
//!         .from_database("./legacy"),
//! )?;
//! coordinator.start_auto_stepping(Duration::from_millis(10));
//!
//! // Statements against "accounts" work normally throughout.
//! ```

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod error;
pub mod migration;
pub mod query;
pub mod schema;
pub mod storage;

pub use error::Error;
pub use migration::{
    ConfigError, FailReason, MigrationCoordinator, MigrationDispatcher, MigrationError,
    MigrationObserver, MigrationSettings, MigrationState, MigrationUnit, StepConfig, StepError,
    StepExecutor, StepOutcome, StepResult,
};
pub use query::{
    QueryInterceptor, RoutedStatement, SourceRef, StatementExecutor, TableRoute, TableRouter,
};
pub use schema::{ColumnDef, ColumnType, SchemaRegistry, TableDef};
pub use storage::{BatchOp, CipherKey, Database, DatabaseConfig, Row, RowKey, WriteBatch};

pub use shiftdb_proto as proto;
