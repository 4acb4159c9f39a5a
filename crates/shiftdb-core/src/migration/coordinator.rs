//! Migration lifecycle coordination.
//!
//! The coordinator is the public entry point for migrations: it turns
//! declarative [`MigrationSettings`] into registered units, caches
//! shared source database handles, runs the optional background
//! stepping thread, and tells observers and blocked waiters when a
//! table finishes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::dispatcher::{MigrationDispatcher, StepOutcome};
use super::error::{ConfigError, MigrationError};
use super::stepper::{StepConfig, StepExecutor};
use super::unit::{FailReason, MigrationState, MigrationUnit};
use crate::query::TableRouter;
use crate::storage::{CipherKey, Database, DatabaseConfig};

/// Declarative description of what to migrate.
///
/// Maps destination tables to the source tables that feed them. Sources
/// live in the destination database itself, or in a separate database
/// file when [`cross_database`](Self::cross_database) is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Destination table name to source table name.
    pub to_migrate: BTreeMap<String, String>,
    /// Whether sources live in a separate database file.
    #[serde(default)]
    pub cross_database: bool,
    /// Path of the source database file, for cross-database migration.
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// Key material for a keyed source database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_key: Option<Vec<u8>>,
}

impl MigrationSettings {
    /// Create empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one destination/source table pair.
    pub fn migrate(mut self, destination: impl Into<String>, source: impl Into<String>) -> Self {
        self.to_migrate.insert(destination.into(), source.into());
        self
    }

    /// Pull source tables from a separate database file.
    pub fn from_database(mut self, path: impl Into<PathBuf>) -> Self {
        self.cross_database = true;
        self.source_path = Some(path.into());
        self
    }

    /// Open the source database with the given key material.
    pub fn with_cipher_key(mut self, material: impl AsRef<[u8]>) -> Self {
        self.cipher_key = Some(material.as_ref().to_vec());
        self
    }
}

/// Callbacks fired when a migration reaches a terminal state.
///
/// Observers run on whichever thread drove the final step, so they
/// should return quickly and must not call back into the coordinator.
pub trait MigrationObserver: Send + Sync {
    /// The source drained and the table now serves directly.
    fn table_migrated(&self, _table: &str) {}

    /// The migration stopped on a permanent error.
    fn migration_failed(&self, _table: &str, _reason: FailReason) {}
}

/// A cached source database and the destination tables it feeds.
struct SourceHandle {
    database: Arc<Database>,
    destinations: Vec<String>,
}

/// State shared between the coordinator and its worker thread.
struct Shared {
    dispatcher: Arc<MigrationDispatcher>,
    stepper: StepExecutor,
    sources: Mutex<HashMap<PathBuf, SourceHandle>>,
    observers: Mutex<Vec<Box<dyn MigrationObserver>>>,
    done_lock: Mutex<()>,
    done: Condvar,
}

impl Shared {
    fn step_once(&self) -> StepOutcome {
        let outcome = self.dispatcher.step_once(&self.stepper);
        match &outcome {
            StepOutcome::UnitCompleted { table } => self.on_terminal(table, None),
            StepOutcome::UnitFailed { table, reason } => self.on_terminal(table, Some(*reason)),
            _ => {}
        }
        outcome
    }

    fn on_terminal(&self, table: &str, failure: Option<FailReason>) {
        self.release_finished_sources();
        {
            let observers = self.observers.lock();
            for observer in observers.iter() {
                match failure {
                    Some(reason) => observer.migration_failed(table, reason),
                    None => observer.table_migrated(table),
                }
            }
        }
        let _done = self.done_lock.lock();
        self.done.notify_all();
    }

    /// Drop cached source handles whose destinations are all terminal,
    /// closing the underlying file once nothing else holds it.
    fn release_finished_sources(&self) {
        let mut sources = self.sources.lock();
        sources.retain(|path, handle| {
            let active = handle
                .destinations
                .iter()
                .any(|table| self.dispatcher.is_migrating(Some(table)));
            if !active {
                debug!(path = %path.display(), "Released migration source database");
            }
            active
        });
    }
}

/// Drives registered migrations to completion.
pub struct MigrationCoordinator {
    destination: Arc<Database>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MigrationCoordinator {
    /// Create a coordinator for one destination database.
    pub fn new(destination: Arc<Database>, router: Arc<TableRouter>, config: StepConfig) -> Self {
        let dispatcher = Arc::new(MigrationDispatcher::new(destination.clone(), router));
        let stepper = StepExecutor::new(destination.clone(), config);
        Self {
            destination,
            shared: Arc::new(Shared {
                dispatcher,
                stepper,
                sources: Mutex::new(HashMap::new()),
                observers: Mutex::new(Vec::new()),
                done_lock: Mutex::new(()),
                done: Condvar::new(),
            }),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Register every table pair in `settings`.
    ///
    /// All pairs are validated before any unit registers, so a bad entry
    /// rejects the whole batch. Empty settings are a no-op.
    #[instrument(skip(self, settings))]
    pub fn configure(&self, settings: MigrationSettings) -> Result<(), ConfigError> {
        if settings.to_migrate.is_empty() {
            return Ok(());
        }

        let source = if settings.cross_database {
            let path = settings
                .source_path
                .clone()
                .ok_or(ConfigError::MissingSourcePath)?;
            self.open_source(&path, settings.cipher_key.as_deref())?
        } else {
            self.destination.clone()
        };

        let mut units = Vec::with_capacity(settings.to_migrate.len());
        for (destination_table, source_table) in &settings.to_migrate {
            let unit = MigrationUnit::new(
                destination_table.clone(),
                source_table.clone(),
                source.clone(),
            );
            self.shared.dispatcher.validate(&unit)?;
            units.push(unit);
        }
        for unit in units {
            self.shared.dispatcher.register(unit)?;
        }

        if settings.cross_database {
            if let Some(path) = &settings.source_path {
                let mut sources = self.shared.sources.lock();
                if let Some(handle) = sources.get_mut(path) {
                    for table in settings.to_migrate.keys() {
                        if !handle.destinations.contains(table) {
                            handle.destinations.push(table.clone());
                        }
                    }
                }
            }
        }

        info!(units = settings.to_migrate.len(), "Migration configured");
        Ok(())
    }

    /// Run one bounded migration step across all registered units.
    pub fn step_once(&self) -> StepOutcome {
        self.shared.step_once()
    }

    /// Start a background thread stepping every `interval`.
    ///
    /// The thread exits on its own once no work remains; starting while
    /// a previous worker is still running is a no-op.
    pub fn start_auto_stepping(&self, interval: Duration) {
        let mut worker = self.worker.lock();
        if worker.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let handle = thread::spawn(move || {
            info!("Migration worker started");
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if let StepOutcome::NoWorkRemaining = shared.step_once() {
                    break;
                }
                thread::sleep(interval);
            }
            info!("Migration worker stopped");
        });
        *worker = Some(handle);
    }

    /// Stop the background stepping thread and wait for it to exit.
    pub fn stop_auto_stepping(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Whether the background stepping thread is currently running.
    pub fn is_auto_stepping(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Block until the given table (or every table) stops migrating.
    ///
    /// Steps must be driven elsewhere, by the background thread or by
    /// another thread calling [`step_once`](Self::step_once).
    pub fn wait_until_done(
        &self,
        table: Option<&str>,
        timeout: Duration,
    ) -> Result<(), MigrationError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.done_lock.lock();
        loop {
            if !self.shared.dispatcher.is_migrating(table) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MigrationError::WaitTimedOut);
            }
            let _ = self.shared.done.wait_for(&mut guard, deadline - now);
        }
    }

    /// Register callbacks for terminal migration states.
    pub fn add_observer(&self, observer: Box<dyn MigrationObserver>) {
        self.shared.observers.lock().push(observer);
    }

    /// Lifecycle state of the unit migrating into `table`.
    pub fn status(&self, table: &str) -> Option<MigrationState> {
        self.shared.dispatcher.status(table)
    }

    /// Total source rows consumed by the unit migrating into `table`.
    pub fn rows_moved(&self, table: &str) -> Option<u64> {
        self.shared.dispatcher.rows_moved(table)
    }

    /// Whether any registered table is still migrating.
    pub fn is_migrating(&self) -> bool {
        self.shared.dispatcher.is_migrating(None)
    }

    /// Whether the given table is still migrating.
    pub fn is_table_migrating(&self, table: &str) -> bool {
        self.shared.dispatcher.is_migrating(Some(table))
    }

    /// Stop the worker and release cached source databases.
    pub fn shutdown(&self) {
        self.stop_auto_stepping();
        self.shared.sources.lock().clear();
        debug!("Migration coordinator shut down");
    }

    fn open_source(
        &self,
        path: &Path,
        cipher_key: Option<&[u8]>,
    ) -> Result<Arc<Database>, ConfigError> {
        let mut sources = self.shared.sources.lock();
        if let Some(handle) = sources.get(path) {
            // The key was verified when this handle first opened.
            return Ok(handle.database.clone());
        }

        let mut config = DatabaseConfig::new(path);
        if let Some(material) = cipher_key {
            config = config.with_cipher_key(CipherKey::new(material));
        }
        let database =
            Arc::new(
                Database::open(config).map_err(|e| ConfigError::SourceOpenFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?,
            );
        sources.insert(
            path.to_path_buf(),
            SourceHandle {
                database: database.clone(),
                destinations: Vec::new(),
            },
        );
        Ok(database)
    }
}

impl Drop for MigrationCoordinator {
    fn drop(&mut self) {
        self.stop_auto_stepping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType, TableDef};
    use crate::storage::Row;
    use shiftdb_proto::Value;

    fn items(name: &str) -> TableDef {
        TableDef::new(name, "id")
            .with_column(ColumnDef::not_null("id", ColumnType::Integer))
            .with_column(ColumnDef::not_null("val", ColumnType::Text))
    }

    fn coordinator_over(tables: &[&str]) -> (Arc<Database>, MigrationCoordinator) {
        let db = Arc::new(Database::open(DatabaseConfig::temporary()).unwrap());
        for name in tables {
            db.create_table(items(name)).unwrap();
        }
        let router = Arc::new(TableRouter::new());
        let coordinator = MigrationCoordinator::new(db.clone(), router, StepConfig::default());
        (db, coordinator)
    }

    #[derive(Clone)]
    struct Recording {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl MigrationObserver for Recording {
        fn table_migrated(&self, table: &str) {
            self.events.lock().push(format!("done:{table}"));
        }

        fn migration_failed(&self, table: &str, reason: FailReason) {
            self.events.lock().push(format!("failed:{table}:{reason}"));
        }
    }

    #[test]
    fn test_settings_builders() {
        let settings = MigrationSettings::new()
            .migrate("accounts", "accounts_old")
            .migrate("orders", "orders_old")
            .from_database("/data/legacy")
            .with_cipher_key(b"secret");
        assert_eq!(settings.to_migrate.len(), 2);
        assert_eq!(
            settings.to_migrate.get("accounts").map(String::as_str),
            Some("accounts_old")
        );
        assert!(settings.cross_database);
        assert_eq!(settings.source_path, Some(PathBuf::from("/data/legacy")));
        assert_eq!(settings.cipher_key.as_deref(), Some(&b"secret"[..]));
    }

    #[test]
    fn test_empty_settings_are_a_no_op() {
        let (_db, coordinator) = coordinator_over(&[]);
        coordinator.configure(MigrationSettings::new()).unwrap();
        assert!(!coordinator.is_migrating());
        assert_eq!(coordinator.step_once(), StepOutcome::NoWorkRemaining);
    }

    #[test]
    fn test_cross_database_requires_a_path() {
        let (_db, coordinator) = coordinator_over(&["new_a"]);
        let mut settings = MigrationSettings::new().migrate("new_a", "old_a");
        settings.cross_database = true;
        assert!(matches!(
            coordinator.configure(settings),
            Err(ConfigError::MissingSourcePath)
        ));
    }

    #[test]
    fn test_bad_pair_rejects_the_whole_batch() {
        let (db, coordinator) = coordinator_over(&["new_a", "old_a", "new_b"]);
        let settings = MigrationSettings::new()
            .migrate("new_a", "old_a")
            .migrate("new_b", "missing");
        assert!(matches!(
            coordinator.configure(settings),
            Err(ConfigError::UnknownSource(_))
        ));
        // The valid pair must not have been registered either.
        assert!(!coordinator.is_table_migrating("new_a"));
        assert_eq!(coordinator.status("new_a"), None);
        drop(db);
    }

    #[test]
    fn test_manual_stepping_completes_and_notifies() {
        let (db, coordinator) = coordinator_over(&["new_a", "old_a"]);
        for id in 0..10i64 {
            db.put(
                "old_a",
                Row::new(vec![Value::Integer(id), Value::Text("v".into())]),
            )
            .unwrap();
        }
        let recording = Recording {
            events: Arc::new(Mutex::new(Vec::new())),
        };
        coordinator.add_observer(Box::new(recording.clone()));
        coordinator
            .configure(MigrationSettings::new().migrate("new_a", "old_a"))
            .unwrap();
        assert!(coordinator.is_table_migrating("new_a"));

        loop {
            match coordinator.step_once() {
                StepOutcome::Advanced { .. } => continue,
                StepOutcome::UnitCompleted { table } => {
                    assert_eq!(table, "new_a");
                    break;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }

        assert_eq!(coordinator.status("new_a"), Some(MigrationState::Completed));
        assert_eq!(coordinator.rows_moved("new_a"), Some(10));
        assert_eq!(recording.events.lock().as_slice(), ["done:new_a"]);
        assert!(!coordinator.is_migrating());
    }

    #[test]
    fn test_failed_migration_notifies_observers() {
        let (db, coordinator) = coordinator_over(&["old_a"]);
        db.create_table(
            TableDef::new("new_a", "id")
                .with_column(ColumnDef::not_null("id", ColumnType::Integer))
                .with_column(ColumnDef::not_null("val", ColumnType::Integer)),
        )
        .unwrap();
        db.put(
            "old_a",
            Row::new(vec![Value::Integer(1), Value::Text("text".into())]),
        )
        .unwrap();

        let recording = Recording {
            events: Arc::new(Mutex::new(Vec::new())),
        };
        coordinator.add_observer(Box::new(recording.clone()));
        coordinator
            .configure(MigrationSettings::new().migrate("new_a", "old_a"))
            .unwrap();

        assert!(matches!(
            coordinator.step_once(),
            StepOutcome::UnitFailed { .. }
        ));
        assert_eq!(
            recording.events.lock().as_slice(),
            ["failed:new_a:schema mismatch"]
        );
    }

    #[test]
    fn test_wait_times_out_without_stepping() {
        let (db, coordinator) = coordinator_over(&["new_a", "old_a"]);
        db.put(
            "old_a",
            Row::new(vec![Value::Integer(1), Value::Text("v".into())]),
        )
        .unwrap();
        coordinator
            .configure(MigrationSettings::new().migrate("new_a", "old_a"))
            .unwrap();

        let outcome = coordinator.wait_until_done(None, Duration::from_millis(50));
        assert!(matches!(outcome, Err(MigrationError::WaitTimedOut)));
    }

    #[test]
    fn test_auto_stepping_drains_and_exits() {
        let (db, coordinator) = coordinator_over(&["new_a", "old_a"]);
        for id in 0..50i64 {
            db.put(
                "old_a",
                Row::new(vec![Value::Integer(id), Value::Text("v".into())]),
            )
            .unwrap();
        }
        coordinator
            .configure(MigrationSettings::new().migrate("new_a", "old_a"))
            .unwrap();

        coordinator.start_auto_stepping(Duration::from_millis(1));
        coordinator
            .wait_until_done(Some("new_a"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(coordinator.status("new_a"), Some(MigrationState::Completed));
        assert_eq!(coordinator.rows_moved("new_a"), Some(50));
        assert_eq!(db.count("new_a").unwrap(), 50);
        coordinator.stop_auto_stepping();
        assert!(!coordinator.is_auto_stepping());
    }
}
