//! Integration tests for online table migration.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use shiftdb_core::{
    CipherKey, ColumnDef, ColumnType, ConfigError, Database, DatabaseConfig, FailReason,
    MigrationCoordinator, MigrationError, MigrationObserver, MigrationSettings, MigrationState,
    Row, StatementExecutor, StepConfig, StepOutcome, TableDef, TableRouter,
};
use shiftdb_proto::{Count, Delete, Insert, Select, Statement, Update, Value};

struct TestContext {
    destination: Arc<Database>,
    router: Arc<TableRouter>,
    executor: StatementExecutor,
    coordinator: MigrationCoordinator,
    source_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self::with_step_config(StepConfig::default())
    }

    fn with_step_config(config: StepConfig) -> Self {
        let destination = Arc::new(Database::open(DatabaseConfig::temporary()).unwrap());
        let router = Arc::new(TableRouter::new());
        let executor = StatementExecutor::new(destination.clone(), router.clone());
        let coordinator = MigrationCoordinator::new(destination.clone(), router.clone(), config);

        Self {
            destination,
            router,
            executor,
            coordinator,
            source_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn source_path(&self) -> PathBuf {
        self.source_dir.path().to_path_buf()
    }
}

fn accounts(name: &str) -> TableDef {
    TableDef::new(name, "id")
        .with_column(ColumnDef::not_null("id", ColumnType::Integer))
        .with_column(ColumnDef::not_null("name", ColumnType::Text))
        .with_column(ColumnDef::new("balance", ColumnType::Integer))
}

fn account(id: i64, name: &str, balance: i64) -> Row {
    Row::new(vec![
        Value::Integer(id),
        Value::Text(name.to_string()),
        Value::Integer(balance),
    ])
}

/// Create and fill a source table in its own database file, then close
/// the handle so the coordinator can take the file lock.
fn seed_source(ctx: &TestContext, table: &str, rows: i64) {
    seed_source_with(ctx, table, rows, None);
}

fn seed_source_with(ctx: &TestContext, table: &str, rows: i64, cipher: Option<&[u8]>) {
    let mut config = DatabaseConfig::new(ctx.source_dir.path());
    if let Some(material) = cipher {
        config = config.with_cipher_key(CipherKey::new(material));
    }
    let source = Database::open(config).unwrap();
    source.create_table(accounts(table)).unwrap();
    for id in 0..rows {
        source
            .put(table, account(id, &format!("acct{id}"), id * 10))
            .unwrap();
    }
    source.flush().unwrap();
}

fn count(ctx: &TestContext, table: &str) -> u64 {
    ctx.executor
        .execute(Statement::from(Count::new(table)))
        .unwrap()
        .count()
        .unwrap()
}

fn select_ids(ctx: &TestContext, table: &str) -> Vec<i64> {
    let output = ctx
        .executor
        .execute(Statement::from(Select::new(table)))
        .unwrap();
    output
        .rows()
        .unwrap()
        .rows
        .iter()
        .map(|row| row[0].as_integer().unwrap())
        .collect()
}

fn select_name(ctx: &TestContext, table: &str, id: i64) -> Option<String> {
    let output = ctx
        .executor
        .execute(Statement::from(
            Select::new(table).with_key(Value::Integer(id)),
        ))
        .unwrap();
    output
        .rows()
        .unwrap()
        .rows
        .first()
        .map(|row| row[1].as_text().unwrap().to_string())
}

fn step_until_done(ctx: &TestContext) {
    loop {
        match ctx.coordinator.step_once() {
            StepOutcome::NoWorkRemaining => break,
            StepOutcome::Deferred { table } => panic!("step deferred for {table}"),
            _ => {}
        }
    }
}

struct RecordingObserver {
    events: Arc<StdMutex<Vec<String>>>,
}

impl MigrationObserver for RecordingObserver {
    fn table_migrated(&self, table: &str) {
        self.events.lock().unwrap().push(format!("done:{table}"));
    }

    fn migration_failed(&self, table: &str, reason: FailReason) {
        self.events
            .lock()
            .unwrap()
            .push(format!("failed:{table}:{reason}"));
    }
}

// ============== Tests ==============

#[test]
fn test_cross_database_migration_end_to_end() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    seed_source(&ctx, "accounts_old", 10_000);

    ctx.coordinator
        .configure(
            MigrationSettings::new()
                .migrate("accounts", "accounts_old")
                .from_database(ctx.source_path()),
        )
        .unwrap();
    assert!(ctx.coordinator.is_table_migrating("accounts"));

    ctx.coordinator.start_auto_stepping(Duration::from_millis(1));
    ctx.coordinator
        .wait_until_done(None, Duration::from_secs(60))
        .unwrap();

    assert_eq!(
        ctx.coordinator.status("accounts"),
        Some(MigrationState::Completed)
    );
    assert_eq!(ctx.coordinator.rows_moved("accounts"), Some(10_000));
    assert_eq!(count(&ctx, "accounts"), 10_000);
    assert_eq!(select_name(&ctx, "accounts", 0).as_deref(), Some("acct0"));
    assert_eq!(
        select_name(&ctx, "accounts", 4321).as_deref(),
        Some("acct4321")
    );
    assert_eq!(
        select_name(&ctx, "accounts", 9_999).as_deref(),
        Some("acct9999")
    );
    assert!(ctx.router.is_direct("accounts"));

    // The drained source table is gone from the source file.
    ctx.coordinator.shutdown();
    let source = Database::open(DatabaseConfig::new(ctx.source_dir.path())).unwrap();
    assert!(!source.has_table("accounts_old"));
}

#[test]
fn test_same_database_migration() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    for id in 0..100 {
        ctx.destination
            .put("accounts_old", account(id, &format!("acct{id}"), 0))
            .unwrap();
    }

    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();
    step_until_done(&ctx);

    assert_eq!(
        ctx.coordinator.status("accounts"),
        Some(MigrationState::Completed)
    );
    assert_eq!(count(&ctx, "accounts"), 100);
    assert!(!ctx.destination.has_table("accounts_old"));
    assert!(ctx.router.is_direct("accounts"));
}

#[test]
fn test_destination_rows_survive_collisions() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    for id in 0..10 {
        ctx.destination
            .put("accounts_old", account(id, "stale", 0))
            .unwrap();
    }
    // A prefix of the rows was already written to the destination with
    // newer values.
    for id in 0..5 {
        ctx.destination
            .put("accounts", account(id, "kept", 1))
            .unwrap();
    }

    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();
    step_until_done(&ctx);

    assert_eq!(count(&ctx, "accounts"), 10);
    assert_eq!(ctx.coordinator.rows_moved("accounts"), Some(10));
    for id in 0..5 {
        assert_eq!(select_name(&ctx, "accounts", id).as_deref(), Some("kept"));
    }
    for id in 5..10 {
        assert_eq!(select_name(&ctx, "accounts", id).as_deref(), Some("stale"));
    }
}

#[test]
fn test_writes_interleave_with_migration() {
    let ctx = TestContext::with_step_config(StepConfig {
        batch_size: 2,
        ..StepConfig::default()
    });
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    for id in 0..10 {
        ctx.destination
            .put("accounts_old", account(id, "orig", 0))
            .unwrap();
    }
    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();

    // First step moves ids 0 and 1.
    assert!(matches!(
        ctx.coordinator.step_once(),
        StepOutcome::Advanced { .. }
    ));

    // Application writes land while the table is mid-migration.
    ctx.executor
        .execute(Statement::from(Insert::new("accounts").with_row(vec![
            Value::Integer(100),
            Value::Text("inserted".into()),
            Value::Integer(0),
        ])))
        .unwrap();
    ctx.executor
        .execute(Statement::from(
            Update::new("accounts", Value::Integer(7)).set("name", "updated"),
        ))
        .unwrap();
    ctx.executor
        .execute(Statement::from(Delete::new("accounts", Value::Integer(8))))
        .unwrap();

    step_until_done(&ctx);

    assert_eq!(count(&ctx, "accounts"), 10);
    assert_eq!(select_name(&ctx, "accounts", 7).as_deref(), Some("updated"));
    assert_eq!(select_name(&ctx, "accounts", 8), None);
    assert_eq!(
        select_name(&ctx, "accounts", 100).as_deref(),
        Some("inserted")
    );
    assert_eq!(
        select_ids(&ctx, "accounts"),
        vec![0, 1, 2, 3, 4, 5, 6, 7, 9, 100]
    );
}

#[test]
fn test_step_defers_while_writer_holds_the_gate() {
    let ctx = TestContext::with_step_config(StepConfig {
        lock_timeout: Duration::from_millis(20),
        ..StepConfig::default()
    });
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    ctx.destination
        .put("accounts_old", account(1, "one", 0))
        .unwrap();
    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();

    let gate = ctx.destination.lock_writes();
    assert!(matches!(
        ctx.coordinator.step_once(),
        StepOutcome::Deferred { .. }
    ));
    assert!(ctx.coordinator.is_table_migrating("accounts"));
    drop(gate);

    assert!(matches!(
        ctx.coordinator.step_once(),
        StepOutcome::UnitCompleted { .. }
    ));
}

#[test]
fn test_leftover_destination_copy_is_idempotent() {
    // A crash between the destination commit and the source delete
    // leaves the same key on both sides. Rerunning the migration must
    // consume the stale copy without touching the newer one.
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    for id in 0..6 {
        ctx.destination
            .put("accounts_old", account(id, "orig", 0))
            .unwrap();
    }
    ctx.destination
        .put("accounts", account(3, "moved-then-updated", 7))
        .unwrap();

    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();
    step_until_done(&ctx);

    assert_eq!(count(&ctx, "accounts"), 6);
    assert_eq!(ctx.coordinator.rows_moved("accounts"), Some(6));
    assert_eq!(
        select_name(&ctx, "accounts", 3).as_deref(),
        Some("moved-then-updated")
    );
    assert_eq!(select_ids(&ctx, "accounts"), vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn test_keyed_source_requires_matching_key() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    seed_source_with(&ctx, "accounts_old", 20, Some(b"right-key"));

    let plain = MigrationSettings::new()
        .migrate("accounts", "accounts_old")
        .from_database(ctx.source_path());
    assert!(matches!(
        ctx.coordinator.configure(plain),
        Err(ConfigError::SourceOpenFailed { .. })
    ));

    let wrong = MigrationSettings::new()
        .migrate("accounts", "accounts_old")
        .from_database(ctx.source_path())
        .with_cipher_key(b"wrong-key");
    assert!(matches!(
        ctx.coordinator.configure(wrong),
        Err(ConfigError::SourceOpenFailed { .. })
    ));

    let right = MigrationSettings::new()
        .migrate("accounts", "accounts_old")
        .from_database(ctx.source_path())
        .with_cipher_key(b"right-key");
    ctx.coordinator.configure(right).unwrap();
    step_until_done(&ctx);
    assert_eq!(count(&ctx, "accounts"), 20);
}

#[test]
fn test_rows_moved_accounts_for_every_source_row() {
    let ctx = TestContext::with_step_config(StepConfig {
        batch_size: 64,
        ..StepConfig::default()
    });
    ctx.destination.create_table(accounts("accounts")).unwrap();
    seed_source(&ctx, "accounts_old", 1000);

    ctx.coordinator
        .configure(
            MigrationSettings::new()
                .migrate("accounts", "accounts_old")
                .from_database(ctx.source_path()),
        )
        .unwrap();

    let mut advanced_total = 0u64;
    loop {
        match ctx.coordinator.step_once() {
            StepOutcome::Advanced { rows_moved, .. } => advanced_total += rows_moved,
            StepOutcome::UnitCompleted { .. } => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    // The completing step's rows only show in the dispatcher total.
    assert!(advanced_total < 1000);
    assert_eq!(ctx.coordinator.rows_moved("accounts"), Some(1000));
    assert_eq!(count(&ctx, "accounts"), 1000);
}

#[test]
fn test_union_scan_mid_migration_sees_each_row_once() {
    let ctx = TestContext::with_step_config(StepConfig {
        batch_size: 3,
        ..StepConfig::default()
    });
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    for id in 0..10 {
        ctx.destination
            .put("accounts_old", account(id, "orig", 0))
            .unwrap();
    }
    ctx.destination
        .put("accounts", account(2, "kept", 0))
        .unwrap();
    ctx.destination
        .put("accounts", account(5, "kept", 0))
        .unwrap();

    ctx.coordinator
        .configure(MigrationSettings::new().migrate("accounts", "accounts_old"))
        .unwrap();
    assert!(matches!(
        ctx.coordinator.step_once(),
        StepOutcome::Advanced { .. }
    ));

    // Half-moved table: every row exactly once, in key order.
    assert_eq!(select_ids(&ctx, "accounts"), (0..10).collect::<Vec<_>>());
    assert_eq!(select_name(&ctx, "accounts", 2).as_deref(), Some("kept"));
    assert_eq!(select_name(&ctx, "accounts", 5).as_deref(), Some("kept"));
    assert_eq!(count(&ctx, "accounts"), 10);
}

#[test]
fn test_wait_targets_a_single_table() {
    let ctx = TestContext::new();
    for name in ["accounts", "accounts_old", "orders", "orders_old"] {
        ctx.destination.create_table(accounts(name)).unwrap();
    }
    ctx.destination
        .put("accounts_old", account(1, "a", 0))
        .unwrap();
    ctx.destination
        .put("orders_old", account(1, "o", 0))
        .unwrap();

    ctx.coordinator
        .configure(
            MigrationSettings::new()
                .migrate("accounts", "accounts_old")
                .migrate("orders", "orders_old"),
        )
        .unwrap();

    // One step completes the first unit in round-robin order.
    assert!(matches!(
        ctx.coordinator.step_once(),
        StepOutcome::UnitCompleted { .. }
    ));

    ctx.coordinator
        .wait_until_done(Some("accounts"), Duration::from_secs(1))
        .unwrap();
    assert!(matches!(
        ctx.coordinator
            .wait_until_done(Some("orders"), Duration::from_millis(50)),
        Err(MigrationError::WaitTimedOut)
    ));
    assert!(matches!(
        ctx.coordinator.wait_until_done(None, Duration::from_millis(50)),
        Err(MigrationError::WaitTimedOut)
    ));
}

#[test]
fn test_observers_see_terminal_states() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    ctx.destination
        .create_table(accounts("accounts_old"))
        .unwrap();
    ctx.destination
        .put("accounts_old", account(1, "a", 0))
        .unwrap();

    // A source whose rows cannot fit the destination's column types.
    // The shape matches, so registration passes and the mismatch only
    // surfaces when rows move.
    ctx.destination
        .create_table(
            TableDef::new("orders_old", "id")
                .with_column(ColumnDef::not_null("id", ColumnType::Integer))
                .with_column(ColumnDef::not_null("name", ColumnType::Text))
                .with_column(ColumnDef::new("balance", ColumnType::Text)),
        )
        .unwrap();
    ctx.destination
        .put(
            "orders_old",
            Row::new(vec![
                Value::Integer(1),
                Value::Text("o".into()),
                Value::Text("not a number".into()),
            ]),
        )
        .unwrap();
    ctx.destination.create_table(accounts("orders")).unwrap();

    let events = Arc::new(StdMutex::new(Vec::new()));
    ctx.coordinator.add_observer(Box::new(RecordingObserver {
        events: events.clone(),
    }));

    ctx.coordinator
        .configure(
            MigrationSettings::new()
                .migrate("accounts", "accounts_old")
                .migrate("orders", "orders_old"),
        )
        .unwrap();
    loop {
        if matches!(ctx.coordinator.step_once(), StepOutcome::NoWorkRemaining) {
            break;
        }
    }

    let events = events.lock().unwrap();
    assert!(events.contains(&"done:accounts".to_string()));
    assert!(events.contains(&"failed:orders:schema mismatch".to_string()));
    assert_eq!(
        ctx.coordinator.status("accounts"),
        Some(MigrationState::Completed)
    );
    assert_eq!(
        ctx.coordinator.status("orders"),
        Some(MigrationState::Failed(FailReason::SchemaMismatch))
    );
}

#[test]
fn test_configure_rejects_bad_pairs() {
    let ctx = TestContext::new();
    ctx.destination.create_table(accounts("accounts")).unwrap();
    seed_source(&ctx, "accounts_old", 5);

    let missing = MigrationSettings::new()
        .migrate("accounts", "missing_old")
        .from_database(ctx.source_path());
    assert!(matches!(
        ctx.coordinator.configure(missing),
        Err(ConfigError::UnknownSource(_))
    ));
    assert!(!ctx.coordinator.is_migrating());

    let missing_dest = MigrationSettings::new()
        .migrate("absent", "accounts_old")
        .from_database(ctx.source_path());
    assert!(matches!(
        ctx.coordinator.configure(missing_dest),
        Err(ConfigError::UnknownDestination(_))
    ));

    ctx.destination
        .create_table(
            TableDef::new("thin", "id").with_column(ColumnDef::not_null("id", ColumnType::Integer)),
        )
        .unwrap();
    let incompatible = MigrationSettings::new()
        .migrate("thin", "accounts_old")
        .from_database(ctx.source_path());
    assert!(matches!(
        ctx.coordinator.configure(incompatible),
        Err(ConfigError::IncompatibleSchema { .. })
    ));

    // Nothing registered by the failed attempts.
    assert!(!ctx.coordinator.is_migrating());
    let good = MigrationSettings::new()
        .migrate("accounts", "accounts_old")
        .from_database(ctx.source_path());
    ctx.coordinator.configure(good).unwrap();
    assert!(ctx.coordinator.is_table_migrating("accounts"));
}

#[test]
fn test_interrupted_migration_resumes_without_duplicates() {
    let destination = Arc::new(Database::open(DatabaseConfig::temporary()).unwrap());
    destination.create_table(accounts("accounts")).unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    {
        let source = Database::open(DatabaseConfig::new(source_dir.path())).unwrap();
        source.create_table(accounts("accounts_old")).unwrap();
        for id in 0..20 {
            source
                .put("accounts_old", account(id, &format!("acct{id}"), 0))
                .unwrap();
        }
        source.flush().unwrap();
    }

    // First run moves two batches, then goes away mid-flight.
    {
        let router = Arc::new(TableRouter::new());
        let coordinator = MigrationCoordinator::new(
            destination.clone(),
            router,
            StepConfig {
                batch_size: 4,
                ..StepConfig::default()
            },
        );
        coordinator
            .configure(
                MigrationSettings::new()
                    .migrate("accounts", "accounts_old")
                    .from_database(source_dir.path()),
            )
            .unwrap();
        assert!(matches!(
            coordinator.step_once(),
            StepOutcome::Advanced { .. }
        ));
        assert!(matches!(
            coordinator.step_once(),
            StepOutcome::Advanced { .. }
        ));
        assert_eq!(destination.count("accounts").unwrap(), 8);
        coordinator.shutdown();
    }

    // Second run starts from scratch, as after a process restart. The
    // remaining source rows are whatever the first run did not consume.
    let router = Arc::new(TableRouter::new());
    let executor = StatementExecutor::new(destination.clone(), router.clone());
    let coordinator = MigrationCoordinator::new(
        destination.clone(),
        router,
        StepConfig {
            batch_size: 4,
            ..StepConfig::default()
        },
    );
    coordinator
        .configure(
            MigrationSettings::new()
                .migrate("accounts", "accounts_old")
                .from_database(source_dir.path()),
        )
        .unwrap();
    loop {
        if matches!(coordinator.step_once(), StepOutcome::NoWorkRemaining) {
            break;
        }
    }

    assert_eq!(destination.count("accounts").unwrap(), 20);
    let output = executor
        .execute(Statement::from(Select::new("accounts")))
        .unwrap();
    let ids: Vec<i64> = output
        .rows()
        .unwrap()
        .rows
        .iter()
        .map(|row| row[0].as_integer().unwrap())
        .collect();
    assert_eq!(ids, (0..20).collect::<Vec<_>>());
}
