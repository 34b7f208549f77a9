use envkit::core::api::SetupParticipant;
use envkit::core::env::{Environment, EnvironmentBuilder};
use envkit::core::error::EnvError;
use envkit::core::registry::Registration;
use envkit::core::schemas;
use envkit::core::store::{SqliteStore, Transaction, Value, value_as_text};
use envkit::core::upgrade::UpgradeOptions;
use envkit::core::users::UserRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

/// Participant with a fixed answer to `environment_needs_upgrade`.
#[derive(Default)]
struct FixedParticipant {
    needs: bool,
    fail: bool,
    write: Option<(&'static str, i64)>,
    created: AtomicUsize,
    upgraded: AtomicUsize,
}

impl FixedParticipant {
    fn needing(needs: bool) -> Arc<Self> {
        Arc::new(Self {
            needs,
            ..Default::default()
        })
    }

    fn writing(name: &'static str, value: i64) -> Arc<Self> {
        Arc::new(Self {
            needs: true,
            write: Some((name, value)),
            ..Default::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            needs: true,
            fail: true,
            ..Default::default()
        })
    }
}

impl SetupParticipant for FixedParticipant {
    fn environment_created(&self, _env: &Environment) -> Result<(), EnvError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn environment_needs_upgrade(&self, _env: &Environment) -> Result<bool, EnvError> {
        Ok(self.needs)
    }

    fn upgrade_environment(&self, _env: &Environment, tx: &Transaction<'_>) -> Result<(), EnvError> {
        self.upgraded.fetch_add(1, Ordering::SeqCst);
        if let Some((name, value)) = self.write {
            insert_value(tx, name, value)?;
        }
        if self.fail {
            return Err(EnvError::ValidationError("participant failed".to_string()));
        }
        Ok(())
    }
}

/// Participant whose pending work is derived from the database: it needs an
/// upgrade until its row exists.
struct RowParticipant {
    name: &'static str,
    upgraded: AtomicUsize,
}

impl SetupParticipant for RowParticipant {
    fn environment_created(&self, _env: &Environment) -> Result<(), EnvError> {
        Ok(())
    }

    fn environment_needs_upgrade(&self, env: &Environment) -> Result<bool, EnvError> {
        Ok(select_value(env, self.name).is_none())
    }

    fn upgrade_environment(&self, _env: &Environment, tx: &Transaction<'_>) -> Result<(), EnvError> {
        self.upgraded.fetch_add(1, Ordering::SeqCst);
        insert_value(tx, self.name, 1)
    }
}

fn insert_value(tx: &Transaction<'_>, name: &str, value: i64) -> Result<(), EnvError> {
    tx.execute(
        "INSERT INTO system (name, value) VALUES (?1, ?2)",
        &[Value::Text(name.to_string()), Value::Integer(value)],
    )?;
    Ok(())
}

fn select_value(env: &Environment, name: &str) -> Option<String> {
    env.store()
        .query(
            "SELECT value FROM system WHERE name = ?1",
            &[Value::Text(name.to_string())],
        )
        .unwrap()
        .scalar()
        .and_then(|v| value_as_text(&v))
}

fn set_database_version(env: &Environment, version: i64) {
    env.store()
        .transact(
            "UPDATE system SET value = ?1 WHERE name = ?2",
            &[
                Value::Text(version.to_string()),
                Value::Text(schemas::DATABASE_VERSION_KEY.to_string()),
            ],
        )
        .unwrap();
}

fn create_env(root: &std::path::Path) -> Environment {
    Environment::create(root.join("env")).unwrap()
}

fn register(env: &Environment, name: &str, participant: Arc<dyn SetupParticipant>) {
    env.register_component(Registration::new(name).setup_participant(participant));
    env.enable_component(name);
}

#[test]
fn only_participants_needing_upgrade_are_upgraded() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    let a = FixedParticipant::needing(true);
    let b = FixedParticipant::needing(false);
    register(&env, "test.a", a.clone());
    register(&env, "test.b", b.clone());

    assert!(env.needs_upgrade().unwrap());
    assert!(env.upgrade().unwrap());
    assert_eq!(a.upgraded.load(Ordering::SeqCst), 1);
    assert_eq!(b.upgraded.load(Ordering::SeqCst), 0);
}

#[test]
fn disabled_participants_are_ignored() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    let a = FixedParticipant::needing(true);
    env.register_component(Registration::new("test.a").setup_participant(a.clone()));

    assert_eq!(env.is_component_enabled("test.a"), Some(false));
    assert!(!env.needs_upgrade().unwrap());
    assert!(!env.upgrade().unwrap());
    assert_eq!(a.upgraded.load(Ordering::SeqCst), 0);
}

#[test]
fn multiple_participants_commit_together() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    register(&env, "test.p1", FixedParticipant::writing("value1", 1));
    register(&env, "test.p2", FixedParticipant::writing("value2", 2));

    assert!(env.needs_upgrade().unwrap());
    assert!(env.upgrade().unwrap());
    assert_eq!(select_value(&env, "value1").as_deref(), Some("1"));
    assert_eq!(select_value(&env, "value2").as_deref(), Some("2"));
}

#[test]
fn noop_upgrade_reports_false() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    let idle = FixedParticipant::needing(false);
    register(&env, "test.idle", idle.clone());

    assert!(!env.needs_upgrade().unwrap());
    assert!(!env.upgrade().unwrap());
    assert!(!env.needs_upgrade().unwrap());
    assert_eq!(idle.upgraded.load(Ordering::SeqCst), 0);
}

#[test]
fn needs_check_agrees_with_upgrade_outcome() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    let participant = Arc::new(RowParticipant {
        name: "row.marker",
        upgraded: AtomicUsize::new(0),
    });
    register(&env, "test.row", participant.clone());

    assert!(env.needs_upgrade().unwrap());
    assert!(env.needs_upgrade().unwrap());
    assert_eq!(participant.upgraded.load(Ordering::SeqCst), 0);

    assert!(env.upgrade().unwrap());
    assert!(!env.needs_upgrade().unwrap());
    assert!(!env.upgrade().unwrap());
    assert_eq!(participant.upgraded.load(Ordering::SeqCst), 1);
}

#[test]
fn participant_failure_rolls_back_whole_upgrade() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    set_database_version(&env, 1);
    let writer = FixedParticipant::writing("value1", 1);
    let broken = FixedParticipant::failing();
    register(&env, "test.writer", writer.clone());
    register(&env, "test.broken", broken.clone());

    match env.upgrade().unwrap_err() {
        EnvError::UpgradeParticipantFailure {
            participant,
            source,
        } => {
            assert_eq!(participant, "test.broken");
            assert!(matches!(*source, EnvError::ValidationError(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(writer.upgraded.load(Ordering::SeqCst), 1);
    assert_eq!(select_value(&env, "value1"), None);
    assert_eq!(env.database_version().unwrap(), Some(1));
    assert!(env.needs_upgrade().unwrap());
}

#[test]
fn schema_migration_runs_without_participants() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    env.store()
        .transact("DROP INDEX IF EXISTS idx_users_active", &[])
        .unwrap();
    set_database_version(&env, 1);

    assert!(env.needs_upgrade().unwrap());
    assert!(env.upgrade().unwrap());
    assert_eq!(env.database_version().unwrap(), Some(schemas::DB_VERSION));
    assert_eq!(env.database_initial_version().unwrap(), Some(schemas::DB_VERSION));

    let index = env
        .store()
        .query(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name = 'idx_users_active'",
            &[],
        )
        .unwrap()
        .count();
    assert_eq!(index, 1);
    assert!(!env.needs_upgrade().unwrap());
}

#[test]
fn environment_created_runs_at_creation_only() {
    let tmp = tempdir().unwrap();
    let enabled = FixedParticipant::needing(true);
    let disabled = FixedParticipant::needing(true);
    let env = EnvironmentBuilder::new(tmp.path().join("env"))
        .component(Registration::new("test.enabled").setup_participant(enabled.clone()))
        .component(Registration::new("test.disabled").setup_participant(disabled.clone()))
        .option("components", "test.enabled", "enabled")
        .create()
        .unwrap();

    assert_eq!(enabled.created.load(Ordering::SeqCst), 1);
    assert_eq!(disabled.created.load(Ordering::SeqCst), 0);

    assert!(env.upgrade().unwrap());
    assert_eq!(enabled.created.load(Ordering::SeqCst), 1);
    assert_eq!(enabled.upgraded.load(Ordering::SeqCst), 1);
    assert_eq!(disabled.upgraded.load(Ordering::SeqCst), 0);
}

#[test]
fn upgrade_with_backup_copies_database_first() {
    let tmp = tempdir().unwrap();
    let env = create_env(tmp.path());
    register(&env, "test.p1", FixedParticipant::writing("value1", 1));
    let dest = tmp.path().join("backups/before.db");

    let options = UpgradeOptions {
        backup: Some(dest.clone()),
    };
    assert!(env.upgrade_with(&options).unwrap());
    assert!(dest.is_file());

    let backup = rusqlite::Connection::open(&dest).unwrap();
    let rows: i64 = backup
        .query_row(
            "SELECT COUNT(*) FROM system WHERE name = 'value1'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(rows, 0);
}

struct BlockingParticipant {
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl SetupParticipant for BlockingParticipant {
    fn environment_created(&self, _env: &Environment) -> Result<(), EnvError> {
        Ok(())
    }

    fn environment_needs_upgrade(&self, _env: &Environment) -> Result<bool, EnvError> {
        Ok(true)
    }

    fn upgrade_environment(&self, _env: &Environment, _tx: &Transaction<'_>) -> Result<(), EnvError> {
        self.entered.wait();
        self.release.wait();
        Ok(())
    }
}

#[test]
fn concurrent_upgrade_fails_fast() {
    let tmp = tempdir().unwrap();
    let env = Arc::new(create_env(tmp.path()));
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    register(
        &env,
        "test.blocking",
        Arc::new(BlockingParticipant {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }),
    );

    let worker = {
        let env = Arc::clone(&env);
        thread::spawn(move || env.upgrade())
    };

    entered.wait();
    let second = env.upgrade();
    release.wait();

    assert!(matches!(second, Err(EnvError::UpgradeInProgress)));
    assert!(worker.join().unwrap().unwrap());
}

/// Participant that writes through the environment instead of the handle.
struct StoreWritingParticipant;

impl SetupParticipant for StoreWritingParticipant {
    fn environment_created(&self, _env: &Environment) -> Result<(), EnvError> {
        Ok(())
    }

    fn environment_needs_upgrade(&self, env: &Environment) -> Result<bool, EnvError> {
        Ok(select_value(env, "store.marker").is_none())
    }

    fn upgrade_environment(&self, env: &Environment, _tx: &Transaction<'_>) -> Result<(), EnvError> {
        env.store().transact(
            "INSERT INTO system (name, value) VALUES (?1, ?2)",
            &[Value::Text("store.marker".to_string()), Value::Integer(1)],
        )?;
        env.insert_users(&[UserRecord::new("migrated", None, None, true)])?;
        assert_eq!(select_value(env, "store.marker").as_deref(), Some("1"));
        Ok(())
    }
}

/// Runs `env.upgrade()` on a worker thread so a hang fails the test.
fn upgrade_with_deadline(env: &Arc<Environment>) -> Result<bool, EnvError> {
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(env);
    thread::spawn(move || {
        let _ = tx.send(worker.upgrade());
    });
    rx.recv_timeout(Duration::from_secs(30))
        .expect("upgrade did not finish")
}

#[test]
fn participant_store_writes_join_upgrade_transaction() {
    let tmp = tempdir().unwrap();
    let env = Arc::new(create_env(tmp.path()));
    register(&env, "test.store_writer", Arc::new(StoreWritingParticipant));

    assert!(env.needs_upgrade().unwrap());
    assert!(upgrade_with_deadline(&env).unwrap());
    assert_eq!(select_value(&env, "store.marker").as_deref(), Some("1"));
    assert!(env.get_known_users().unwrap().get("migrated").is_some());
    assert!(!env.needs_upgrade().unwrap());

    env.store()
        .transact("INSERT INTO system (name, value) VALUES ('after', '1')", &[])
        .unwrap();
}

#[test]
fn participant_store_writes_roll_back_with_upgrade() {
    let tmp = tempdir().unwrap();
    let env = Arc::new(create_env(tmp.path()));
    register(&env, "test.store_writer", Arc::new(StoreWritingParticipant));
    register(&env, "test.broken", FixedParticipant::failing());

    let err = upgrade_with_deadline(&env).unwrap_err();
    assert!(
        matches!(err, EnvError::UpgradeParticipantFailure { ref participant, .. } if participant == "test.broken"),
        "{err}"
    );
    assert_eq!(select_value(&env, "store.marker"), None);
    assert!(env.get_known_users().unwrap().get("migrated").is_none());

    env.disable_component("test.broken");
    assert!(upgrade_with_deadline(&env).unwrap());
    assert_eq!(select_value(&env, "store.marker").as_deref(), Some("1"));
}

#[test]
fn empty_database_upgrades_to_current_schema() {
    let tmp = tempdir().unwrap();
    let path = create_env(tmp.path()).path().to_path_buf();
    let empty = SqliteStore::new(tmp.path().join("empty.db"));
    let env = EnvironmentBuilder::new(&path)
        .store(Arc::new(empty))
        .open()
        .unwrap();

    assert_eq!(env.database_version().unwrap(), None);
    assert!(env.needs_upgrade().unwrap());
    assert!(env.upgrade().unwrap());

    assert_eq!(env.database_version().unwrap(), Some(schemas::DB_VERSION));
    assert!(!env.needs_upgrade().unwrap());
    assert!(!env.upgrade().unwrap());
    assert!(env.get_known_users().unwrap().is_empty());
}
