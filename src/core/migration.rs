//! Schema version tracking and ordered migration steps.
//!
//! - **Version tracking**: the `system` table stores `database_version`
//! - **Steps run inside the caller's transaction**: the upgrade orchestrator
//!   runs every pending step and the version write in one scope
//! - **Idempotent steps**: each step must be safe to run twice
//! - **Monotonic version**: [`write_version`] never lowers a stored version

use crate::core::error::EnvError;
use crate::core::schemas;
use crate::core::store::{Transaction, TransactionalStore, Value, value_as_i64};

/// Migration definition
pub struct Migration {
    /// Schema version this step brings the database to
    pub target_version: i64,
    /// Human-readable description
    pub description: &'static str,
    /// Migration function
    pub up: fn(&Transaction<'_>) -> Result<(), EnvError>,
}

/// All migrations in ascending version order
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            target_version: 1,
            description: "Create system and users tables",
            up: migrate_create_base_tables,
        },
        Migration {
            target_version: 2,
            description: "Index users by active flag for known-user lookups",
            up: migrate_add_users_active_index,
        },
    ]
}

/// Migrations a database at `from_version` still has to run, in order.
pub fn pending_migrations(from_version: i64) -> Vec<Migration> {
    all_migrations()
        .into_iter()
        .filter(|m| should_run_migration(from_version, m.target_version))
        .collect()
}

fn should_run_migration(from: i64, target: i64) -> bool {
    from < target && target <= schemas::DB_VERSION
}

/// Reads an integer row from the `system` table. `None` when the row, or the
/// table itself, does not exist yet.
pub fn read_version<S>(store: &S, key: &str) -> Result<Option<i64>, EnvError>
where
    S: TransactionalStore + ?Sized,
{
    let exists = store
        .query(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'system'",
            &[],
        )?
        .next()
        .is_some();
    if !exists {
        return Ok(None);
    }
    Ok(store
        .query(
            "SELECT value FROM system WHERE name = ?1",
            &[Value::Text(key.to_string())],
        )?
        .scalar()
        .and_then(|v| value_as_i64(&v)))
}

/// Stores `version` under `key` unless a higher version is already stored.
pub fn write_version(tx: &Transaction<'_>, key: &str, version: i64) -> Result<(), EnvError> {
    tx.execute(
        "INSERT INTO system (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value
         WHERE CAST(system.value AS INTEGER) < CAST(excluded.value AS INTEGER)",
        &[Value::Text(key.to_string()), Value::Text(version.to_string())],
    )?;
    Ok(())
}

/// Creates the full schema at `DB_VERSION` and records it as both the current
/// and the initial version.
pub fn create_schema(tx: &Transaction<'_>) -> Result<(), EnvError> {
    for statement in schemas::BASE_SCHEMA {
        tx.execute(statement, &[])?;
    }
    write_version(tx, schemas::DATABASE_VERSION_KEY, schemas::DB_VERSION)?;
    write_version(
        tx,
        schemas::INITIAL_DATABASE_VERSION_KEY,
        schemas::DB_VERSION,
    )?;
    Ok(())
}

fn migrate_create_base_tables(tx: &Transaction<'_>) -> Result<(), EnvError> {
    tx.execute(schemas::SYSTEM_SCHEMA, &[])?;
    tx.execute(schemas::USERS_SCHEMA, &[])?;
    Ok(())
}

fn migrate_add_users_active_index(tx: &Transaction<'_>) -> Result<(), EnvError> {
    tx.execute(schemas::USERS_ACTIVE_INDEX, &[])?;
    Ok(())
}
