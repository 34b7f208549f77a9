//! Database schema definitions for an environment database.
//!
//! `DB_VERSION` is the schema version this build of the code expects. A fresh
//! environment is created directly at `DB_VERSION`; older databases reach it
//! through the steps in [`crate::core::migration`].

pub const DB_VERSION: i64 = 2;

/// `system` row holding the persisted schema version.
pub const DATABASE_VERSION_KEY: &str = "database_version";
/// `system` row holding the schema version the environment was created with.
pub const INITIAL_DATABASE_VERSION_KEY: &str = "initial_database_version";

pub const SYSTEM_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS system (
        name TEXT PRIMARY KEY,
        value TEXT
    )
";

pub const USERS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        username TEXT PRIMARY KEY,
        display_name TEXT,
        email TEXT,
        active INTEGER NOT NULL DEFAULT 1
    )
";

pub const USERS_ACTIVE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_users_active ON users(active, username)";

/// Statements that create a database at `DB_VERSION`.
pub const BASE_SCHEMA: &[&str] = &[SYSTEM_SCHEMA, USERS_SCHEMA, USERS_ACTIVE_INDEX];
