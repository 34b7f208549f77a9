//! Transactional store over SQLite.
//!
//! Every operation acquires its own connection and drops it before returning,
//! on success and on failure alike:
//! - **Reads** open a fresh connection with no serialization (WAL allows
//!   concurrent readers across threads and processes).
//! - **Writes** are serialized through a per-store write mutex and run inside an
//!   `IMMEDIATE` transaction that commits on success and rolls back when the
//!   body fails.
//!
//! Callers that need several statements to commit together use
//! [`with_transaction`] and issue them through the [`Transaction`] handle.
//! While a write scope is open, store calls made from the thread that opened
//! it join that scope: reads see its uncommitted writes, and a nested write
//! scope runs under a savepoint of the outer transaction. Other threads wait
//! for the write mutex as usual.

use crate::core::error::EnvError;
use rusqlite::{Connection, params_from_iter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::{debug, warn};

pub use rusqlite::types::Value;

/// A single result row, one value per selected column.
pub type Row = Vec<Value>;

/// Maximum retry attempts for busy/locked errors.
const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 100;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 5_000;

/// Write connection busy_timeout in seconds.
const WRITE_BUSY_TIMEOUT_SECS: u64 = 5;
/// Read connection busy_timeout in seconds.
const READ_BUSY_TIMEOUT_SECS: u64 = 5;

/// Version of the `rusqlite` driver this crate was built against.
pub const DRIVER_VERSION: &str = env!("ENVKIT_RUSQLITE_VERSION");

/// Rows returned by [`TransactionalStore::query`].
///
/// The rows are materialized before the connection is released, so holding on
/// to a `Rows` never pins a connection.
#[derive(Debug, Default)]
pub struct Rows {
    inner: std::vec::IntoIter<Row>,
}

impl Rows {
    fn new(rows: Vec<Row>) -> Self {
        Self {
            inner: rows.into_iter(),
        }
    }

    /// First column of the first row, if any.
    pub fn scalar(mut self) -> Option<Value> {
        self.next().and_then(|row| row.into_iter().next())
    }
}

impl Iterator for Rows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Rows {}

/// Renders a column value as text. `NULL` and blobs have no text form.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

/// Reads a column value as an integer, accepting numeric text. Reals with a
/// fractional part are not integers.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Text(s) => s.trim().parse().ok(),
        Value::Real(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(*f as i64),
        Value::Real(_) | Value::Null | Value::Blob(_) => None,
    }
}

/// Write handle for one transactional scope.
///
/// Everything executed through the same handle commits or rolls back together.
pub struct Transaction<'scope> {
    conn: &'scope Mutex<Connection>,
}

impl Transaction<'_> {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize, EnvError> {
        Ok(self.lock().execute(sql, params_from_iter(params.iter()))?)
    }

    /// Runs a batch of `;`-separated statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<(), EnvError> {
        Ok(self.lock().execute_batch(sql)?)
    }

    /// Reads inside the scope; sees the scope's own uncommitted writes.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Rows, EnvError> {
        collect_rows(&self.lock(), sql, params).map(Rows::new)
    }

    fn rollback(&self, statement: &str) {
        if let Err(err) = self.execute_batch(statement) {
            warn!(error = %err, "rollback failed");
        }
    }
}

/// Facts about the backend behind a store, captured at call time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    /// URI scheme, e.g. `sqlite`.
    pub scheme: String,
    /// Version of the client library linked into this process.
    pub client_version: Option<String>,
    /// Version reported by the server; `None` until a connection has been
    /// established since the store was opened or last shut down.
    pub server_version: Option<String>,
    /// Name of the driver crate talking to the backend.
    pub driver: Option<String>,
    pub driver_version: Option<String>,
}

/// Scoped-transaction/query interface the environment reads and writes through.
pub trait TransactionalStore: Send + Sync {
    /// Read-only query outside any explicit transaction.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Rows, EnvError>;

    /// Opens a write transaction, runs `body`, and commits if it returns `Ok`.
    /// Any error rolls the whole scope back and is returned unchanged.
    fn transaction(
        &self,
        body: &mut dyn FnMut(&Transaction<'_>) -> Result<(), EnvError>,
    ) -> Result<(), EnvError>;

    /// Single statement in its own transaction; returns the affected row count.
    fn transact(&self, sql: &str, params: &[Value]) -> Result<usize, EnvError> {
        with_transaction(self, |tx| tx.execute(sql, params))
    }

    fn backend(&self) -> BackendInfo;

    /// Writes a consistent copy of the database to `dest`.
    fn backup(&self, dest: &Path) -> Result<(), EnvError>;

    /// Forgets the live connection state; the next operation reconnects.
    fn shutdown(&self);
}

/// Runs `body` inside one transaction on `store` and returns its value.
pub fn with_transaction<S, T, F>(store: &S, body: F) -> Result<T, EnvError>
where
    S: TransactionalStore + ?Sized,
    F: FnOnce(&Transaction<'_>) -> Result<T, EnvError>,
{
    let mut body = Some(body);
    let mut output = None;
    store.transaction(&mut |tx| {
        let body = body.take().ok_or_else(|| {
            EnvError::ValidationError("transaction body invoked more than once".to_string())
        })?;
        output = Some(body(tx)?);
        Ok(())
    })?;
    output.ok_or_else(|| EnvError::ValidationError("transaction body was not invoked".to_string()))
}

/// Parsed `[env] database` setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUri {
    pub scheme: String,
    pub location: String,
}

impl DatabaseUri {
    pub fn parse(uri: &str) -> Result<Self, EnvError> {
        let (scheme, rest) = uri.split_once(':').ok_or_else(|| {
            EnvError::ValidationError(format!("Database URI '{}' has no scheme", uri))
        })?;
        let location = rest.trim_start_matches("//");
        if scheme.is_empty() || location.is_empty() {
            return Err(EnvError::ValidationError(format!(
                "Malformed database URI '{}'",
                uri
            )));
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            location: location.to_string(),
        })
    }
}

/// Parses `uri` and checks that [`open_store`] can open it, without touching
/// the filesystem.
pub fn check_backend(uri: &str) -> Result<DatabaseUri, EnvError> {
    let parsed = DatabaseUri::parse(uri)?;
    if parsed.scheme != "sqlite" {
        return Err(EnvError::UnsupportedBackend(uri.to_string()));
    }
    Ok(parsed)
}

/// Opens the store named by `uri`. Relative SQLite paths resolve against
/// `env_root`.
pub fn open_store(uri: &str, env_root: &Path) -> Result<Arc<dyn TransactionalStore>, EnvError> {
    let parsed = check_backend(uri)?;
    let path = Path::new(&parsed.location);
    let path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env_root.join(path)
    };
    Ok(Arc::new(SqliteStore::new(path)))
}

/// The write transaction currently open on a store.
struct WriteScope {
    owner: ThreadId,
    conn: Arc<Mutex<Connection>>,
}

/// Clears the open scope when the outermost transaction ends, even by panic.
struct ScopeReset<'a>(&'a Mutex<Option<WriteScope>>);

impl Drop for ScopeReset<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// SQLite-backed [`TransactionalStore`].
///
/// Connections are not pooled: each operation opens a fresh one and drops it
/// when done, so no WAL/SHM handles outlive an operation.
pub struct SqliteStore {
    db_path: PathBuf,
    write_lock: Mutex<()>,
    scope: Mutex<Option<WriteScope>>,
    server_version: Mutex<Option<String>>,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            write_lock: Mutex::new(()),
            scope: Mutex::new(None),
            server_version: Mutex::new(None),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self, busy_timeout_secs: u64) -> Result<Connection, EnvError> {
        let conn = retry_on_busy(|| db_connect(&self.db_path, busy_timeout_secs))?;
        let mut server_version = self
            .server_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if server_version.is_none() {
            let version: String = conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
            debug!(db = %self.db_path.display(), server = %version, "store connected");
            *server_version = Some(version);
        }
        drop(server_version);
        Ok(conn)
    }

    /// Connection of the write scope opened by the calling thread, if any.
    fn joined_scope(&self) -> Option<Arc<Mutex<Connection>>> {
        let scope = self.scope.lock().unwrap_or_else(PoisonError::into_inner);
        scope
            .as_ref()
            .filter(|scope| scope.owner == thread::current().id())
            .map(|scope| Arc::clone(&scope.conn))
    }
}

impl TransactionalStore for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Rows, EnvError> {
        if let Some(conn) = self.joined_scope() {
            let tx = Transaction { conn: &conn };
            return tx.query(sql, params);
        }
        let conn = self.connect(READ_BUSY_TIMEOUT_SECS)?;
        collect_rows(&conn, sql, params).map(Rows::new)
    }

    fn transaction(
        &self,
        body: &mut dyn FnMut(&Transaction<'_>) -> Result<(), EnvError>,
    ) -> Result<(), EnvError> {
        if let Some(conn) = self.joined_scope() {
            let tx = Transaction { conn: &conn };
            tx.execute_batch("SAVEPOINT envkit_nested")?;
            return match body(&tx) {
                Ok(()) => tx.execute_batch("RELEASE envkit_nested"),
                Err(err) => {
                    tx.rollback("ROLLBACK TO envkit_nested; RELEASE envkit_nested");
                    Err(err)
                }
            };
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| EnvError::ValidationError("Store write lock poisoned".to_string()))?;

        let conn = self.connect(WRITE_BUSY_TIMEOUT_SECS)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        let conn = Arc::new(Mutex::new(conn));
        *self.scope.lock().unwrap_or_else(PoisonError::into_inner) = Some(WriteScope {
            owner: thread::current().id(),
            conn: Arc::clone(&conn),
        });
        let _scope = ScopeReset(&self.scope);

        let tx = Transaction { conn: &conn };
        match body(&tx).and_then(|()| tx.execute_batch("COMMIT")) {
            Ok(()) => Ok(()),
            Err(err) => {
                tx.rollback("ROLLBACK");
                Err(err)
            }
        }
    }

    fn backend(&self) -> BackendInfo {
        let server_version = self
            .server_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        BackendInfo {
            scheme: "sqlite".to_string(),
            client_version: Some(rusqlite::version().to_string()),
            server_version,
            driver: Some("rusqlite".to_string()),
            driver_version: Some(DRIVER_VERSION.to_string()),
        }
    }

    fn backup(&self, dest: &Path) -> Result<(), EnvError> {
        if self.joined_scope().is_some() {
            return Err(EnvError::ValidationError(
                "Cannot back up the database from inside a write transaction".to_string(),
            ));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| EnvError::ValidationError("Store write lock poisoned".to_string()))?;
        let conn = self.connect(WRITE_BUSY_TIMEOUT_SECS)?;
        conn.execute(
            "VACUUM INTO ?1",
            [Value::Text(dest.to_string_lossy().into_owned())],
        )?;
        Ok(())
    }

    fn shutdown(&self) {
        *self
            .server_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

fn db_connect(db_path: &Path, busy_timeout_secs: u64) -> Result<Connection, EnvError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(busy_timeout_secs))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

fn collect_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, EnvError> {
    let mut stmt = conn.prepare(sql)?;
    let width = stmt.column_count();
    let mapped = stmt.query_map(params_from_iter(params.iter()), |row| {
        (0..width)
            .map(|idx| row.get::<_, Value>(idx))
            .collect::<Result<Row, _>>()
    })?;
    let rows: Result<Vec<Row>, rusqlite::Error> = mapped.collect();
    Ok(rows?)
}

/// Retry a closure on `SQLITE_BUSY` / `DatabaseBusy` with exponential backoff.
fn retry_on_busy<F, R>(mut f: F) -> Result<R, EnvError>
where
    F: FnMut() -> Result<R, EnvError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error is a SQLite busy/locked error that is retryable.
fn is_busy_error(err: &EnvError) -> bool {
    match err {
        EnvError::StoreError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
