//! Known-users cache.
//!
//! A "known user" is a stored user whose active flag is set. The cache holds
//! one computed [`KnownUsersView`] per generation; the ordered list and the
//! name-keyed map are both built from that one query result, so they can never
//! disagree. [`KnownUsersCache::invalidate`] only bumps the generation; the
//! next read recomputes.

use crate::core::error::EnvError;
use crate::core::store::{TransactionalStore, Value, value_as_text, with_transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

const KNOWN_USERS_SQL: &str = "
    SELECT username, display_name, email
    FROM users
    WHERE active = 1
    ORDER BY username
";

/// A stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub active: bool,
}

impl UserRecord {
    pub fn new(
        username: impl Into<String>,
        display_name: Option<&str>,
        email: Option<&str>,
        active: bool,
    ) -> Self {
        Self {
            username: username.into(),
            display_name: display_name.map(str::to_string),
            email: email.map(str::to_string),
            active,
        }
    }
}

/// An active user as exposed by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownUser {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

/// `(display_name, email)` keyed by username.
pub type KnownUsersMap = BTreeMap<String, (Option<String>, Option<String>)>;

/// Both shapes of one cached computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUsersView {
    generation: u64,
    users: Vec<KnownUser>,
    by_name: KnownUsersMap,
}

impl KnownUsersView {
    fn from_users(generation: u64, users: Vec<KnownUser>) -> Self {
        let by_name = users
            .iter()
            .map(|u| (u.username.clone(), (u.display_name.clone(), u.email.clone())))
            .collect();
        Self {
            generation,
            users,
            by_name,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ascending by username.
    pub fn users(&self) -> &[KnownUser] {
        &self.users
    }

    pub fn as_map(&self) -> &KnownUsersMap {
        &self.by_name
    }

    pub fn get(&self, username: &str) -> Option<&(Option<String>, Option<String>)> {
        self.by_name.get(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    view: Option<Arc<KnownUsersView>>,
}

#[derive(Debug, Default)]
pub struct KnownUsersCache {
    state: RwLock<CacheState>,
    recompute: Mutex<()>,
}

impl KnownUsersCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    fn cached(&self) -> (u64, Option<Arc<KnownUsersView>>) {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        (state.generation, state.view.clone())
    }

    /// Current view, computing it if this generation has none yet.
    pub fn get<S>(&self, store: &S) -> Result<Arc<KnownUsersView>, EnvError>
    where
        S: TransactionalStore + ?Sized,
    {
        if let (_, Some(view)) = self.cached() {
            return Ok(view);
        }

        let _recompute = self.recompute.lock().unwrap_or_else(PoisonError::into_inner);
        let (generation, view) = self.cached();
        if let Some(view) = view {
            return Ok(view);
        }

        let view = Arc::new(KnownUsersView::from_users(generation, load_known_users(store)?));
        debug!(generation, users = view.len(), "known users computed");

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        // An invalidation during the query means these rows may already be stale.
        if state.generation == generation {
            state.view = Some(Arc::clone(&view));
        }
        Ok(view)
    }

    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation += 1;
        state.view = None;
    }
}

fn load_known_users<S>(store: &S) -> Result<Vec<KnownUser>, EnvError>
where
    S: TransactionalStore + ?Sized,
{
    store
        .query(KNOWN_USERS_SQL, &[])?
        .map(|row| -> Result<KnownUser, EnvError> {
            let mut cols = row.iter();
            let username = cols.next().and_then(value_as_text).ok_or_else(|| {
                EnvError::ValidationError("users row without a username".to_string())
            })?;
            Ok(KnownUser {
                username,
                display_name: cols.next().and_then(value_as_text),
                email: cols.next().and_then(value_as_text),
            })
        })
        .collect()
}

/// Inserts or replaces user records in one transaction.
///
/// The cache is not touched; callers invalidate it when they need the new rows
/// to show up.
pub fn insert_users<S>(store: &S, records: &[UserRecord]) -> Result<(), EnvError>
where
    S: TransactionalStore + ?Sized,
{
    with_transaction(store, |tx| {
        for record in records {
            tx.execute(
                "INSERT OR REPLACE INTO users (username, display_name, email, active)
                 VALUES (?1, ?2, ?3, ?4)",
                &[
                    Value::Text(record.username.clone()),
                    optional_text(&record.display_name),
                    optional_text(&record.email),
                    Value::Integer(i64::from(record.active)),
                ],
            )?;
        }
        Ok(())
    })
}

fn optional_text(value: &Option<String>) -> Value {
    value.clone().map(Value::Text).unwrap_or(Value::Null)
}
