//! Environment upgrade orchestration.
//!
//! The orchestrator keeps no state of its own beyond a mutual-exclusion guard:
//! whether an upgrade is needed is re-derived from the persisted schema version
//! and the participants' own checks on every call.
//!
//! An upgrade runs as one transaction: pending schema migration steps, then
//! every participant that reported pending work (registration order), then the
//! version write. Nothing is visible unless all of it commits.

use crate::core::api::SetupParticipant;
use crate::core::env::Environment;
use crate::core::error::EnvError;
use crate::core::migration;
use crate::core::schemas;
use crate::core::store::with_transaction;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Copy the database here before the upgrade transaction opens.
    pub backup: Option<PathBuf>,
}

type Participants = Vec<(String, Arc<dyn SetupParticipant>)>;

#[derive(Debug, Default)]
pub struct UpgradeOrchestrator {
    running: Mutex<()>,
}

impl UpgradeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted schema version; a database without one counts as version 0.
    pub fn database_version(&self, env: &Environment) -> Result<i64, EnvError> {
        Ok(
            migration::read_version(env.store().as_ref(), schemas::DATABASE_VERSION_KEY)?
                .unwrap_or(0),
        )
    }

    /// True when the schema is behind or any enabled participant has work.
    /// Performs no writes.
    pub fn needs_upgrade(&self, env: &Environment) -> Result<bool, EnvError> {
        if self.database_version(env)? < schemas::DB_VERSION {
            return Ok(true);
        }
        for (name, participant) in env.registry().setup_participants() {
            if participant.environment_needs_upgrade(env)? {
                debug!(participant = %name, "participant needs upgrade");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs all pending upgrade work. Returns `false` when there was none.
    ///
    /// Fails with [`EnvError::UpgradeInProgress`] instead of waiting when
    /// another upgrade of the same environment is running.
    pub fn upgrade(&self, env: &Environment, options: &UpgradeOptions) -> Result<bool, EnvError> {
        let _running = match self.running.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(EnvError::UpgradeInProgress),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let from_version = self.database_version(env)?;
        let steps = migration::pending_migrations(from_version);
        let participants = pending_participants(env)?;

        if from_version >= schemas::DB_VERSION && participants.is_empty() {
            debug!("environment is current; nothing to upgrade");
            return Ok(false);
        }

        if let Some(dest) = &options.backup {
            info!(dest = %dest.display(), "backing up database before upgrade");
            env.store().backup(dest)?;
        }

        info!(
            from = from_version,
            to = schemas::DB_VERSION,
            participants = participants.len(),
            "upgrading environment"
        );

        let result = with_transaction(env.store().as_ref(), |tx| {
            for step in &steps {
                info!(version = step.target_version, "{}", step.description);
                (step.up)(tx)?;
            }
            for (name, participant) in &participants {
                info!(participant = %name, "running participant upgrade");
                participant.upgrade_environment(env, tx).map_err(|source| {
                    EnvError::UpgradeParticipantFailure {
                        participant: name.clone(),
                        source: Box::new(source),
                    }
                })?;
            }
            migration::write_version(tx, schemas::DATABASE_VERSION_KEY, schemas::DB_VERSION)
        });

        match result {
            Ok(()) => {
                info!(version = schemas::DB_VERSION, "upgrade committed");
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "upgrade rolled back");
                Err(err)
            }
        }
    }

    /// Calls `environment_created` on every enabled participant. Each call
    /// stands alone; there is no shared transaction.
    pub fn environment_created(&self, env: &Environment) -> Result<(), EnvError> {
        for (name, participant) in env.registry().setup_participants() {
            debug!(participant = %name, "environment created hook");
            participant.environment_created(env)?;
        }
        Ok(())
    }
}

/// Participants reporting pending work at this moment, in registration order.
fn pending_participants(env: &Environment) -> Result<Participants, EnvError> {
    let mut pending = Vec::new();
    for (name, participant) in env.registry().setup_participants() {
        if participant.environment_needs_upgrade(env)? {
            pending.push((name, participant));
        }
    }
    Ok(pending)
}
