//! The environment: the explicit context handed to every component.
//!
//! An environment directory looks like:
//!
//! ```text
//! <env>/VERSION            marker identifying the directory
//! <env>/conf/envkit.toml   live configuration
//! <env>/conf/envkit.toml.sample
//! <env>/db/envkit.db       default SQLite database
//! <env>/log/               relative log files
//! ```

use crate::core::api::SystemInfoEntry;
use crate::core::config::{CONFIG_FILE, Configuration};
use crate::core::diagnostics;
use crate::core::error::EnvError;
use crate::core::logging::{self, LogSettings};
use crate::core::migration;
use crate::core::registry::{CapabilityRegistry, Registration};
use crate::core::schemas;
use crate::core::store::{TransactionalStore, check_backend, open_store, with_transaction};
use crate::core::upgrade::{UpgradeOptions, UpgradeOrchestrator};
use crate::core::users::{self, KnownUsersCache, KnownUsersView, UserRecord};
use crate::plugins;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub const VERSION_FILE: &str = "VERSION";
pub const ENVIRONMENT_MARKER: &str = "envkit environment version 1";

const ENV_DIRS: &[&str] = &["conf", "db", logging::LOG_DIR];

/// Builds an environment from a directory plus caller-supplied components and
/// option overrides.
pub struct EnvironmentBuilder {
    path: PathBuf,
    options: Vec<(String, String, String)>,
    components: Vec<Registration>,
    store: Option<Arc<dyn TransactionalStore>>,
}

impl EnvironmentBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: Vec::new(),
            components: Vec::new(),
            store: None,
        }
    }

    /// On `create` the value is written to the config files; on `open` it only
    /// overrides the loaded value in memory.
    pub fn option(mut self, section: &str, key: &str, value: &str) -> Self {
        self.options
            .push((section.to_string(), key.to_string(), value.to_string()));
        self
    }

    pub fn component(mut self, registration: Registration) -> Self {
        self.components.push(registration);
        self
    }

    /// Uses `store` instead of the one named by `[env] database`.
    pub fn store(mut self, store: Arc<dyn TransactionalStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn resolve_store(
        store: Option<Arc<dyn TransactionalStore>>,
        config: &Configuration,
        path: &Path,
    ) -> Result<Arc<dyn TransactionalStore>, EnvError> {
        match store {
            Some(store) => Ok(store),
            None => open_store(&config.get("env", "database"), path),
        }
    }

    /// Creates a new environment in an empty or missing directory.
    ///
    /// Options are validated before anything is written, so a rejected create
    /// leaves the directory as it found it.
    pub fn create(self) -> Result<Environment, EnvError> {
        let path = self.path;
        if path.exists() && fs::read_dir(&path)?.next().is_some() {
            return Err(EnvError::ValidationError(format!(
                "Directory '{}' exists and is not empty",
                path.display()
            )));
        }

        let config = Configuration::new(path.join(CONFIG_FILE));
        for (section, key, value) in &self.options {
            config.set(section, key, value);
        }
        let log_settings = LogSettings::from_config(&config, &path)?;
        config.component_states()?;
        if self.store.is_none() {
            check_backend(&config.get("env", "database"))?;
        }

        for dir in ENV_DIRS {
            fs::create_dir_all(path.join(dir))?;
        }
        fs::write(path.join(VERSION_FILE), format!("{}\n", ENVIRONMENT_MARKER))?;
        config.save()?;

        let store = Self::resolve_store(self.store, &config, &path)?;
        with_transaction(store.as_ref(), migration::create_schema)?;

        let env = Environment::assemble(path, config, log_settings, store, self.components)?;
        env.upgrader.environment_created(&env)?;
        info!(path = %env.path.display(), version = schemas::DB_VERSION, "environment created");
        Ok(env)
    }

    /// Opens an existing environment. Configuration is validated here; an
    /// invalid value fails the open.
    pub fn open(self) -> Result<Environment, EnvError> {
        let path = self.path;
        verify(&path)?;

        let config = Configuration::load(path.join(CONFIG_FILE))?;
        for (section, key, value) in &self.options {
            config.set(section, key, value);
        }
        let log_settings = LogSettings::from_config(&config, &path)?;
        let store = Self::resolve_store(self.store, &config, &path)?;

        let env = Environment::assemble(path, config, log_settings, store, self.components)?;
        info!(path = %env.path.display(), "environment opened");
        Ok(env)
    }
}

/// Checks that `path` holds an environment this code understands.
pub fn verify(path: &Path) -> Result<(), EnvError> {
    let marker = fs::read_to_string(path.join(VERSION_FILE)).map_err(|_| {
        EnvError::NotAnEnvironment(format!("no {} file in '{}'", VERSION_FILE, path.display()))
    })?;
    match marker.lines().next().map(str::trim) {
        Some(ENVIRONMENT_MARKER) => Ok(()),
        other => Err(EnvError::NotAnEnvironment(format!(
            "unsupported marker {:?} in '{}'",
            other.unwrap_or_default(),
            path.display()
        ))),
    }
}

pub struct Environment {
    path: PathBuf,
    config: Configuration,
    log_settings: LogSettings,
    store: Arc<dyn TransactionalStore>,
    registry: CapabilityRegistry,
    upgrader: UpgradeOrchestrator,
    known_users: KnownUsersCache,
}

impl Environment {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, EnvError> {
        EnvironmentBuilder::new(path).create()
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, EnvError> {
        EnvironmentBuilder::new(path).open()
    }

    fn assemble(
        path: PathBuf,
        config: Configuration,
        log_settings: LogSettings,
        store: Arc<dyn TransactionalStore>,
        components: Vec<Registration>,
    ) -> Result<Self, EnvError> {
        let registry = CapabilityRegistry::new();
        for component in plugins::builtin_components().into_iter().chain(components) {
            registry.register(component);
        }
        for (name, enabled) in config.component_states()? {
            if enabled {
                registry.enable(&name);
            } else {
                registry.disable(&name);
            }
        }

        Ok(Self {
            path,
            config,
            log_settings,
            store,
            registry,
            upgrader: UpgradeOrchestrator::new(),
            known_users: KnownUsersCache::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Logging settings validated when the environment was opened.
    pub fn log_settings(&self) -> &LogSettings {
        &self.log_settings
    }

    /// Current `[logging] log_file`, resolved against `<env>/log`.
    pub fn log_file_path(&self) -> PathBuf {
        logging::log_file_path(&self.config, &self.path)
    }

    pub fn store(&self) -> &Arc<dyn TransactionalStore> {
        &self.store
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn register_component(&self, registration: Registration) {
        self.registry.register(registration);
    }

    pub fn is_component_enabled(&self, name: &str) -> Option<bool> {
        self.registry.is_enabled(name)
    }

    pub fn enable_component(&self, name: &str) {
        self.registry.enable(name);
    }

    pub fn disable_component(&self, name: &str) {
        self.registry.disable(name);
    }

    /// Persisted schema version, `None` for a database without one.
    pub fn database_version(&self) -> Result<Option<i64>, EnvError> {
        migration::read_version(self.store.as_ref(), schemas::DATABASE_VERSION_KEY)
    }

    /// Schema version the environment was created with.
    pub fn database_initial_version(&self) -> Result<Option<i64>, EnvError> {
        migration::read_version(self.store.as_ref(), schemas::INITIAL_DATABASE_VERSION_KEY)
    }

    pub fn needs_upgrade(&self) -> Result<bool, EnvError> {
        self.upgrader.needs_upgrade(self)
    }

    pub fn upgrade(&self) -> Result<bool, EnvError> {
        self.upgrader.upgrade(self, &UpgradeOptions::default())
    }

    pub fn upgrade_with(&self, options: &UpgradeOptions) -> Result<bool, EnvError> {
        self.upgrader.upgrade(self, options)
    }

    /// Deduplicated system information, recomputed on every call.
    pub fn system_info(&self) -> Vec<SystemInfoEntry> {
        diagnostics::collect(self)
    }

    pub fn get_known_users(&self) -> Result<Arc<KnownUsersView>, EnvError> {
        self.known_users.get(self.store.as_ref())
    }

    pub fn invalidate_known_users_cache(&self) {
        self.known_users.invalidate();
    }

    pub fn insert_users(&self, records: &[UserRecord]) -> Result<(), EnvError> {
        users::insert_users(self.store.as_ref(), records)
    }

    /// Releases the store's connection state.
    pub fn shutdown(&self) {
        self.store.shutdown();
        info!(path = %self.path.display(), "environment shut down");
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("path", &self.path)
            .field("backend", &self.store.backend().scheme)
            .field("components", &self.registry.descriptors().len())
            .finish()
    }
}
