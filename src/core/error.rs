use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Store error: {0}")]
    StoreError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Missing configuration file: {}", .0.display())]
    MissingConfigFile(PathBuf),
    #[error("Invalid value {value:?} for [{section}] {key} (expected one of: {})", .allowed.join(", "))]
    InvalidConfigValue {
        section: String,
        key: String,
        value: String,
        allowed: Vec<&'static str>,
    },
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Upgrade failed in participant '{participant}': {source}")]
    UpgradeParticipantFailure {
        participant: String,
        #[source]
        source: Box<EnvError>,
    },
    #[error("Another upgrade is already running on this environment")]
    UpgradeInProgress,
    #[error("Unknown database backend '{0}'")]
    UnknownBackend(String),
    #[error("Unsupported database backend: {0}")]
    UnsupportedBackend(String),
    #[error("Not an environment: {0}")]
    NotAnEnvironment(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}
