//! Capability contracts implemented by components.

use crate::core::env::Environment;
use crate::core::error::EnvError;
use crate::core::store::Transaction;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Takes part in environment creation and upgrades.
pub trait SetupParticipant: Send + Sync {
    /// Called once when the environment is first created. Never called during
    /// an upgrade.
    fn environment_created(&self, env: &Environment) -> Result<(), EnvError>;

    /// Whether this participant has pending upgrade work. Must not write.
    fn environment_needs_upgrade(&self, env: &Environment) -> Result<bool, EnvError>;

    /// Performs the upgrade work.
    ///
    /// Runs inside the upgrade transaction. Writes issued through `tx`, or
    /// through the environment's store from this same thread, commit or roll
    /// back together with the rest of the upgrade.
    fn upgrade_environment(&self, env: &Environment, tx: &Transaction<'_>)
    -> Result<(), EnvError>;
}

/// Contributes `(name, value)` facts to the environment's system information.
pub trait InfoProvider: Send + Sync {
    fn system_info(&self, env: &Environment) -> Result<Vec<SystemInfoEntry>, EnvError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InfoValue {
    Number(OrderedFloat<f64>),
    Text(String),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Number(n) => write!(f, "{}", n),
            InfoValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for InfoValue {
    fn from(value: &str) -> Self {
        InfoValue::Text(value.to_string())
    }
}

impl From<String> for InfoValue {
    fn from(value: String) -> Self {
        InfoValue::Text(value)
    }
}

impl From<f64> for InfoValue {
    fn from(value: f64) -> Self {
        InfoValue::Number(OrderedFloat(value))
    }
}

impl From<i64> for InfoValue {
    fn from(value: i64) -> Self {
        InfoValue::Number(OrderedFloat(value as f64))
    }
}

/// One system information fact. Equality is structural over name and value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SystemInfoEntry {
    pub name: String,
    pub value: InfoValue,
}

impl SystemInfoEntry {
    pub fn new(name: impl Into<String>, value: impl Into<InfoValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for SystemInfoEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}
