//! The environment's own system information.

use crate::core::api::{InfoProvider, SystemInfoEntry};
use crate::core::env::Environment;
use crate::core::error::EnvError;
use crate::core::registry::Registration;
use crate::core::schemas;
use std::sync::Arc;

pub const COMPONENT_NAME: &str = "envkit.environment";

/// Crate version of this build.
pub const ENVKIT_VERSION: &str = env!("CARGO_PKG_VERSION");

struct EnvironmentInfo;

impl InfoProvider for EnvironmentInfo {
    fn system_info(&self, _env: &Environment) -> Result<Vec<SystemInfoEntry>, EnvError> {
        Ok(vec![
            SystemInfoEntry::new("envkit", ENVKIT_VERSION),
            SystemInfoEntry::new(
                "Platform",
                format!("{} ({})", std::env::consts::OS, std::env::consts::ARCH),
            ),
            SystemInfoEntry::new("Schema", schemas::DB_VERSION),
        ])
    }
}

pub fn registration() -> Registration {
    Registration::new(COMPONENT_NAME)
        .required()
        .info_provider(Arc::new(EnvironmentInfo))
}
