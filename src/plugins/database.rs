//! Database backend facts.
//!
//! The `envkit.database` component owns the backend entries of the system
//! information: while it is enabled, the aggregator appends the facts built
//! here from the store's [`BackendInfo`] at call time: one entry for the
//! database product, then one for the driver crate and its version. Until the
//! store has connected, the server part reads `(not-connected)`.

use crate::core::api::SystemInfoEntry;
use crate::core::error::EnvError;
use crate::core::registry::Registration;
use crate::core::store::BackendInfo;

pub const COMPONENT_NAME: &str = "envkit.database";

/// Entry name used when the backend scheme is not recognized.
pub const UNKNOWN_BACKEND_ENTRY: &str = "Database backend";

const NOT_CONNECTED: &str = "(not-connected)";
const UNKNOWN: &str = "(unknown)";

pub fn registration() -> Registration {
    Registration::new(COMPONENT_NAME).required()
}

/// Product name shown for a URI scheme, if the scheme is known.
pub fn product_name(scheme: &str) -> Option<&'static str> {
    match scheme {
        "sqlite" => Some("SQLite"),
        "postgres" | "postgresql" => Some("PostgreSQL"),
        "mysql" => Some("MySQL"),
        _ => None,
    }
}

/// Backend entries for `info`. An unrecognized scheme yields a single
/// [`EnvError::UnknownBackend`] entry instead of failing.
pub fn backend_facts(info: &BackendInfo) -> Vec<SystemInfoEntry> {
    let Some(product) = product_name(&info.scheme) else {
        return vec![SystemInfoEntry::new(
            UNKNOWN_BACKEND_ENTRY,
            EnvError::UnknownBackend(info.scheme.clone()).to_string(),
        )];
    };
    let server = info.server_version.as_deref().unwrap_or(NOT_CONNECTED);
    let client = info.client_version.as_deref().unwrap_or(UNKNOWN);
    let mut facts = vec![SystemInfoEntry::new(
        product,
        format!("server: {}, client: {}", server, client),
    )];
    if let Some(driver) = &info.driver {
        facts.push(SystemInfoEntry::new(
            driver.as_str(),
            info.driver_version.as_deref().unwrap_or(UNKNOWN),
        ));
    }
    facts
}
