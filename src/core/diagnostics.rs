//! System information aggregation.
//!
//! Contributions from enabled [`InfoProvider`](crate::core::api::InfoProvider)s
//! come first, in registry order, followed by the backend facts of the store.
//! Exact duplicate `(name, value)` pairs collapse to their first occurrence;
//! the order in which entries were first seen is preserved.

use crate::core::api::SystemInfoEntry;
use crate::core::env::Environment;
use crate::plugins::database;
use indexmap::IndexSet;
use tracing::warn;

/// Collects system information fresh on every call.
pub fn collect(env: &Environment) -> Vec<SystemInfoEntry> {
    let mut entries = Vec::new();

    for (name, provider) in env.registry().info_providers() {
        match provider.system_info(env) {
            Ok(contributed) => entries.extend(contributed),
            Err(err) => warn!(provider = %name, error = %err, "system info provider failed"),
        }
    }

    if env.registry().is_enabled(database::COMPONENT_NAME) == Some(true) {
        entries.extend(database::backend_facts(&env.store().backend()));
    }

    dedup(entries)
}

/// Deduplicates `entries` keeping first occurrences in order.
pub fn dedup(entries: impl IntoIterator<Item = SystemInfoEntry>) -> Vec<SystemInfoEntry> {
    entries
        .into_iter()
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}
