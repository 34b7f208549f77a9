//! Built-in components registered with every environment.
//!
//! Adding a built-in: append its registration to `builtin_components`.

pub mod database;
pub mod environment;

use crate::core::registry::Registration;

/// Built-ins in registration order. They are registered before any
/// caller-supplied component.
pub fn builtin_components() -> Vec<Registration> {
    vec![environment::registration(), database::registration()]
}
