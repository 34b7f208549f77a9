//! Core of the environment runtime.
//!
//! Leaf modules first: `store` and `config` have no dependency on the rest;
//! `env` ties everything together.

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod logging;
pub mod migration;
pub mod registry;
pub mod schemas;
pub mod store;
pub mod upgrade;
pub mod users;
