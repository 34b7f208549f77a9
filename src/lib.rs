//! envkit: the environment runtime of a project-hosting platform.
//!
//! An environment is a directory holding configuration and a database. This
//! crate provides the object that opens one and everything hanging off it:
//!
//! - **Component registry**: components declare the capabilities they
//!   implement (`SetupParticipant`, `InfoProvider`); lookups return enabled
//!   implementors in registration order
//! - **Upgrades**: schema migrations and participant upgrades run in one
//!   transaction, or not at all
//! - **System information**: provider contributions plus live backend facts,
//!   deduplicated
//! - **Known users**: a generation-stamped cache with list and map views
//!
//! # Examples
//!
//! ```bash
//! # Create an environment
//! envkit init /srv/env
//!
//! # Apply pending upgrades, backing up the database first
//! envkit upgrade /srv/env --backup
//!
//! # Inspect
//! envkit info /srv/env --format json
//! envkit users /srv/env
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: environment, store, registry, upgrades, diagnostics, cache
//! - [`plugins`]: built-in components registered with every environment

pub mod core;
pub mod plugins;

mod cli;

pub use crate::core::env::{Environment, EnvironmentBuilder};
pub use crate::core::error::EnvError;

use crate::cli::{Cli, Command, ComponentCommand};
use crate::core::config::COMPONENTS_SECTION;
use crate::core::logging;
use crate::core::schemas;
use crate::core::upgrade::UpgradeOptions;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;

pub fn run() -> Result<(), EnvError> {
    let cli = Cli::parse();

    match cli.command {
        Command::Init {
            path,
            database,
            options,
        } => {
            let mut builder = EnvironmentBuilder::new(&path);
            if let Some(uri) = database {
                builder = builder.option("env", "database", &uri);
            }
            for raw in &options {
                let (section, key, value) = parse_option(raw)?;
                builder = builder.option(section, key, value);
            }
            let env = builder.create()?;
            logging::init(env.log_settings())?;
            println!(
                "{} Environment created at {}",
                "✓".bright_green(),
                env.path().display()
            );
        }
        Command::Upgrade {
            path,
            check,
            backup,
            backup_dest,
        } => {
            let env = open_logged(&path)?;
            if check {
                if env.needs_upgrade()? {
                    println!("{} Environment needs upgrade", "▸".bright_yellow());
                } else {
                    println!("{} Environment is up to date", "✓".bright_green());
                }
                return Ok(());
            }
            let backup = backup.then(|| {
                backup_dest.unwrap_or_else(|| {
                    env.path()
                        .join("db")
                        .join(format!("backup-v{}.db", schemas::DB_VERSION))
                })
            });
            let options = UpgradeOptions { backup };
            if env.upgrade_with(&options)? {
                println!("{} Upgrade complete", "✓".bright_green());
            } else {
                println!("{} Nothing to upgrade", "✓".bright_green());
            }
        }
        Command::Info { path, format } => {
            let env = open_logged(&path)?;
            let info = env.system_info();
            if format == "json" {
                print_json(&info)?;
            } else {
                for entry in info {
                    println!("{}: {}", entry.name.bold(), entry.value);
                }
            }
        }
        Command::Users { path, format } => {
            let env = open_logged(&path)?;
            let view = env.get_known_users()?;
            if format == "json" {
                print_json(view.users())?;
            } else {
                for user in view.users() {
                    println!(
                        "{}\t{}\t{}",
                        user.username,
                        user.display_name.as_deref().unwrap_or("-"),
                        user.email.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        Command::Component { path, command } => {
            let env = open_logged(&path)?;
            match command {
                ComponentCommand::List { format } => {
                    let descriptors = env.registry().descriptors();
                    if format == "json" {
                        print_json(&descriptors)?;
                    } else {
                        for d in descriptors {
                            let state = if d.enabled {
                                "enabled".bright_green()
                            } else {
                                "disabled".bright_red()
                            };
                            let caps: Vec<String> =
                                d.capabilities.iter().map(|c| c.to_string()).collect();
                            println!("{:<32} {:<9} {}", d.name, state, caps.join(", "));
                        }
                    }
                }
                ComponentCommand::Enable { name } => {
                    set_component_state(&env, &name, true)?;
                    println!("Component enabled: {}", name);
                }
                ComponentCommand::Disable { name } => {
                    set_component_state(&env, &name, false)?;
                    println!("Component disabled: {}", name);
                }
            }
        }
    }
    Ok(())
}

fn open_logged(path: &std::path::Path) -> Result<Environment, EnvError> {
    let env = Environment::open(path)?;
    logging::init(env.log_settings())?;
    Ok(env)
}

fn set_component_state(env: &Environment, name: &str, enabled: bool) -> Result<(), EnvError> {
    let value = if enabled { "enabled" } else { "disabled" };
    env.config().set(COMPONENTS_SECTION, name, value);
    env.config().save()?;
    if enabled {
        env.enable_component(name);
    } else {
        env.disable_component(name);
    }
    Ok(())
}

/// Splits `section.key=value`; the key may itself contain dots.
fn parse_option(raw: &str) -> Result<(&str, &str, &str), EnvError> {
    let malformed = || {
        EnvError::ValidationError(format!(
            "Expected SECTION.KEY=VALUE, got '{}'",
            raw
        ))
    };
    let (name, value) = raw.split_once('=').ok_or_else(malformed)?;
    let (section, key) = name.split_once('.').ok_or_else(malformed)?;
    if section.is_empty() || key.is_empty() {
        return Err(malformed());
    }
    Ok((section.trim(), key.trim(), value.trim()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), EnvError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| EnvError::ValidationError(e.to_string()))?;
    println!("{}", rendered);
    Ok(())
}
