//! CLI struct definitions for the `envkit` admin command.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "envkit",
    version = env!("CARGO_PKG_VERSION"),
    about = "Create, upgrade and inspect envkit environments"
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create a new environment in an empty directory
    Init {
        /// Environment directory
        path: PathBuf,
        /// Database connection string (defaults to sqlite:db/envkit.db)
        #[clap(long)]
        database: Option<String>,
        /// Initial option as section.key=value; may be repeated
        #[clap(long = "set", value_name = "SECTION.KEY=VALUE")]
        options: Vec<String>,
    },
    /// Run pending schema migrations and component upgrades
    Upgrade {
        /// Environment directory
        path: PathBuf,
        /// Only report whether an upgrade is needed
        #[clap(long)]
        check: bool,
        /// Back up the database before upgrading
        #[clap(long)]
        backup: bool,
        /// Backup destination (defaults to db/backup-v<version>.db)
        #[clap(long, requires = "backup")]
        backup_dest: Option<PathBuf>,
    },
    /// Show system information
    Info {
        /// Environment directory
        path: PathBuf,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// List known (active) users
    Users {
        /// Environment directory
        path: PathBuf,
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// List, enable or disable components
    Component {
        /// Environment directory
        path: PathBuf,
        #[clap(subcommand)]
        command: ComponentCommand,
    },
}

#[derive(Subcommand, Debug)]
pub(crate) enum ComponentCommand {
    /// List registered components
    List {
        /// Output format: 'text' or 'json'.
        #[clap(long, default_value = "text")]
        format: String,
    },
    /// Enable a component in the configuration
    Enable { name: String },
    /// Disable a component in the configuration
    Disable { name: String },
}
