//! `[logging]` settings and `tracing` subscriber setup.
//!
//! Settings are validated when an environment opens, so a bad `log_type` or
//! `log_level` stops the environment before it is usable. Installing the
//! global subscriber is left to the process (the `envkit` binary calls
//! [`init`]); library code only emits `tracing` events.

use crate::core::config::Configuration;
use crate::core::error::EnvError;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_TYPES: &[&str] = &["none", "file", "stderr"];
pub const LOG_LEVELS: &[&str] = &["CRITICAL", "ERROR", "WARNING", "INFO", "DEBUG"];
pub const LOG_FORMATS: &[&str] = &["", "compact", "pretty"];

/// Directory (relative to the environment root) holding relative log files.
pub const LOG_DIR: &str = "log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    None,
    File,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Full,
    Compact,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub log_type: LogType,
    pub level: LevelFilter,
    pub file: PathBuf,
    pub format: LogFormat,
}

impl LogSettings {
    pub fn from_config(config: &Configuration, env_root: &Path) -> Result<Self, EnvError> {
        let log_type = match config.get_choice("logging", "log_type", LOG_TYPES)? {
            "file" => LogType::File,
            "stderr" => LogType::Stderr,
            _ => LogType::None,
        };
        let level = match config.get_choice("logging", "log_level", LOG_LEVELS)? {
            "CRITICAL" | "ERROR" => LevelFilter::ERROR,
            "WARNING" => LevelFilter::WARN,
            "INFO" => LevelFilter::INFO,
            _ => LevelFilter::DEBUG,
        };
        let format = match config.get_choice("logging", "log_format", LOG_FORMATS)? {
            "compact" => LogFormat::Compact,
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Full,
        };
        Ok(Self {
            log_type,
            level,
            file: log_file_path(config, env_root),
            format,
        })
    }
}

/// `[logging] log_file`, resolved against `<env>/log` when relative.
pub fn log_file_path(config: &Configuration, env_root: &Path) -> PathBuf {
    config.get_path("logging", "log_file", &env_root.join(LOG_DIR))
}

/// Installs the process-wide subscriber described by `settings`.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init(settings: &LogSettings) -> Result<(), EnvError> {
    let writer = match settings.log_type {
        LogType::None => return Ok(()),
        LogType::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogType::File => {
            if let Some(parent) = settings.file.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&settings.file)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(settings.level.into()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(settings.log_type == LogType::Stderr)
        .with_target(true);

    let installed = match settings.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    installed.map_err(|e| EnvError::ValidationError(format!("Failed to install logger: {}", e)))
}
