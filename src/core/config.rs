//! Environment configuration: `conf/envkit.toml` and its `.sample` twin.
//!
//! Every value is kept as a string and interpreted by typed accessors. The
//! option declarations in [`OPTIONS`] supply defaults and documentation.
//! [`Configuration::save`] writes both files from the same values; the sample
//! only adds comment lines, so both parse to identical tables.

use crate::core::error::EnvError;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Live config file, relative to the environment root.
pub const CONFIG_FILE: &str = "conf/envkit.toml";
/// Suffix appended to the live file name for the documented sample.
pub const SAMPLE_SUFFIX: &str = ".sample";
/// Section mapping component names to `enabled` / `disabled`.
pub const COMPONENTS_SECTION: &str = "components";

const TRUE_VALUES: &[&str] = &["yes", "true", "enabled", "on", "1"];
const FALSE_VALUES: &[&str] = &["no", "false", "disabled", "off", "0"];

/// A declared option with its default and documentation.
#[derive(Debug, Clone, Copy)]
pub struct OptionDecl {
    pub section: &'static str,
    pub key: &'static str,
    pub default: &'static str,
    pub doc: &'static str,
}

pub const OPTIONS: &[OptionDecl] = &[
    OptionDecl {
        section: "env",
        key: "database",
        default: "sqlite:db/envkit.db",
        doc: "Database connection string. Relative SQLite paths are resolved against the environment directory.",
    },
    OptionDecl {
        section: "env",
        key: "base_url",
        default: "",
        doc: "Public base URL of the environment, used when absolute links are needed.",
    },
    OptionDecl {
        section: "env",
        key: "secure_cookies",
        default: "disabled",
        doc: "Restrict cookies to HTTPS connections.",
    },
    OptionDecl {
        section: "env",
        key: "admin_contact",
        default: "",
        doc: "Address shown to users when an operation needs operator attention.",
    },
    OptionDecl {
        section: "logging",
        key: "log_type",
        default: "none",
        doc: "Logging destination: none, file or stderr.",
    },
    OptionDecl {
        section: "logging",
        key: "log_level",
        default: "DEBUG",
        doc: "Minimum level recorded: CRITICAL, ERROR, WARNING, INFO or DEBUG.",
    },
    OptionDecl {
        section: "logging",
        key: "log_file",
        default: "envkit.log",
        doc: "Log file used when log_type is file. Relative paths are resolved against the environment's log directory.",
    },
    OptionDecl {
        section: "logging",
        key: "log_format",
        default: "",
        doc: "Line layout: empty for the default layout, compact or pretty.",
    },
];

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Typed view over the environment config file.
#[derive(Debug)]
pub struct Configuration {
    path: PathBuf,
    sections: RwLock<Sections>,
}

impl Configuration {
    /// Empty configuration bound to `path`; nothing is read or written.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: RwLock::new(Sections::new()),
        }
    }

    /// Reads `path`. A missing file is [`EnvError::MissingConfigFile`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, EnvError> {
        let path = path.into();
        if !path.is_file() {
            return Err(EnvError::MissingConfigFile(path));
        }
        let content = fs::read_to_string(&path)?;
        let sections = parse_sections(&content)?;
        Ok(Self {
            path,
            sections: RwLock::new(sections),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(SAMPLE_SUFFIX);
        PathBuf::from(name)
    }

    /// Current value, falling back to the declared default, then `""`.
    pub fn get(&self, section: &str, key: &str) -> String {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = sections.get(section).and_then(|s| s.get(key)) {
            return value.clone();
        }
        declared(section, key)
            .map(|decl| decl.default.to_string())
            .unwrap_or_default()
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<bool, EnvError> {
        let value = self.get(section, key);
        parse_bool(&value).ok_or_else(|| invalid(section, key, &value, &["yes", "no"]))
    }

    pub fn get_int(&self, section: &str, key: &str) -> Result<i64, EnvError> {
        let value = self.get(section, key);
        value
            .trim()
            .parse()
            .map_err(|_| invalid(section, key, &value, &["<integer>"]))
    }

    /// Comma-separated list with blank items dropped.
    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get(section, key)
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Path value; relative paths are joined onto `base`.
    pub fn get_path(&self, section: &str, key: &str, base: &Path) -> PathBuf {
        let value = self.get(section, key);
        let path = Path::new(&value);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base.join(path)
        }
    }

    /// Matches the value case-insensitively against `allowed` and returns the
    /// allowed spelling.
    pub fn get_choice(
        &self,
        section: &str,
        key: &str,
        allowed: &[&'static str],
    ) -> Result<&'static str, EnvError> {
        let value = self.get(section, key);
        allowed
            .iter()
            .find(|choice| choice.eq_ignore_ascii_case(value.trim()))
            .copied()
            .ok_or_else(|| invalid(section, key, &value, allowed))
    }

    pub fn set(&self, section: &str, key: &str, value: &str) {
        let mut sections = self.sections.write().unwrap_or_else(PoisonError::into_inner);
        sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// `[components]` entries as `(name, enabled)`, in name order.
    pub fn component_states(&self) -> Result<Vec<(String, bool)>, EnvError> {
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(components) = sections.get(COMPONENTS_SECTION) else {
            return Ok(Vec::new());
        };
        components
            .iter()
            .map(|(name, value)| {
                parse_bool(value)
                    .map(|enabled| (name.clone(), enabled))
                    .ok_or_else(|| {
                        invalid(COMPONENTS_SECTION, name, value, &["enabled", "disabled"])
                    })
            })
            .collect()
    }

    /// Writes the live file and the sample file.
    pub fn save(&self) -> Result<(), EnvError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let sections = self.effective_sections();
        fs::write(&self.path, render(&sections, false))?;
        fs::write(self.sample_path(), render(&sections, true))?;
        Ok(())
    }

    /// Declared defaults overlaid with explicitly set values.
    fn effective_sections(&self) -> Sections {
        let mut merged = Sections::new();
        for decl in OPTIONS {
            merged
                .entry(decl.section.to_string())
                .or_default()
                .insert(decl.key.to_string(), decl.default.to_string());
        }
        let sections = self.sections.read().unwrap_or_else(PoisonError::into_inner);
        for (section, values) in sections.iter() {
            let target = merged.entry(section.clone()).or_default();
            for (key, value) in values {
                target.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

pub fn declared(section: &str, key: &str) -> Option<&'static OptionDecl> {
    OPTIONS
        .iter()
        .find(|decl| decl.section == section && decl.key == key)
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim().to_ascii_lowercase();
    if value.is_empty() || FALSE_VALUES.contains(&value.as_str()) {
        Some(false)
    } else if TRUE_VALUES.contains(&value.as_str()) {
        Some(true)
    } else {
        None
    }
}

fn invalid(section: &str, key: &str, value: &str, allowed: &[&'static str]) -> EnvError {
    EnvError::InvalidConfigValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        allowed: allowed.to_vec(),
    }
}

fn parse_sections(content: &str) -> Result<Sections, EnvError> {
    let table = content.parse::<toml::Table>()?;
    let mut sections = Sections::new();
    for (section, value) in table {
        let toml::Value::Table(entries) = value else {
            return Err(EnvError::ValidationError(format!(
                "Top-level key '{}' must be a [section]",
                section
            )));
        };
        let target = sections.entry(section).or_default();
        for (key, value) in entries {
            target.insert(key, scalar_to_string(&value)?);
        }
    }
    Ok(sections)
}

fn scalar_to_string(value: &toml::Value) -> Result<String, EnvError> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(items) => items
            .iter()
            .map(scalar_to_string)
            .collect::<Result<Vec<_>, _>>()
            .map(|items| items.join(",")),
        toml::Value::Table(_) => Err(EnvError::ValidationError(
            "Nested tables are not supported in configuration sections".to_string(),
        )),
    }
}

fn render(sections: &Sections, with_docs: bool) -> String {
    let mut out = String::new();
    if with_docs {
        out.push_str("# envkit configuration reference.\n");
        out.push_str("# Generated alongside envkit.toml; values match the live file.\n\n");
    }
    for (section, values) in sections {
        out.push_str(&format!("[{}]\n", format_key(section)));
        for (key, value) in values {
            if with_docs && let Some(decl) = declared(section, key) {
                for line in decl.doc.lines() {
                    out.push_str(&format!("# {}\n", line));
                }
            }
            out.push_str(&format!(
                "{} = {}\n",
                format_key(key),
                toml::Value::String(value.clone())
            ));
        }
        out.push('\n');
    }
    out
}

fn format_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare {
        key.to_string()
    } else {
        toml::Value::String(key.to_string()).to_string()
    }
}
