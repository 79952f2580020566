//! Settings of the engine itself, loaded in layers.
//!
//! [`EngineSettings`] is a confique struct: the struct is the schema, its
//! `#[config(default)]` attributes are the lowest layer. [`SettingsLoader`]
//! stacks sparse layers on top:
//!
//! ```text
//! Compiled defaults     #[config(default = ...)]
//!        ↑ overridden by
//! TOML files            in the order given, later files win
//!        ↑ overridden by
//! Environment vars      PREFIX__KEY
//!        ↑ overridden by
//! Overrides             .set()
//! ```
//!
//! The pipeline itself ([`resolve_settings`]) runs on pre-loaded inputs and
//! does no I/O.

use std::path::{Path, PathBuf};

use confique::Config;
use serde::{Deserialize, Serialize};
use toml::{Table, Value};
use tracing::debug;

use crate::error::ConfigError;
use crate::types::{SaveMode, SubstitutionPolicy};

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Save mode used by `ConfigSystem::save_default`.
    #[config(default = "modified")]
    pub save_mode: SaveMode,

    /// What to do with values an `on_required_missing` hook supplies.
    #[config(default = "present")]
    pub substituted_required: SubstitutionPolicy,

    /// Indentation width of written documents.
    #[config(default = 2)]
    pub indent: usize,

    /// Separator of section paths passed to `get_section`.
    #[config(default = "/")]
    pub path_separator: String,
}

/// Mirrors the `#[config(default)]` attributes above; the two are pinned
/// together by `default_impl_matches_confique_defaults`.
impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            save_mode: SaveMode::Modified,
            substituted_required: SubstitutionPolicy::Present,
            indent: 2,
            path_separator: "/".into(),
        }
    }
}

/// Everything [`resolve_settings`] needs; no I/O happens past this point.
#[derive(Debug, Clone, Default)]
pub struct SettingsInput {
    /// File contents, lowest priority first.
    pub files: Vec<(PathBuf, String)>,
    pub env_vars: Vec<(String, String)>,
    /// `None` disables the environment layer.
    pub env_prefix: Option<String>,
    /// `(dotted_key, value)` pairs, highest priority.
    pub overrides: Vec<(String, Value)>,
    /// Reject keys `EngineSettings` does not know.
    pub strict: bool,
}

pub fn resolve_settings(input: SettingsInput) -> Result<EngineSettings, ConfigError> {
    let mut merged = Table::new();
    for (path, content) in &input.files {
        if input.strict {
            check_unknown_keys(content, path)?;
        }
        let table: Table = toml::from_str(content).map_err(|e| ConfigError::SettingsParse {
            path: path.clone(),
            source: e,
        })?;
        merged = deep_merge(merged, table);
    }

    if let Some(prefix) = &input.env_prefix {
        merged = deep_merge(merged, env_to_table(prefix, input.env_vars));
    }

    for (key, value) in input.overrides {
        merged = deep_merge(merged, dotted_table(&key, value));
    }

    let layer: <EngineSettings as Config>::Layer =
        Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::SettingsParse {
                path: PathBuf::from("<merged>"),
                source: e,
            })?;

    let settings = EngineSettings::builder().preloaded(layer).load()?;
    debug!(?settings, "resolved engine settings");
    Ok(settings)
}

/// Deep-merge `top` onto `base`: tables recurse, anything else is replaced.
pub fn deep_merge(mut base: Table, top: Table) -> Table {
    for (key, value) in top {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Table(lower)), Value::Table(upper)) => Value::Table(deep_merge(lower, upper)),
            (_, upper) => upper,
        };
        base.insert(key, merged);
    }
    base
}

fn dotted_table(key: &str, value: Value) -> Table {
    let mut segments: Vec<&str> = key.split('.').collect();
    let leaf = segments.pop().unwrap_or(key);
    let mut table = Table::new();
    table.insert(leaf.to_string(), value);
    for segment in segments.into_iter().rev() {
        let mut outer = Table::new();
        outer.insert(segment.to_string(), Value::Table(table));
        table = outer;
    }
    table
}

/// `{PREFIX}__A__B=value` becomes `a.b = value`. Values are typed by
/// guessing: bool, then integer, then float (only with a dot), then string.
pub fn env_to_table(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Table {
    let needle = format!("{prefix}__");
    let mut table = Table::new();
    for (name, raw) in vars {
        let Some(rest) = name.strip_prefix(&needle).filter(|r| !r.is_empty()) else {
            continue;
        };
        let key = rest
            .split("__")
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(".");
        table = deep_merge(table, dotted_table(&key, guess_value(&raw)));
    }
    table
}

fn guess_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") {
        Value::Boolean(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Value::Boolean(false)
    } else if let Ok(i) = raw.parse::<i64>() {
        Value::Integer(i)
    } else if raw.contains('.')
        && let Ok(f) = raw.parse::<f64>()
    {
        Value::Float(f)
    } else {
        Value::String(raw.to_string())
    }
}

/// Strict mode: every key `EngineSettings` does not consume is an error,
/// reported with its best-effort line number.
fn check_unknown_keys(content: &str, path: &Path) -> Result<(), ConfigError> {
    let mut unknown: Vec<String> = Vec::new();
    let deserializer = toml::Deserializer::new(content);
    let _layer: <EngineSettings as Config>::Layer =
        serde_ignored::deserialize(deserializer, |ignored| unknown.push(ignored.to_string()))
            .map_err(|e| ConfigError::SettingsParse {
                path: path.to_path_buf(),
                source: e,
            })?;

    if unknown.is_empty() {
        return Ok(());
    }
    let errors = unknown
        .into_iter()
        .map(|key| ConfigError::UnknownSettingsKey {
            line: key_line(content, &key),
            key,
            path: path.to_path_buf(),
        })
        .collect();
    Err(ConfigError::UnknownSettingsKeys(errors))
}

/// 1-indexed line of `dotted_key`, tracking `[table]` headers; 0 if not found.
fn key_line(content: &str, dotted_key: &str) -> usize {
    let (table, leaf) = match dotted_key.rsplit_once('.') {
        Some((t, l)) => (t, l),
        None => ("", dotted_key),
    };
    let mut current = String::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            current = header.trim().to_string();
            continue;
        }
        if current == table
            && let Some(after) = trimmed.strip_prefix(leaf)
            && after.trim_start().starts_with('=')
        {
            return i + 1;
        }
    }
    0
}

/// Collects the layers and resolves them into [`EngineSettings`].
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    files: Vec<PathBuf>,
    env_prefix: Option<String>,
    strict: bool,
    overrides: Vec<(String, Value)>,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            env_prefix: None,
            strict: true,
            overrides: Vec::new(),
        }
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a TOML file; missing files are skipped at load time.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Add `{platform config dir}/{app}/settings.toml`, if the platform has one.
    pub fn platform_file(self, app: &str) -> Self {
        match platform_file(app) {
            Some(path) => self.file(path),
            None => self,
        }
    }

    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self
    }

    /// Reject unknown keys in files (default: `true`).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.overrides.push((key.to_string(), value.into()));
        self
    }

    pub fn load(self) -> Result<EngineSettings, ConfigError> {
        let mut files = Vec::new();
        for path in self.files {
            match std::fs::read_to_string(&path) {
                Ok(content) => files.push((path, content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ConfigError::Io { path, source: e }),
            }
        }
        let env_vars = match &self.env_prefix {
            Some(_) => std::env::vars().collect(),
            None => Vec::new(),
        };
        resolve_settings(SettingsInput {
            files,
            env_vars,
            env_prefix: self.env_prefix,
            overrides: self.overrides,
            strict: self.strict,
        })
    }
}

pub fn platform_file(app: &str) -> Option<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", app)?;
    Some(dirs.config_dir().join("settings.toml"))
}
