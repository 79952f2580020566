use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Malformed document {file} (line {line}): {reason}")]
    MalformedDocument {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Unknown property '{name}' on '{element}' in {file} (line {line})")]
    UnknownProperty {
        name: String,
        element: String,
        file: String,
        line: usize,
    },

    #[error("Unrecognized configuration section '{name}' in {file} (line {line})")]
    UnrecognizedSection {
        name: String,
        file: String,
        line: usize,
    },

    #[error("Property '{name}' appears more than once in {file} (line {line})")]
    DuplicateProperty {
        name: String,
        file: String,
        line: usize,
    },

    #[error("Duplicate key '{key}' in collection '{collection}'")]
    DuplicateKey { key: String, collection: String },

    #[error("No entry '{key}' in collection '{collection}'")]
    EntryNotFound { key: String, collection: String },

    #[error("Entry '{key}' is inherited from a parent document and cannot be removed")]
    ImmutableEntryRemoval { key: String },

    #[error("'{name}' is not a lockable property of '{element}'")]
    InvalidLockName { name: String, element: String },

    #[error("'{name}' is locked by a parent document and cannot be overridden ({file}, line {line})")]
    LockedPropertyOverride {
        name: String,
        file: String,
        line: usize,
    },

    #[error("Required property '{name}' of '{element}' is missing in {file} (line {line})")]
    MissingRequiredProperty {
        name: String,
        element: String,
        file: String,
        line: usize,
    },

    #[error("Invalid value for '{property}' of '{element}': {reason}")]
    ValidationFailed {
        property: String,
        element: String,
        reason: String,
    },

    #[error("Config source '{path}' for section '{section}' was not found")]
    ExternalSourceNotFound { section: String, path: String },

    #[error(
        "Section '{section}' uses configSource and may carry no other attributes or elements ({file}, line {line})"
    )]
    ExternalSourceConflict {
        section: String,
        file: String,
        line: usize,
    },

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Protection provider '{provider}': {reason}")]
    Protection { provider: String, reason: String },

    #[error("No configuration node with id {0}")]
    UnknownNode(usize),

    #[error("Failed to parse settings {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Unknown key '{key}' in {path} (line {line})")]
    UnknownSettingsKey {
        key: String,
        path: PathBuf,
        line: usize,
    },

    #[error("Unknown keys in settings file")]
    UnknownSettingsKeys(Vec<ConfigError>),

    #[error("Settings error: {0}")]
    Settings(#[from] confique::Error),
}

impl ConfigError {
    pub(crate) fn malformed(file: &str, line: usize, reason: impl Into<String>) -> Self {
        ConfigError::MalformedDocument {
            file: file.to_string(),
            line,
            reason: reason.into(),
        }
    }
}
