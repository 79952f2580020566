//! Small shared vocabulary types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which delta a document persists on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveMode {
    /// Every property with a value, every nested element, collections
    /// re-emitted after a `clear` marker.
    Full,
    /// Values that differ from the parent plus everything set locally.
    #[default]
    Modified,
    /// Only values whose effective value differs from the parent.
    Minimal,
}

/// Where a property's current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueOrigin {
    /// Lazily derived from the descriptor's default; never "present".
    Default,
    /// Copied from the parent document's effective value.
    Inherited,
    /// Read from this document or assigned programmatically.
    SetHere,
}

/// Handle of a configuration node inside a [`ConfigSystem`](crate::ConfigSystem).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Policy for values supplied by an `OnRequiredPropertyNotFound` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubstitutionPolicy {
    /// Keep the substituted value as present but unmodified.
    #[default]
    Present,
    /// Refuse the substitution and report the property as missing.
    Error,
}

/// Provenance used in diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub file: String,
    pub line: usize,
}

impl Provenance {
    pub fn new(file: &str, line: usize) -> Self {
        Self {
            file: file.to_string(),
            line,
        }
    }
}
