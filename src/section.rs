//! Section declarations and section instances.
//!
//! Declarations (`<configSections>`) form a tree of [`SectionGroupInfo`]s
//! shared by every node of a document chain; instances ([`Section`]) are
//! per node and created lazily.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::element::Element;
use crate::error::ConfigError;
use crate::types::SaveMode;

/// A section instance shared between readers and writers.
pub type SectionHandle = Arc<RwLock<Section>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    pub name: String,
    pub type_name: String,
    pub allow_location: bool,
    /// Document the declaration came from.
    pub declared_in: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionGroupInfo {
    pub name: String,
    pub type_name: Option<String>,
    sections: Vec<SectionInfo>,
    groups: Vec<SectionGroupInfo>,
}

impl SectionGroupInfo {
    pub fn new(name: impl Into<String>, type_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            type_name,
            ..Self::default()
        }
    }

    pub fn sections(&self) -> &[SectionInfo] {
        &self.sections
    }

    pub fn groups(&self) -> &[SectionGroupInfo] {
        &self.groups
    }

    fn group(&self, name: &str) -> Option<&SectionGroupInfo> {
        self.groups.iter().find(|g| g.name == name)
    }

    fn section(&self, name: &str) -> Option<&SectionInfo> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up a section by `/`-separated path. Never creates anything.
    pub fn get_section(&self, path: &str) -> Option<&SectionInfo> {
        let (groups, name) = split_last(path)?;
        self.get_group_segments(&groups)?.section(name)
    }

    pub fn get_group(&self, path: &str) -> Option<&SectionGroupInfo> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        self.get_group_segments(&segments)
    }

    fn get_group_segments(&self, segments: &[&str]) -> Option<&SectionGroupInfo> {
        let mut current = self;
        for s in segments {
            current = current.group(s)?;
        }
        Some(current)
    }

    /// Full paths of every declared section, in declaration order.
    pub fn section_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for s in &self.sections {
            out.push(join_path(prefix, &s.name));
        }
        for g in &self.groups {
            g.collect_paths(&join_path(prefix, &g.name), out);
        }
    }

    pub(crate) fn declare_group(
        &mut self,
        parent: &[String],
        name: &str,
        type_name: Option<String>,
    ) -> Result<(), String> {
        let owner = self.group_mut(parent)?;
        if owner.section(name).is_some() {
            return Err(format!("'{name}' is already declared as a section"));
        }
        if owner.group(name).is_none() {
            owner.groups.push(SectionGroupInfo::new(name, type_name));
        }
        Ok(())
    }

    pub(crate) fn declare_section(&mut self, parent: &[String], info: SectionInfo) -> Result<(), String> {
        let owner = self.group_mut(parent)?;
        if let Some(existing) = owner.section(&info.name) {
            return Err(format!(
                "section '{}' is already declared in {}",
                info.name, existing.declared_in
            ));
        }
        if owner.group(&info.name).is_some() {
            return Err(format!("'{}' is already declared as a section group", info.name));
        }
        owner.sections.push(info);
        Ok(())
    }

    fn group_mut(&mut self, segments: &[String]) -> Result<&mut SectionGroupInfo, String> {
        let mut current = self;
        for s in segments {
            current = current
                .groups
                .iter_mut()
                .find(|g| &g.name == s)
                .ok_or_else(|| format!("section group '{s}' is not declared"))?;
        }
        Ok(current)
    }
}

fn split_last(path: &str) -> Option<(Vec<&str>, &str)> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let last = segments.pop()?;
    Some((segments, last))
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// A materialized section: its element plus section-level settings.
#[derive(Debug, Clone)]
pub struct Section {
    path: String,
    pub(crate) element: Element,
    pub(crate) config_source: Option<String>,
    pub(crate) protection: Option<String>,
    /// Locked for every descendant (`allowOverride="false"`).
    pub(crate) sealed: bool,
    modified: bool,
}

impl Section {
    pub(crate) fn new(path: impl Into<String>, element: Element) -> Self {
        Self {
            path: path.into(),
            element,
            config_source: None,
            protection: None,
            sealed: false,
            modified: false,
        }
    }

    /// Full `/`-separated path, group segments included.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Element name the section is written with.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn element_mut(&mut self) -> &mut Element {
        &mut self.element
    }

    pub fn get(&self, name: &str) -> Result<Option<toml::Value>, ConfigError> {
        self.element.get(name)
    }

    pub fn set(&mut self, name: &str, value: impl Into<toml::Value>) -> Result<(), ConfigError> {
        self.element.set(name, value)
    }

    pub fn config_source(&self) -> Option<&str> {
        self.config_source.as_deref()
    }

    /// Store the section body in a separate document (or back inline).
    pub fn set_config_source(&mut self, source: Option<&str>) {
        self.config_source = source.map(str::to_string);
        self.modified = true;
    }

    pub fn protection_provider(&self) -> Option<&str> {
        self.protection.as_deref()
    }

    pub fn is_protected(&self) -> bool {
        self.protection.is_some()
    }

    pub fn protect(&mut self, provider: &str) {
        self.protection = Some(provider.to_string());
        self.modified = true;
    }

    pub fn unprotect(&mut self) {
        self.protection = None;
        self.modified = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_modified(&self) -> bool {
        self.modified || self.element.is_modified()
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
        self.element.reset_modified();
    }

    /// The section's delta against `parent`, or `None` when there is
    /// nothing to write under `mode`.
    pub fn delta(&self, parent: Option<&Section>, mode: SaveMode) -> Option<crate::markup::MarkupNode> {
        let parent_element = parent.map(|p| &p.element);
        let mut delta = Element::new(Arc::clone(self.element.schema()));
        delta.unmerge(&self.element, parent_element, mode);
        if delta.has_values(parent_element, mode) {
            return Some(delta.serialize(self.name(), parent_element, mode));
        }
        let keep_empty = (mode == SaveMode::Modified && self.is_modified())
            || self.config_source.is_some()
            || self.protection.is_some();
        keep_empty.then(|| crate::markup::MarkupNode::new(self.name()))
    }
}
