//! Saving: render a document node's delta and write it through the host.
//!
//! Rendering is separate from writing. [`ConfigSystem::render`] produces
//! every output a save needs (external `configSource` bodies first, the main
//! document last) without touching the host; the save operations then write
//! them in order and only after all writes succeeded clear the modified
//! flags of the node's sections and of its location nodes.
//!
//! A `<location>` block is written from the location node opened on its
//! own document's chain, never from one chained below another document.

use tracing::{debug, info, warn};

use crate::document::{CONFIG_SOURCE, LOCATION, ROOT};
use crate::error::ConfigError;
use crate::markup::{self, MarkupNode};
use crate::protect::{CIPHER_ATTRIBUTE, ENCRYPTED_DATA, PROTECTION_ATTRIBUTE};
use crate::section::Section;
use crate::system::ConfigSystem;
use crate::types::{NodeId, SaveMode};

/// One document to write: host name and full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub name: String,
    pub text: String,
}

impl ConfigSystem {
    /// Write the document behind `id` (the declaring document, for location
    /// nodes) under `mode`.
    pub fn save(&mut self, id: NodeId, mode: SaveMode) -> Result<(), ConfigError> {
        let owner = self.node(id)?.owner;
        let stream = self.document_name(owner)?;
        self.write_rendered(owner, &stream, mode)
    }

    /// [`save`](Self::save) with the configured default mode.
    pub fn save_default(&mut self, id: NodeId) -> Result<(), ConfigError> {
        self.save(id, self.settings.save_mode)
    }

    /// Write the document behind `id` to `stream` instead, and keep it there
    /// for later saves.
    pub fn save_as(&mut self, id: NodeId, stream: &str, mode: SaveMode) -> Result<(), ConfigError> {
        let owner = self.node(id)?.owner;
        self.write_rendered(owner, stream, mode)?;
        if let Some(node) = self.nodes.get_mut(owner.index()) {
            node.stream = Some(stream.to_string());
        }
        Ok(())
    }

    fn document_name(&self, owner: NodeId) -> Result<String, ConfigError> {
        self.node(owner)?
            .stream
            .clone()
            .ok_or(ConfigError::UnknownNode(owner.index()))
    }

    fn write_rendered(&mut self, owner: NodeId, stream: &str, mode: SaveMode) -> Result<(), ConfigError> {
        let (outputs, saved) = self.render_nodes(owner, stream, mode)?;
        for doc in &outputs {
            self.host.write(&doc.name, &doc.text)?;
            debug!(name = %doc.name, "wrote configuration document");
        }
        self.mark_saved(&saved)?;
        info!(stream, ?mode, documents = outputs.len(), "saved configuration");
        Ok(())
    }

    /// Clear modified flags on every materialized section of `ids`.
    fn mark_saved(&self, ids: &[NodeId]) -> Result<(), ConfigError> {
        for &id in ids {
            let handles: Vec<_> = self.node(id)?.sections.lock().values().cloned().collect();
            for handle in handles {
                handle.write().reset_modified();
            }
        }
        Ok(())
    }

    /// Everything a save of document node `owner` to `stream` would write,
    /// main document last.
    pub fn render(&mut self, owner: NodeId, stream: &str, mode: SaveMode) -> Result<Vec<RenderedDocument>, ConfigError> {
        Ok(self.render_nodes(owner, stream, mode)?.0)
    }

    /// The rendered documents plus the nodes whose state they capture.
    fn render_nodes(
        &mut self,
        owner: NodeId,
        stream: &str,
        mode: SaveMode,
    ) -> Result<(Vec<RenderedDocument>, Vec<NodeId>), ConfigError> {
        let paths: Vec<String> = self
            .node(owner)?
            .overlays
            .iter()
            .map(|o| o.path().to_string())
            .collect();
        let mut saved = vec![owner];
        for path in &paths {
            saved.push(self.location_node(owner, path)?);
        }

        let node = self.node(owner)?;
        let mut pending = Vec::new();
        let mut root = MarkupNode::new(ROOT);
        if let Some(decls) = &node.config_sections {
            root.push(decls.clone());
        }

        let mut sealed = Vec::new();
        for (path, section) in self.render_sections(owner, stream, mode, &mut pending)? {
            if node.sealed.contains(&path) {
                sealed.push((path, section));
            } else {
                place(&mut root, &path, section);
            }
        }
        if !sealed.is_empty() {
            let mut location = MarkupNode::new(LOCATION).with_attr("allowOverride", "false");
            for (path, section) in sealed {
                place(&mut location, &path, section);
            }
            root.push(location);
        }

        for (overlay, &id) in node.overlays.iter().zip(&saved[1..]) {
            let mut location = MarkupNode::new(LOCATION).with_attr("path", overlay.path());
            if !overlay.allow_override() {
                location.set_attr("allowOverride", "false");
            }
            for (path, section) in self.render_sections(id, stream, mode, &mut pending)? {
                place(&mut location, &path, section);
            }
            root.push(location);
        }

        pending.push(RenderedDocument {
            name: stream.to_string(),
            text: markup::render_document(&root, self.settings.indent)?,
        });
        Ok((pending, saved))
    }

    /// The node to save `owner`'s location `path` from: the location opened
    /// on `owner`'s own chain, so no other document's values enter its delta.
    fn location_node(&mut self, owner: NodeId, path: &str) -> Result<NodeId, ConfigError> {
        let id = self.open_location(owner, path)?;
        let key = path.to_ascii_lowercase();
        for ((p, _), &other) in &self.node(owner)?.overlay_nodes {
            if *p != key || other == id {
                continue;
            }
            let modified = self
                .node(other)?
                .sections
                .lock()
                .values()
                .any(|h| h.read().is_modified());
            if modified {
                warn!(
                    location = path,
                    node = %other,
                    "changes made below another document are not saved; open the location from its own document"
                );
            }
        }
        Ok(id)
    }

    /// Section elements of node `id` in declaration order: the delta of
    /// every materialized section, the stored markup of the others.
    fn render_sections(
        &self,
        id: NodeId,
        stream: &str,
        mode: SaveMode,
        pending: &mut Vec<RenderedDocument>,
    ) -> Result<Vec<(String, MarkupNode)>, ConfigError> {
        let node = self.node(id)?;
        let mut out = Vec::new();
        for path in node.groups.section_paths() {
            let raw = node.raw.iter().find(|r| r.path == path);
            let handle = match (mode, raw) {
                (SaveMode::Full, Some(_)) => self.section_handle(id, &path)?,
                _ => self.cached_section(id, &path)?,
            };
            let Some(handle) = handle else {
                if let Some(raw) = raw {
                    out.push((path, raw.node.clone()));
                }
                continue;
            };
            let parent = match node.parent {
                Some(p) => self.section_handle(p, &path)?,
                None => None,
            };
            let parent = parent.as_ref().map(|h| h.read());
            let section = handle.read();
            if let Some(rendered) =
                self.render_section(&section, parent.as_deref(), stream, mode, pending)?
            {
                out.push((path, rendered));
            }
        }
        Ok(out)
    }

    fn render_section(
        &self,
        section: &Section,
        parent: Option<&Section>,
        stream: &str,
        mode: SaveMode,
        pending: &mut Vec<RenderedDocument>,
    ) -> Result<Option<MarkupNode>, ConfigError> {
        let Some(mut body) = section.delta(parent, mode) else {
            return Ok(None);
        };
        if let Some(provider) = section.protection_provider() {
            let plain = markup::render_fragment(&body, self.settings.indent)?;
            let cipher = self.providers.encrypt(provider, &plain)?;
            let mut wrapped = MarkupNode::new(section.name()).with_attr(PROTECTION_ATTRIBUTE, provider);
            wrapped.push(MarkupNode::new(ENCRYPTED_DATA).with_attr(CIPHER_ATTRIBUTE, cipher));
            body = wrapped;
        }
        if let Some(source) = section.config_source() {
            pending.push(RenderedDocument {
                name: self.host.resolve(stream, source),
                text: markup::render_document(&body, self.settings.indent)?,
            });
            return Ok(Some(
                MarkupNode::new(section.name()).with_attr(CONFIG_SOURCE, source),
            ));
        }
        Ok(Some(body))
    }
}

/// Append `section` below `container`, inside one wrapper element per group
/// segment of `path`.
fn place(container: &mut MarkupNode, path: &str, section: MarkupNode) {
    let mut segments: Vec<&str> = path.split('/').collect();
    segments.pop();
    let mut current = container;
    for group in segments {
        let index = match current.children.iter().position(|c| c.name == group) {
            Some(i) => i,
            None => {
                current.push(MarkupNode::new(group));
                current.children.len() - 1
            }
        };
        current = &mut current.children[index];
    }
    current.push(section);
}
