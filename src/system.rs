//! The configuration system: an arena of configuration nodes.
//!
//! Every loaded document is a node; every `<location>` block that has been
//! resolved against some position in the tree is a node too, without a
//! backing document. Nodes refer to each other through [`NodeId`]s.
//!
//! For a document `app/web.config` loaded at virtual path `app` below a root
//! that declares `<location path="app">` and `<location path="app/admin">`,
//! and which itself declares `<location path="admin">`, opening `admin`
//! from the app node yields the chain
//!
//! ```text
//! root → root:location(app) → app → root:location(app/admin) → app:location(admin)
//! ```
//!
//! Sections are materialized on first access: the parent's instance first,
//! then a fresh element is reset from it and the node's raw markup is read
//! on top.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::builder::ConfigSystemBuilder;
use crate::document::{self, CONFIG_SOURCE};
use crate::element::ReadContext;
use crate::error::ConfigError;
use crate::host::ConfigHost;
use crate::markup::{self, MarkupNode};
use crate::overlay::{OverlayCollection, RawSection, normalize_path};
use crate::protect::{CIPHER_ATTRIBUTE, ENCRYPTED_DATA, PROTECTION_ATTRIBUTE, ProviderRegistry};
use crate::schema::SchemaRegistry;
use crate::section::{Section, SectionGroupInfo, SectionHandle, join_path};
use crate::settings::EngineSettings;
use crate::types::NodeId;

#[derive(Debug)]
pub(crate) struct ConfigNode {
    pub(crate) parent: Option<NodeId>,
    /// Backing document; `None` for location nodes.
    pub(crate) stream: Option<String>,
    /// The document node this node's markup belongs to (itself for documents).
    pub(crate) owner: NodeId,
    /// Virtual path, `/`-separated, empty for the root.
    pub(crate) config_path: String,
    /// Path of the `<location>` block, relative to the owner.
    pub(crate) location: Option<String>,
    pub(crate) groups: Arc<SectionGroupInfo>,
    pub(crate) config_sections: Option<MarkupNode>,
    pub(crate) raw: Vec<RawSection>,
    pub(crate) sealed: HashSet<String>,
    pub(crate) seal_all: bool,
    pub(crate) overlays: OverlayCollection,
    /// Location nodes opened from this document, by lowercased path and
    /// the node they were chained onto.
    pub(crate) overlay_nodes: HashMap<(String, NodeId), NodeId>,
    pub(crate) sections: Mutex<HashMap<String, SectionHandle>>,
}

#[derive(Debug)]
pub struct ConfigSystem {
    pub(crate) nodes: Vec<ConfigNode>,
    pub(crate) registry: SchemaRegistry,
    pub(crate) providers: ProviderRegistry,
    pub(crate) host: Arc<dyn ConfigHost>,
    pub(crate) settings: EngineSettings,
}

impl ConfigSystem {
    pub fn builder() -> ConfigSystemBuilder {
        ConfigSystemBuilder::new()
    }

    pub(crate) fn new(
        host: Arc<dyn ConfigHost>,
        registry: SchemaRegistry,
        providers: ProviderRegistry,
        settings: EngineSettings,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            registry,
            providers,
            host,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn host(&self) -> &Arc<dyn ConfigHost> {
        &self.host
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&ConfigNode, ConfigError> {
        self.nodes.get(id.0).ok_or(ConfigError::UnknownNode(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ConfigNode, ConfigError> {
        self.nodes.get_mut(id.0).ok_or(ConfigError::UnknownNode(id.0))
    }

    fn push(&mut self, node: ConfigNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    // --- loading ------------------------------------------------------------

    /// Load `stream` as a document. With a parent, the document sits at the
    /// parent's own virtual path.
    pub fn load(&mut self, stream: &str, parent: Option<NodeId>) -> Result<NodeId, ConfigError> {
        match parent {
            Some(p) => self.load_at("", stream, p),
            None => self.load_node(stream, None, String::new(), Arc::default()),
        }
    }

    /// Load `stream` as the document of virtual path `path`, relative to
    /// `parent`. Locations declared by ancestors for that path are chained
    /// in between.
    pub fn load_at(&mut self, path: &str, stream: &str, parent: NodeId) -> Result<NodeId, ConfigError> {
        let rel = normalize_path(path);
        let base = self.open_location(parent, &rel)?;
        let config_path = join_path(&self.node(parent)?.config_path, &rel);
        let groups = Arc::clone(&self.node(base)?.groups);
        self.load_node(stream, Some(base), config_path, groups)
    }

    fn load_node(
        &mut self,
        stream: &str,
        parent: Option<NodeId>,
        config_path: String,
        groups: Arc<SectionGroupInfo>,
    ) -> Result<NodeId, ConfigError> {
        let text = self.host.read(stream)?;
        if text.is_none() {
            debug!(stream, "document does not exist; loading it empty");
        }
        let doc = document::parse_document(text.as_deref(), stream, &groups)?;
        let id = NodeId(self.nodes.len());
        let node = ConfigNode {
            parent,
            stream: Some(stream.to_string()),
            owner: id,
            config_path,
            location: None,
            groups: doc.groups,
            config_sections: doc.config_sections,
            raw: doc.sections,
            sealed: doc.sealed,
            seal_all: false,
            overlays: doc.overlays,
            overlay_nodes: HashMap::new(),
            sections: Mutex::new(HashMap::new()),
        };
        let id = self.push(node);
        debug!(stream, node = %id, path = %self.nodes[id.0].config_path, "loaded document");
        Ok(id)
    }

    // --- navigation ---------------------------------------------------------

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, ConfigError> {
        Ok(self.node(id)?.parent)
    }

    pub fn config_path(&self, id: NodeId) -> Result<&str, ConfigError> {
        Ok(&self.node(id)?.config_path)
    }

    /// Backing document name; `None` for location nodes.
    pub fn stream(&self, id: NodeId) -> Result<Option<&str>, ConfigError> {
        Ok(self.node(id)?.stream.as_deref())
    }

    /// Path of the `<location>` block a location node was opened from.
    pub fn location_path(&self, id: NodeId) -> Result<Option<&str>, ConfigError> {
        Ok(self.node(id)?.location.as_deref())
    }

    pub fn overlays(&self, id: NodeId) -> Result<&OverlayCollection, ConfigError> {
        Ok(&self.node(id)?.overlays)
    }

    pub fn section_groups(&self, id: NodeId) -> Result<&SectionGroupInfo, ConfigError> {
        Ok(&self.node(id)?.groups)
    }

    /// Paths of every section visible from `id`, in declaration order.
    pub fn section_paths(&self, id: NodeId) -> Result<Vec<String>, ConfigError> {
        Ok(self.node(id)?.groups.section_paths())
    }

    /// Document nodes on the parent chain of `id`, root first, `id`
    /// included when it has a document.
    fn document_ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, ConfigError> {
        let mut out = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c)?;
            if node.stream.is_some() {
                out.push(c);
            }
            current = node.parent;
        }
        out.reverse();
        Ok(out)
    }

    /// The node holding the effective configuration of virtual path `path`
    /// below `id`: `id` itself when no location applies, else the deepest
    /// location node chained onto it.
    pub fn open_location(&mut self, id: NodeId, path: &str) -> Result<NodeId, ConfigError> {
        let rel = normalize_path(path);
        let own_path = self.node(id)?.config_path.clone();
        if rel.is_empty() {
            return Ok(id);
        }
        let full = join_path(&own_path, &rel);

        let mut current = id;
        for owner in self.document_ancestors(id)? {
            let owner_path = self.node(owner)?.config_path.clone();
            let rel_to_owner = strip_segment_prefix(&full, &owner_path).unwrap_or(&full).to_string();
            let floor = strip_segment_prefix(&own_path, &owner_path)
                .unwrap_or("")
                .len();
            current = self.chain_overlays(owner, &rel_to_owner, floor, current)?;
        }
        trace!(from = %id, path = %rel, to = %current, "resolved location");
        Ok(current)
    }

    /// Chain the best location of `owner` for `rel` onto `base`, resolving
    /// the location's own parent path first.
    fn chain_overlays(
        &mut self,
        owner: NodeId,
        rel: &str,
        floor: usize,
        base: NodeId,
    ) -> Result<NodeId, ConfigError> {
        let best = self
            .node(owner)?
            .overlays
            .find_best_below(rel, floor)
            .map(|o| o.path().to_string());
        let Some(path) = best else {
            return Ok(base);
        };
        let parent_path = path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
        let parent = self.chain_overlays(owner, parent_path, floor, base)?;
        self.open_overlay(owner, &path, parent)
    }

    fn open_overlay(&mut self, owner: NodeId, path: &str, parent: NodeId) -> Result<NodeId, ConfigError> {
        let key = (path.to_ascii_lowercase(), parent);
        let owner_node = self.node(owner)?;
        if let Some(&id) = owner_node.overlay_nodes.get(&key) {
            return Ok(id);
        }
        let overlay = owner_node
            .overlays
            .get(path)
            .ok_or_else(|| ConfigError::malformed(
                owner_node.stream.as_deref().unwrap_or(""),
                0,
                format!("no <location> for path '{path}'"),
            ))?;
        let node = ConfigNode {
            parent: Some(parent),
            stream: None,
            owner,
            config_path: join_path(&owner_node.config_path, overlay.path()),
            location: Some(overlay.path().to_string()),
            groups: Arc::clone(&owner_node.groups),
            config_sections: None,
            raw: overlay.sections.clone(),
            sealed: HashSet::new(),
            seal_all: !overlay.allow_override(),
            overlays: OverlayCollection::default(),
            overlay_nodes: HashMap::new(),
            sections: Mutex::new(HashMap::new()),
        };
        let id = self.push(node);
        self.node_mut(owner)?.overlay_nodes.insert(key, id);
        debug!(owner = %owner, location = path, parent = %parent, node = %id, "opened location");
        Ok(id)
    }

    // --- sections -----------------------------------------------------------

    /// The section at `path` (segments joined with the configured
    /// separator), materializing it and its ancestors on first access.
    /// `None` when no such section is declared.
    pub fn get_section(&self, id: NodeId, path: &str) -> Result<Option<SectionHandle>, ConfigError> {
        let key = path
            .split(self.settings.path_separator.as_str())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        self.section_handle(id, &key)
    }

    pub(crate) fn cached_section(&self, id: NodeId, key: &str) -> Result<Option<SectionHandle>, ConfigError> {
        Ok(self.node(id)?.sections.lock().get(key).cloned())
    }

    pub(crate) fn section_handle(&self, id: NodeId, key: &str) -> Result<Option<SectionHandle>, ConfigError> {
        let node = self.node(id)?;
        let Some(info) = node.groups.get_section(key) else {
            return Ok(None);
        };
        let mut cache = node.sections.lock();
        if let Some(handle) = cache.get(key) {
            return Ok(Some(Arc::clone(handle)));
        }

        // Parents are other nodes, so holding this node's cache is safe.
        let parent = match node.parent {
            Some(p) => self.section_handle(p, key)?,
            None => None,
        };
        let parent = parent.as_ref().map(|h| h.read());

        let mut element =
            self.registry
                .create(&info.type_name)
                .ok_or_else(|| ConfigError::UnrecognizedSection {
                    name: format!("{key} (type '{}' is not registered)", info.type_name),
                    file: info.declared_in.clone(),
                    line: 0,
                })?;
        element.reset(parent.as_deref().map(|s| &s.element));
        if parent.as_ref().is_some_and(|s| s.is_sealed()) {
            element.seal();
        }
        drop(parent);

        let mut section = Section::new(key, element);
        if let Some(raw) = node.raw.iter().find(|r| r.path == key) {
            self.read_raw(&mut section, raw)?;
        }
        section.sealed = node.seal_all || node.sealed.contains(key);
        section.reset_modified();

        trace!(node = %id, section = key, "materialized section");
        let handle = Arc::new(RwLock::new(section));
        cache.insert(key.to_string(), Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Apply stored markup to a freshly reset section, following
    /// `configSource` and decrypting protected bodies.
    fn read_raw(&self, section: &mut Section, raw: &RawSection) -> Result<(), ConfigError> {
        let mut body = raw.node.clone();
        let mut file = raw.file.clone();

        if let Some(source) = body.attr(CONFIG_SOURCE).map(str::to_string) {
            if body.attributes.len() > 1 || !body.children.is_empty() {
                return Err(ConfigError::ExternalSourceConflict {
                    section: raw.path.clone(),
                    file,
                    line: body.line,
                });
            }
            let resolved = self.host.resolve(&raw.file, &source);
            let text = self
                .host
                .read(&resolved)?
                .ok_or_else(|| ConfigError::ExternalSourceNotFound {
                    section: raw.path.clone(),
                    path: resolved.clone(),
                })?;
            let external = markup::parse(&text, &resolved)?;
            if external.name != body.name {
                return Err(ConfigError::malformed(
                    &resolved,
                    external.line,
                    format!("expected <{}> as the root element", body.name),
                ));
            }
            debug!(section = %raw.path, source = %resolved, "reading external section body");
            section.config_source = Some(source);
            body = external;
            file = resolved;
        }

        if let Some(provider) = body.attr(PROTECTION_ATTRIBUTE).map(str::to_string) {
            let cipher = body
                .child(ENCRYPTED_DATA)
                .and_then(|c| c.attr(CIPHER_ATTRIBUTE))
                .ok_or_else(|| {
                    ConfigError::malformed(
                        &file,
                        body.line,
                        format!("protected section '{}' has no <{ENCRYPTED_DATA}>", raw.path),
                    )
                })?;
            let plain = self.providers.decrypt(&provider, cipher)?;
            let decrypted = markup::parse(&plain, &file)?;
            if decrypted.name != body.name {
                return Err(ConfigError::malformed(
                    &file,
                    body.line,
                    format!("decrypted body of '{}' is a <{}>", raw.path, decrypted.name),
                ));
            }
            section.protection = Some(provider);
            body = decrypted;
        }

        body.attributes
            .retain(|(k, _)| k != CONFIG_SOURCE && k != PROTECTION_ATTRIBUTE);
        let ctx = ReadContext {
            file: &file,
            substitution: self.settings.substituted_required,
        };
        section.element.deserialize(&body, &ctx)
    }
}

/// `path` with `prefix/` removed, when `prefix` is a segment prefix of it.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let head = path.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = path.get(prefix.len()..)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}
