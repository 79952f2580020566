//! Keyed collections of child elements.
//!
//! Entries keep the order the documents declared them in. Entries copied
//! from the parent document are flagged as inherited and sit in one block;
//! `inherited_limit` marks where that block starts (alternate collections,
//! new entries go first) or ends (the usual case, new entries go last).

use tracing::{debug, trace};

use crate::element::{API_SOURCE, Element, ReadContext};
use crate::error::ConfigError;
use crate::lock::LockSets;
use crate::markup::MarkupNode;
use crate::schema::{CollectionSchema, CollectionStyle};
use crate::types::SaveMode;

#[derive(Debug, Clone)]
pub(crate) struct CollectionEntry {
    pub(crate) element: Element,
    /// Element name the entry was declared with.
    pub(crate) tag: String,
    pub(crate) inherited: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CollectionState {
    pub(crate) schema: CollectionSchema,
    pub(crate) entries: Vec<CollectionEntry>,
    /// Key-only elements for parent entries this document removes.
    pub(crate) removed: Vec<Element>,
    pub(crate) inherited_limit: usize,
    pub(crate) emit_clear: bool,
}

/// Where a collection operation was triggered, for error reporting.
#[derive(Clone, Copy)]
struct Site<'a> {
    file: &'a str,
    line: usize,
}

const API: Site<'static> = Site {
    file: API_SOURCE,
    line: 0,
};

impl CollectionState {
    pub(crate) fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            entries: Vec::new(),
            removed: Vec::new(),
            inherited_limit: 0,
            emit_clear: false,
        }
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.element.collection_key() == key)
    }

    fn locked_error(key: &str, site: Site<'_>) -> ConfigError {
        ConfigError::LockedPropertyOverride {
            name: key.to_string(),
            file: site.file.to_string(),
            line: site.line,
        }
    }

    fn is_entry_locked(&self, i: usize) -> bool {
        self.entries[i].element.inherited_locks.is_item_locked()
    }

    pub(crate) fn reset(&mut self, parent: Option<&CollectionState>, item_locked: bool) {
        self.entries.clear();
        self.removed.clear();
        self.emit_clear = false;
        if let Some(parent) = parent {
            for pe in &parent.entries {
                let mut item = self.schema.new_item();
                item.reset(Some(&pe.element));
                if item_locked {
                    item.inherited_locks.set_item(true);
                }
                self.entries.push(CollectionEntry {
                    element: item,
                    tag: pe.tag.clone(),
                    inherited: true,
                });
            }
        }
        self.inherited_limit = if self.schema.is_alternate() {
            0
        } else {
            self.entries.len()
        };
    }

    pub(crate) fn lock_entries(&mut self) {
        for e in &mut self.entries {
            e.element.inherited_locks.set_item(true);
        }
    }

    pub(crate) fn any_entry_modified(&self) -> bool {
        self.entries.iter().any(|e| e.element.is_modified())
    }

    pub(crate) fn reset_entries_modified(&mut self) {
        for e in &mut self.entries {
            e.element.reset_modified();
        }
    }

    /// Whether an unmerged collection carries any change.
    pub(crate) fn has_delta(&self) -> bool {
        self.emit_clear || !self.removed.is_empty() || !self.entries.is_empty()
    }

    pub(crate) fn same_entries(&self, other: &CollectionState) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(&other.entries)
                .all(|(a, b)| a.element.same_values(&b.element))
    }

    /// Add an entry, or merge it with the entry already holding its key.
    ///
    /// Returns `false` when an equal entry already exists.
    fn add(
        &mut self,
        element: Element,
        tag: String,
        owner: &str,
        site: Site<'_>,
    ) -> Result<bool, ConfigError> {
        let key = element.collection_key();
        if let Some(i) = self.position(&key) {
            if self.is_entry_locked(i) {
                return Err(Self::locked_error(&key, site));
            }
            if self.entries[i].element.same_values(&element) {
                trace!(key = %key, collection = owner, "entry already present");
                return Ok(false);
            }
            if self.schema.throw_on_duplicate() {
                return Err(ConfigError::DuplicateKey {
                    key,
                    collection: owner.to_string(),
                });
            }
            // An override of an inherited entry stays inherited: basic
            // collections have no marker that could persist its removal.
            let inherited = self.entries[i].inherited;
            self.entries[i] = CollectionEntry {
                element,
                tag,
                inherited,
            };
            return Ok(true);
        }
        let entry = CollectionEntry {
            element,
            tag,
            inherited: false,
        };
        if self.schema.is_alternate() {
            self.entries.insert(self.inherited_limit, entry);
            self.inherited_limit += 1;
        } else {
            self.entries.push(entry);
        }
        Ok(true)
    }

    fn take(&mut self, i: usize) -> Element {
        if i < self.inherited_limit {
            self.inherited_limit -= 1;
        }
        self.entries.remove(i).element
    }

    fn remove_at(&mut self, i: usize) -> Result<Element, ConfigError> {
        let entry = &self.entries[i];
        if entry.inherited {
            return Err(ConfigError::ImmutableEntryRemoval {
                key: entry.element.collection_key(),
            });
        }
        Ok(self.take(i))
    }

    /// The `remove` marker: drops the entry with `key`, inherited or not,
    /// unless a parent locked it. Returns whether anything was removed.
    fn suppress(&mut self, key: &str, site: Site<'_>) -> Result<bool, ConfigError> {
        let Some(i) = self.position(key) else {
            return Ok(false);
        };
        if self.is_entry_locked(i) {
            return Err(Self::locked_error(key, site));
        }
        self.take(i);
        Ok(true)
    }

    fn clear(&mut self, site: Site<'_>) -> Result<(), ConfigError> {
        if let Some(i) = (0..self.entries.len()).find(|&i| self.is_entry_locked(i)) {
            return Err(Self::locked_error(
                &self.entries[i].element.collection_key(),
                site,
            ));
        }
        if self.schema.is_add_remove_clear() {
            self.entries.clear();
            self.emit_clear = true;
        } else {
            self.entries.retain(|e| e.inherited);
        }
        self.inherited_limit = if self.schema.is_alternate() {
            0
        } else {
            self.entries.len()
        };
        Ok(())
    }

    /// A standalone copy of `source`, written as a new entry.
    fn full_copy(&self, source: &Element) -> Element {
        let mut item = self.schema.new_item();
        item.unmerge(source, None, SaveMode::Full);
        item.inherited_locks = LockSets::default();
        item
    }

    /// Whether a descendant may restate `source` from scratch: no entry is
    /// item locked and `locks` leave the markers needed for that open.
    fn can_restate(&self, source: &CollectionState, locks: &LockSets) -> bool {
        let markers_open = match self.schema.style() {
            CollectionStyle::AddRemoveClear { add, clear, .. } => {
                !locks.forbids_element(add) && !locks.forbids_element(clear)
            }
            CollectionStyle::Basic { element_names } => {
                element_names.iter().all(|n| !locks.forbids_element(n))
            }
        };
        markers_open
            && !source
                .entries
                .iter()
                .any(|e| e.element.inherited_locks.is_item_locked())
    }

    /// Rebuild this (fresh) state as the delta of `source` against `parent`.
    /// `locks` are the ones the owning element inherited.
    pub(crate) fn unmerge(
        &mut self,
        source: &CollectionState,
        parent: Option<&CollectionState>,
        mode: SaveMode,
        locks: &LockSets,
    ) {
        self.entries.clear();
        self.removed.clear();
        self.inherited_limit = 0;
        let mode = if mode == SaveMode::Full && parent.is_some() && !self.can_restate(source, locks)
        {
            debug!("locked collection saved as a minimal delta");
            SaveMode::Minimal
        } else {
            mode
        };
        let replace_all = source.emit_clear || (mode == SaveMode::Full && parent.is_some());
        self.emit_clear = replace_all && self.schema.is_add_remove_clear();
        let parent = if replace_all { None } else { parent };

        for se in &source.entries {
            let key = se.element.collection_key();
            let counterpart = parent.and_then(|p| {
                p.position(&key).map(|i| &p.entries[i].element)
            });
            if let Some(pe) = counterpart {
                let mut diff = self.schema.new_item();
                diff.unmerge(&se.element, Some(pe), mode);
                if !diff.has_values(Some(pe), mode) {
                    continue;
                }
                if self.schema.is_add_remove_clear() {
                    self.removed.push(self.full_copy(pe));
                }
            }
            let element = self.full_copy(&se.element);
            self.entries.push(CollectionEntry {
                element,
                tag: se.tag.clone(),
                inherited: false,
            });
        }

        if let Some(parent) = parent
            && self.schema.is_add_remove_clear()
        {
            for pe in &parent.entries {
                let key = pe.element.collection_key();
                if source.position(&key).is_none() {
                    debug!(key = %key, "parent entry removed");
                    self.removed.push(self.full_copy(&pe.element));
                }
            }
        }
    }
}

/// Read-only view of an element's collection.
#[derive(Clone, Copy)]
pub struct Collection<'a> {
    state: &'a CollectionState,
}

impl<'a> Collection<'a> {
    pub fn schema(&self) -> &'a CollectionSchema {
        &self.state.schema
    }

    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a Element> {
        self.state.entries.get(index).map(|e| &e.element)
    }

    pub fn get_by_key(&self, key: &str) -> Option<&'a Element> {
        self.state
            .position(key)
            .map(|i| &self.state.entries[i].element)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Element> + 'a {
        self.state.entries.iter().map(|e| &e.element)
    }

    pub fn keys(&self) -> Vec<String> {
        self.iter().map(Element::collection_key).collect()
    }

    /// Whether the entry at `index` was copied from the parent document
    /// (or overrides such an entry).
    pub fn is_inherited(&self, index: usize) -> bool {
        self.state.entries.get(index).is_some_and(|e| e.inherited)
    }

    /// Keys of parent entries this (unmerged) collection removes.
    pub fn removed_keys(&self) -> Vec<String> {
        self.state
            .removed
            .iter()
            .map(Element::collection_key)
            .collect()
    }

    pub fn emits_clear(&self) -> bool {
        self.state.emit_clear
    }
}

/// Mutable view of an element's collection.
pub struct CollectionMut<'a> {
    state: &'a mut CollectionState,
    locks: &'a LockSets,
    modified: &'a mut bool,
    owner: &'a str,
}

impl CollectionMut<'_> {
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// A fresh item of the collection's element kind.
    pub fn new_item(&self) -> Element {
        self.state.schema.new_item()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Element> {
        self.state.entries.get_mut(index).map(|e| &mut e.element)
    }

    pub fn get_by_key_mut(&mut self, key: &str) -> Option<&mut Element> {
        let i = self.state.position(key)?;
        Some(&mut self.state.entries[i].element)
    }

    fn check_marker(&self, marker: &str) -> Result<(), ConfigError> {
        if self.locks.forbids_element(marker) {
            return Err(CollectionState::locked_error(marker, API));
        }
        Ok(())
    }

    fn markers(&self) -> (String, String, String) {
        match self.state.schema.style() {
            CollectionStyle::AddRemoveClear { add, remove, clear } => {
                (add.clone(), remove.clone(), clear.clone())
            }
            CollectionStyle::Basic { .. } => {
                let name = self.state.schema.item_name().to_string();
                (name.clone(), name.clone(), name)
            }
        }
    }

    /// Add an entry. Add/remove/clear collections reject a key that is
    /// already present with different values; basic collections replace it.
    pub fn add(&mut self, element: Element) -> Result<(), ConfigError> {
        let (add, _, _) = self.markers();
        self.check_marker(&add)?;
        if self.state.add(element, add, self.owner, API)? {
            *self.modified = true;
        }
        Ok(())
    }

    /// Remove a locally added entry. Inherited entries are immutable.
    pub fn remove_at(&mut self, index: usize) -> Result<Element, ConfigError> {
        if index >= self.state.entries.len() {
            return Err(ConfigError::EntryNotFound {
                key: index.to_string(),
                collection: self.owner.to_string(),
            });
        }
        let (_, remove, _) = self.markers();
        self.check_marker(&remove)?;
        let removed = self.state.remove_at(index)?;
        *self.modified = true;
        Ok(removed)
    }

    /// Remove by key. On add/remove/clear collections this suppresses
    /// inherited entries too, the way a `remove` marker does.
    pub fn remove(&mut self, key: &str) -> Result<(), ConfigError> {
        if !self.state.schema.is_add_remove_clear() {
            let index = self
                .state
                .position(key)
                .ok_or_else(|| ConfigError::EntryNotFound {
                    key: key.to_string(),
                    collection: self.owner.to_string(),
                })?;
            return self.remove_at(index).map(|_| ());
        }
        let (_, remove, _) = self.markers();
        self.check_marker(&remove)?;
        if !self.state.suppress(key, API)? {
            return Err(ConfigError::EntryNotFound {
                key: key.to_string(),
                collection: self.owner.to_string(),
            });
        }
        *self.modified = true;
        Ok(())
    }

    /// Drop every entry. Basic collections keep their inherited entries.
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        let (_, _, clear) = self.markers();
        self.check_marker(&clear)?;
        self.state.clear(API)?;
        *self.modified = true;
        Ok(())
    }
}

impl Element {
    /// This element's collection, or that of its default collection.
    pub fn collection(&self) -> Option<Collection<'_>> {
        match &self.collection {
            Some(state) => Some(Collection { state }),
            None => self.default_collection()?.collection(),
        }
    }

    pub fn collection_mut(&mut self) -> Option<CollectionMut<'_>> {
        if self.collection.is_none() {
            return self.default_collection_mut()?.collection_mut();
        }
        let state = self.collection.as_mut()?;
        Some(CollectionMut {
            state,
            locks: &self.inherited_locks,
            modified: &mut self.modified,
            owner: self.schema.type_name(),
        })
    }

    pub(crate) fn lock_collection_entries(&mut self) {
        if let Some(state) = &mut self.collection {
            state.lock_entries();
        }
    }

    /// Handle `child` if it is one of this collection's markers.
    pub(crate) fn read_collection_child(
        &mut self,
        child: &MarkupNode,
        ctx: &ReadContext<'_>,
    ) -> Result<bool, ConfigError> {
        let owner = self.schema.type_name();
        let Some(state) = self.collection.as_mut() else {
            return Ok(false);
        };
        let site = Site {
            file: ctx.file,
            line: child.line,
        };
        match state.schema.style().clone() {
            CollectionStyle::AddRemoveClear { add, remove, clear } => {
                if child.name == add {
                    let mut item = state.schema.new_item();
                    item.deserialize(child, ctx)?;
                    state.add(item, add, owner, site)?;
                } else if child.name == remove {
                    let mut item = state.schema.new_item();
                    item.deserialize_key(child, ctx)?;
                    let key = item.collection_key();
                    if !state.suppress(&key, site)? {
                        trace!(key = %key, collection = owner, "remove marker matched nothing");
                    }
                } else if child.name == clear {
                    if let Some((name, _)) = child.attributes.first() {
                        return Err(ConfigError::UnknownProperty {
                            name: name.clone(),
                            element: clear,
                            file: ctx.file.to_string(),
                            line: child.line,
                        });
                    }
                    state.clear(site)?;
                } else {
                    return Ok(false);
                }
            }
            CollectionStyle::Basic { .. } => {
                if !state.schema.is_member(&child.name) {
                    return Ok(false);
                }
                let mut item = state.schema.new_item();
                item.deserialize(child, ctx)?;
                state.add(item, child.name.clone(), owner, site)?;
            }
        }
        Ok(true)
    }

    /// Append this element's collection markers and entries to `node`:
    /// `clear` first, then `remove` markers, then entries.
    pub(crate) fn serialize_items(&self, node: &mut MarkupNode, mode: SaveMode) {
        let Some(state) = &self.collection else {
            return;
        };
        if let CollectionStyle::AddRemoveClear { remove, clear, .. } = state.schema.style() {
            if state.emit_clear {
                node.push(MarkupNode::new(clear.as_str()));
            }
            for r in &state.removed {
                node.push(r.serialize_key(remove));
            }
        }
        for entry in &state.entries {
            let mut item = entry.element.serialize(&entry.tag, None, mode);
            let keys = entry.element.serialize_key(&entry.tag);
            for (k, v) in keys.attributes.into_iter().rev() {
                if item.attr(&k).is_none() {
                    item.attributes.insert(0, (k, v));
                }
            }
            node.push(item);
        }
    }
}
