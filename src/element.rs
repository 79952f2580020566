//! The generic property bag every configuration element is made of.
//!
//! An [`Element`] pairs a shared [`ElementSchema`] with one
//! [`PropertyInstance`] per descriptor. Element-typed properties own a nested
//! `Element`; collection elements additionally own a
//! [`CollectionState`](crate::collection::CollectionState).
//!
//! The lifecycle hooks that tie the engine together all live here:
//!
//! - [`reset`](Element::reset) starts an element as "everything equal to the
//!   ancestor" before the document's own content is read on top.
//! - [`deserialize`](Element::deserialize) applies one markup node.
//! - [`unmerge`](Element::unmerge) computes the delta against a parent for a
//!   given [`SaveMode`].
//! - [`has_values`](Element::has_values) and [`serialize`](Element::serialize)
//!   decide what the delta looks like on disk.

use std::collections::HashSet;
use std::sync::Arc;

use toml::Value;
use tracing::{trace, warn};

use crate::collection::CollectionState;
use crate::error::ConfigError;
use crate::lock::{self, LOCK_ITEM, LockKind, LockSets};
use crate::markup::MarkupNode;
use crate::property::{PropertyInstance, PropertyValue};
use crate::schema::ElementSchema;
use crate::types::{Provenance, SaveMode, SubstitutionPolicy, ValueOrigin};
use crate::value::{Converter, ValueType};

/// File name used in errors raised by programmatic access.
pub(crate) const API_SOURCE: &str = "<api>";

/// What `deserialize` needs to know about the document being read.
#[derive(Debug, Clone, Copy)]
pub struct ReadContext<'a> {
    pub file: &'a str,
    pub substitution: SubstitutionPolicy,
}

impl<'a> ReadContext<'a> {
    pub fn new(file: &'a str) -> Self {
        Self {
            file,
            substitution: SubstitutionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Element {
    pub(crate) schema: Arc<ElementSchema>,
    pub(crate) props: Vec<PropertyInstance>,
    pub(crate) present: bool,
    pub(crate) modified: bool,
    pub(crate) locks: LockSets,
    pub(crate) inherited_locks: LockSets,
    pub(crate) collection: Option<CollectionState>,
    pub(crate) provenance: Option<Provenance>,
}

impl Element {
    pub fn new(schema: Arc<ElementSchema>) -> Self {
        let props = schema
            .properties()
            .iter()
            .map(PropertyInstance::for_descriptor)
            .collect();
        let collection = schema.collection().cloned().map(CollectionState::new);
        Self {
            schema,
            props,
            present: false,
            modified: false,
            locks: LockSets::default(),
            inherited_locks: LockSets::default(),
            collection,
            provenance: None,
        }
    }

    pub fn schema(&self) -> &Arc<ElementSchema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    /// Whether the document literally contained this element.
    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    // --- access -------------------------------------------------------------

    fn index(&self, name: &str) -> Result<usize, ConfigError> {
        self.schema
            .index_of(name)
            .ok_or_else(|| ConfigError::UnknownProperty {
                name: name.to_string(),
                element: self.type_name().to_string(),
                file: API_SOURCE.to_string(),
                line: 0,
            })
    }

    fn scalar_index(&self, name: &str) -> Result<usize, ConfigError> {
        let i = self.index(name)?;
        if self.schema.properties()[i].is_element() {
            return Err(ConfigError::ValidationFailed {
                property: name.to_string(),
                element: self.type_name().to_string(),
                reason: "is an element; use element() or element_mut()".into(),
            });
        }
        Ok(i)
    }

    fn element_index(&self, name: &str) -> Result<usize, ConfigError> {
        let i = self.index(name)?;
        if !self.schema.properties()[i].is_element() {
            return Err(ConfigError::ValidationFailed {
                property: name.to_string(),
                element: self.type_name().to_string(),
                reason: "is not an element".into(),
            });
        }
        Ok(i)
    }

    pub fn property(&self, name: &str) -> Result<&PropertyInstance, ConfigError> {
        let i = self.index(name)?;
        Ok(&self.props[i])
    }

    pub fn origin(&self, name: &str) -> Result<ValueOrigin, ConfigError> {
        Ok(self.property(name)?.origin())
    }

    /// Effective value of a scalar property.
    pub fn get(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        let i = self.scalar_index(name)?;
        Ok(self.effective(i).cloned())
    }

    pub(crate) fn effective(&self, i: usize) -> Option<&Value> {
        self.props[i].effective(&self.schema.properties()[i])
    }

    fn effective_named(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).and_then(|i| self.effective(i))
    }

    /// Validate and store a value as set here.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let i = self.scalar_index(name)?;
        if self.inherited_locks.forbids_attribute(name) {
            return Err(ConfigError::LockedPropertyOverride {
                name: name.to_string(),
                file: API_SOURCE.to_string(),
                line: 0,
            });
        }
        let value = value.into();
        self.check(i, &value)?;
        self.props[i].set_scalar(value);
        Ok(())
    }

    fn check(&self, i: usize, value: &Value) -> Result<(), ConfigError> {
        let desc = &self.schema.properties()[i];
        desc.validate(value)
            .map_err(|reason| ConfigError::ValidationFailed {
                property: desc.name().to_string(),
                element: self.type_name().to_string(),
                reason,
            })
    }

    pub fn element(&self, name: &str) -> Result<&Element, ConfigError> {
        let i = self.element_index(name)?;
        self.props[i]
            .element()
            .ok_or_else(|| ConfigError::UnknownProperty {
                name: name.to_string(),
                element: self.type_name().to_string(),
                file: API_SOURCE.to_string(),
                line: 0,
            })
    }

    pub fn element_mut(&mut self, name: &str) -> Result<&mut Element, ConfigError> {
        let i = self.element_index(name)?;
        let type_name = self.type_name().to_string();
        self.props[i]
            .element_mut()
            .ok_or_else(|| ConfigError::UnknownProperty {
                name: name.to_string(),
                element: type_name,
                file: API_SOURCE.to_string(),
                line: 0,
            })
    }

    pub(crate) fn nested(&self, i: usize) -> Option<&Element> {
        self.props.get(i).and_then(PropertyInstance::element)
    }

    /// The element holding this element's implicit repeated children.
    pub fn default_collection(&self) -> Option<&Element> {
        self.schema
            .default_collection_index()
            .and_then(|i| self.nested(i))
    }

    pub fn default_collection_mut(&mut self) -> Option<&mut Element> {
        let i = self.schema.default_collection_index()?;
        self.props[i].element_mut()
    }

    // --- locks --------------------------------------------------------------

    /// Locks this element declares for its descendants.
    pub fn locks(&self) -> &LockSets {
        &self.locks
    }

    /// Locks imposed on this element by its ancestors.
    pub fn inherited_locks(&self) -> &LockSets {
        &self.inherited_locks
    }

    /// Add `name` to one of this element's lock lists.
    pub fn lock(&mut self, kind: LockKind, name: &str) -> Result<(), ConfigError> {
        self.check_lock_name(kind, name)?;
        self.locks.insert(kind, name);
        self.modified = true;
        Ok(())
    }

    pub fn set_lock_item(&mut self, locked: bool) {
        self.locks.set_item(locked);
        self.modified = true;
    }

    fn check_lock_name(&self, kind: LockKind, name: &str) -> Result<(), ConfigError> {
        if name == "*" {
            return Ok(());
        }
        let valid = if kind.targets_elements() {
            let is_element_prop = self
                .schema
                .property(name)
                .is_some_and(|p| p.is_element() && !p.flags().is_default_collection);
            let is_marker = self
                .collection_markers()
                .iter()
                .any(|m| m.as_str() == name);
            is_element_prop || is_marker
        } else {
            self.schema.property(name).is_some_and(|p| !p.is_element())
        };
        if valid {
            Ok(())
        } else {
            Err(ConfigError::InvalidLockName {
                name: name.to_string(),
                element: self.type_name().to_string(),
            })
        }
    }

    fn collection_markers(&self) -> Vec<String> {
        let own = self.schema.collection();
        let implicit = self
            .default_collection()
            .and_then(|dc| dc.schema.collection());
        own.into_iter()
            .chain(implicit)
            .flat_map(|c| c.marker_names())
            .map(str::to_string)
            .collect()
    }

    fn read_lock_attribute(
        &mut self,
        kind: LockKind,
        value: &str,
        ctx: &ReadContext<'_>,
        line: usize,
    ) -> Result<(), ConfigError> {
        self.locks.declare(kind);
        for name in lock::split_names(value) {
            self.check_lock_name(kind, name).map_err(|e| match e {
                ConfigError::InvalidLockName { name, element } => ConfigError::InvalidLockName {
                    name,
                    element: format!("{element} ({}, line {line})", ctx.file),
                },
                other => other,
            })?;
            self.locks.insert(kind, name);
        }
        Ok(())
    }

    // --- modification tracking ---------------------------------------------

    pub fn is_modified(&self) -> bool {
        self.modified
            || self.props.iter().any(|p| match &p.value {
                PropertyValue::Scalar(_) => p.modified,
                PropertyValue::Element(el) => el.is_modified(),
            })
            || self
                .collection
                .as_ref()
                .is_some_and(CollectionState::any_entry_modified)
    }

    pub fn reset_modified(&mut self) {
        self.modified = false;
        for p in &mut self.props {
            p.modified = false;
            if let PropertyValue::Element(el) = &mut p.value {
                el.reset_modified();
            }
        }
        if let Some(c) = &mut self.collection {
            c.reset_entries_modified();
        }
    }

    // --- reset --------------------------------------------------------------

    /// Start over from the parent's effective state (or from defaults).
    ///
    /// Scalars copy the parent's value with origin `Inherited` unless the
    /// parent itself only has a default, in which case they stay `Default`.
    /// Nested elements are rebuilt and reset against the parent's nested
    /// element so they track their own origins.
    pub fn reset(&mut self, parent: Option<&Element>) {
        self.present = false;
        self.modified = false;
        self.locks = LockSets::default();
        self.inherited_locks = match parent {
            Some(p) => {
                let mut l = p.inherited_locks.clone();
                l.merge(&p.locks);
                l
            }
            None => LockSets::default(),
        };

        let schema = Arc::clone(&self.schema);
        for (i, desc) in schema.properties().iter().enumerate() {
            let parent_inst = parent.and_then(|p| {
                p.schema
                    .index_of(desc.name())
                    .map(|j| &p.props[j])
            });
            let inst = &mut self.props[i];
            inst.modified = false;
            match desc.new_element() {
                Some(mut nested) => {
                    nested.reset(parent_inst.and_then(PropertyInstance::element));
                    if desc.flags().is_default_collection {
                        nested.inherited_locks.merge(&self.inherited_locks);
                    } else if self.inherited_locks.forbids_element(desc.name()) {
                        nested.inherited_locks.set_item(true);
                    }
                    if nested.inherited_locks.is_item_locked() {
                        nested.lock_collection_entries();
                    }
                    inst.value = PropertyValue::Element(Box::new(nested));
                    inst.origin = match parent_inst {
                        Some(_) => ValueOrigin::Inherited,
                        None => ValueOrigin::Default,
                    };
                    inst.provenance = None;
                }
                None => match parent_inst {
                    Some(pi) if pi.origin != ValueOrigin::Default => {
                        inst.value = pi.value.clone();
                        inst.origin = ValueOrigin::Inherited;
                        inst.provenance = pi.provenance.clone();
                    }
                    _ => {
                        inst.value = PropertyValue::Scalar(None);
                        inst.origin = ValueOrigin::Default;
                        inst.provenance = None;
                    }
                },
            }
        }

        let item_locked = self.inherited_locks.is_item_locked();
        if let Some(state) = &mut self.collection {
            state.reset(parent.and_then(|p| p.collection.as_ref()), item_locked);
        }
    }

    /// Lock the whole subtree against further overrides.
    pub(crate) fn seal(&mut self) {
        self.inherited_locks.set_item(true);
        for p in &mut self.props {
            if let PropertyValue::Element(el) = &mut p.value {
                el.seal();
            }
        }
        self.lock_collection_entries();
    }

    // --- deserialize --------------------------------------------------------

    /// Apply one markup node on top of the current (reset) state.
    pub fn deserialize(
        &mut self,
        node: &MarkupNode,
        ctx: &ReadContext<'_>,
    ) -> Result<(), ConfigError> {
        let file = ctx.file;
        if self.inherited_locks.is_item_locked() && !node.is_empty() {
            return Err(ConfigError::LockedPropertyOverride {
                name: node.name.clone(),
                file: file.to_string(),
                line: node.line,
            });
        }
        self.present = true;
        self.provenance = Some(Provenance::new(file, node.line));

        let mut seen: HashSet<&str> = HashSet::new();
        for (name, text) in &node.attributes {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateProperty {
                    name: name.clone(),
                    file: file.to_string(),
                    line: node.line,
                });
            }
            if let Some(kind) = LockKind::from_attribute(name) {
                self.read_lock_attribute(kind, text, ctx, node.line)?;
                continue;
            }
            if name == LOCK_ITEM {
                let locked = ValueType::Boolean.from_text(text).map_err(|reason| {
                    ConfigError::ValidationFailed {
                        property: LOCK_ITEM.into(),
                        element: self.type_name().to_string(),
                        reason,
                    }
                })?;
                self.locks.set_item(locked.as_bool().unwrap_or(false));
                continue;
            }
            if name.starts_with("xmlns") {
                continue;
            }
            self.read_attribute(name, text, ctx, node.line)?;
        }

        for child in &node.children {
            self.read_child(child, ctx, &mut seen)?;
        }

        self.check_required(ctx, node.line)
    }

    fn read_attribute(
        &mut self,
        name: &str,
        text: &str,
        ctx: &ReadContext<'_>,
        line: usize,
    ) -> Result<(), ConfigError> {
        let Some(i) = self
            .schema
            .index_of(name)
            .filter(|&i| !self.schema.properties()[i].is_element())
        else {
            if self.schema.allows_unknown_attributes() {
                trace!(attribute = name, element = self.type_name(), "ignoring unknown attribute");
                return Ok(());
            }
            return Err(ConfigError::UnknownProperty {
                name: name.to_string(),
                element: self.type_name().to_string(),
                file: ctx.file.to_string(),
                line,
            });
        };
        if self.inherited_locks.forbids_attribute(name) {
            return Err(ConfigError::LockedPropertyOverride {
                name: name.to_string(),
                file: ctx.file.to_string(),
                line,
            });
        }
        let desc = &self.schema.properties()[i];
        let value = desc
            .convert_from_text(text)
            .map_err(|reason| ConfigError::ValidationFailed {
                property: name.to_string(),
                element: self.type_name().to_string(),
                reason,
            })?;
        self.check(i, &value)?;
        let inst = &mut self.props[i];
        inst.set_scalar(value);
        inst.provenance = Some(Provenance::new(ctx.file, line));
        Ok(())
    }

    fn read_child<'n>(
        &mut self,
        child: &'n MarkupNode,
        ctx: &ReadContext<'_>,
        seen: &mut HashSet<&'n str>,
    ) -> Result<(), ConfigError> {
        let file = ctx.file;
        if self.inherited_locks.forbids_element(&child.name) {
            return Err(ConfigError::LockedPropertyOverride {
                name: child.name.clone(),
                file: file.to_string(),
                line: child.line,
            });
        }

        let element_prop = self.schema.index_of(&child.name).filter(|&i| {
            let p = &self.schema.properties()[i];
            p.is_element() && !p.flags().is_default_collection
        });
        if let Some(i) = element_prop {
            if !seen.insert(child.name.as_str()) {
                return Err(ConfigError::DuplicateProperty {
                    name: child.name.clone(),
                    file: file.to_string(),
                    line: child.line,
                });
            }
            let inst = &mut self.props[i];
            if let Some(nested) = inst.element_mut() {
                nested.deserialize(child, ctx)?;
            }
            inst.origin = ValueOrigin::SetHere;
            inst.provenance = Some(Provenance::new(file, child.line));
            return Ok(());
        }

        if self.collection.is_some() && self.read_collection_child(child, ctx)? {
            return Ok(());
        }
        if let Some(dc) = self.default_collection_mut()
            && dc.read_collection_child(child, ctx)?
        {
            return Ok(());
        }
        if self.schema.allows_unknown_elements() {
            trace!(child = %child.name, element = self.type_name(), "ignoring unknown element");
            return Ok(());
        }
        Err(ConfigError::UnknownProperty {
            name: child.name.clone(),
            element: self.type_name().to_string(),
            file: file.to_string(),
            line: child.line,
        })
    }

    fn check_required(&mut self, ctx: &ReadContext<'_>, line: usize) -> Result<(), ConfigError> {
        let schema = Arc::clone(&self.schema);
        for (i, desc) in schema.properties().iter().enumerate() {
            if !desc.flags().is_required
                || desc.is_element()
                || self.props[i].origin != ValueOrigin::Default
            {
                continue;
            }
            let substitute = match (schema.required_hook(), ctx.substitution) {
                (Some(hook), SubstitutionPolicy::Present) => hook(desc.name()),
                _ => None,
            };
            let Some(value) = substitute else {
                return Err(ConfigError::MissingRequiredProperty {
                    name: desc.name().to_string(),
                    element: self.type_name().to_string(),
                    file: ctx.file.to_string(),
                    line,
                });
            };
            self.check(i, &value)?;
            warn!(
                property = desc.name(),
                element = self.type_name(),
                file = ctx.file,
                "required property missing; using substituted value"
            );
            let inst = &mut self.props[i];
            inst.value = PropertyValue::Scalar(Some(value));
            inst.origin = ValueOrigin::SetHere;
            inst.modified = false;
        }
        Ok(())
    }

    // --- diffing ------------------------------------------------------------

    /// Whether scalar `i` carries something worth persisting relative to
    /// `parent` under `mode`.
    pub(crate) fn has_value(&self, i: usize, parent: Option<&Element>, mode: SaveMode) -> bool {
        let inst = &self.props[i];
        if inst.origin == ValueOrigin::Default {
            return false;
        }
        if mode == SaveMode::Modified && inst.origin == ValueOrigin::SetHere && inst.modified {
            return true;
        }
        let desc = &self.schema.properties()[i];
        let parent_value = parent
            .and_then(|p| p.effective_named(desc.name()))
            .or(desc.default_value());
        self.effective(i) != parent_value
    }

    /// Whether this element contributes anything relative to `parent`.
    pub fn has_values(&self, parent: Option<&Element>, mode: SaveMode) -> bool {
        // Nothing below an item lock can be restated by a descendant.
        if self.inherited_locks.is_item_locked() {
            return false;
        }
        if mode == SaveMode::Full {
            return true;
        }
        if mode == SaveMode::Modified && self.modified {
            return true;
        }
        if !self.locks.is_empty() {
            return true;
        }
        for (i, desc) in self.schema.properties().iter().enumerate() {
            let has = match self.nested(i) {
                Some(nested) => {
                    let parent_nested = parent.and_then(|p| p.nested_named(desc.name()));
                    nested.has_values(parent_nested, mode)
                }
                None => self.has_value(i, parent, mode),
            };
            if has {
                return true;
            }
        }
        self.collection
            .as_ref()
            .is_some_and(CollectionState::has_delta)
    }

    fn nested_named(&self, name: &str) -> Option<&Element> {
        self.schema.index_of(name).and_then(|j| self.nested(j))
    }

    /// Fill this (fresh) element with the part of `source` that should be
    /// persisted relative to `parent` under `mode`.
    pub fn unmerge(&mut self, source: &Element, parent: Option<&Element>, mode: SaveMode) {
        self.present = source.present;
        self.modified = source.modified;
        self.locks = source.locks.clone();
        self.inherited_locks = source.inherited_locks.clone();
        self.provenance = source.provenance.clone();

        let schema = Arc::clone(&self.schema);
        for (i, desc) in schema.properties().iter().enumerate() {
            let Some(j) = source.schema.index_of(desc.name()) else {
                continue;
            };
            let src = &source.props[j];
            if let Some(src_nested) = src.element() {
                let parent_nested = parent.and_then(|p| p.nested_named(desc.name()));
                if let Some(nested) = self.props[i].element_mut() {
                    nested.unmerge(src_nested, parent_nested, mode);
                }
                self.props[i].origin = src.origin;
                continue;
            }
            if src.origin == ValueOrigin::Default
                || source.inherited_locks.forbids_attribute(desc.name())
            {
                continue;
            }
            let parent_inst = parent.and_then(|p| {
                p.schema
                    .index_of(desc.name())
                    .map(|k| (&p.props[k], p.effective(k)))
            });
            let copy = match parent_inst {
                None => true,
                Some((pi, _)) if pi.origin == ValueOrigin::Default => true,
                Some((_, parent_value)) => {
                    mode == SaveMode::Full
                        || (mode == SaveMode::Modified && src.origin == ValueOrigin::SetHere)
                        || source.effective(j) != parent_value
                }
            };
            if copy {
                let inst = &mut self.props[i];
                inst.value = src.value.clone();
                inst.origin = ValueOrigin::SetHere;
                inst.modified = true;
                inst.provenance = src.provenance.clone();
            }
        }

        if let (Some(state), Some(src_state)) = (&mut self.collection, &source.collection) {
            state.unmerge(
                src_state,
                parent.and_then(|p| p.collection.as_ref()),
                mode,
                &source.inherited_locks,
            );
        }
    }

    /// Emit this element as a markup node named `name`. Attributes and
    /// children are chosen by `mode` relative to `parent`, not by the order
    /// they were read in.
    pub fn serialize(&self, name: &str, parent: Option<&Element>, mode: SaveMode) -> MarkupNode {
        let mut node = MarkupNode::new(name);
        for (i, desc) in self.schema.properties().iter().enumerate() {
            if desc.is_element() || self.inherited_locks.forbids_attribute(desc.name()) {
                continue;
            }
            let emit = match mode {
                SaveMode::Full => self.effective(i).is_some(),
                _ => self.has_value(i, parent, mode),
            };
            if emit && let Some(value) = self.effective(i) {
                node.attributes
                    .push((desc.name().to_string(), desc.convert_to_text(value)));
            }
        }
        node.attributes.extend(self.locks.to_attributes());

        for (i, desc) in self.schema.properties().iter().enumerate() {
            let Some(nested) = self.nested(i) else {
                continue;
            };
            let parent_nested = parent.and_then(|p| p.nested_named(desc.name()));
            if desc.flags().is_default_collection {
                nested.serialize_items(&mut node, mode);
            } else if nested.has_values(parent_nested, mode) {
                node.push(nested.serialize(desc.name(), parent_nested, mode));
            }
        }

        self.serialize_items(&mut node, mode);
        node
    }

    /// Key-only node used for `remove` markers.
    pub(crate) fn serialize_key(&self, name: &str) -> MarkupNode {
        let mut node = MarkupNode::new(name);
        for i in self.schema.key_indices() {
            if let Some(value) = self.effective(i) {
                let desc = &self.schema.properties()[i];
                node.attributes
                    .push((desc.name().to_string(), desc.convert_to_text(value)));
            }
        }
        node
    }

    /// Identity of this element inside a collection: the text of its key
    /// properties, or of every scalar when the schema declares no key.
    pub fn collection_key(&self) -> String {
        let keys: Vec<usize> = self.schema.key_indices().collect();
        let indices: Vec<usize> = if keys.is_empty() {
            (0..self.props.len())
                .filter(|&i| !self.schema.properties()[i].is_element())
                .collect()
        } else {
            keys
        };
        indices
            .into_iter()
            .map(|i| {
                let desc = &self.schema.properties()[i];
                self.effective(i)
                    .map(|v| desc.convert_to_text(v))
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Structural equality of effective values.
    pub fn same_values(&self, other: &Element) -> bool {
        if self.type_name() != other.type_name() {
            return false;
        }
        for (i, desc) in self.schema.properties().iter().enumerate() {
            let equal = match self.nested(i) {
                Some(nested) => other
                    .nested_named(desc.name())
                    .is_some_and(|o| nested.same_values(o)),
                None => self.effective(i) == other.effective_named(desc.name()),
            };
            if !equal {
                return false;
            }
        }
        match (&self.collection, &other.collection) {
            (Some(a), Some(b)) => a.same_entries(b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Deserialize a `remove` marker: only key attributes are allowed.
    pub(crate) fn deserialize_key(
        &mut self,
        node: &MarkupNode,
        ctx: &ReadContext<'_>,
    ) -> Result<(), ConfigError> {
        for (name, text) in &node.attributes {
            let is_key = self
                .schema
                .property(name)
                .is_some_and(|p| p.flags().is_key);
            if !is_key {
                return Err(ConfigError::UnknownProperty {
                    name: name.clone(),
                    element: node.name.clone(),
                    file: ctx.file.to_string(),
                    line: node.line,
                });
            }
            self.read_attribute(name, text, ctx, node.line)?;
        }
        if let Some(child) = node.children.first() {
            return Err(ConfigError::UnknownProperty {
                name: child.name.clone(),
                element: node.name.clone(),
                file: ctx.file.to_string(),
                line: child.line,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::{parse_fragment, server_element};

    fn ctx() -> ReadContext<'static> {
        ReadContext::new("test.config")
    }

    #[test]
    fn new_element_starts_with_defaults() {
        let el = server_element();
        assert_eq!(el.get("timeout").unwrap(), Some(Value::Integer(30)));
        assert_eq!(el.origin("timeout").unwrap(), ValueOrigin::Default);
        assert!(!el.is_present());
    }

    #[test]
    fn set_validates_and_marks_origin() {
        let mut el = server_element();
        el.set("timeout", 60).unwrap();
        assert_eq!(el.get("timeout").unwrap(), Some(Value::Integer(60)));
        assert_eq!(el.origin("timeout").unwrap(), ValueOrigin::SetHere);
        assert!(el.is_modified());
    }

    #[test]
    fn set_out_of_range_is_validation_failure() {
        let mut el = server_element();
        let err = el.set("timeout", 100_000).unwrap_err();
        match err {
            ConfigError::ValidationFailed {
                property, element, ..
            } => {
                assert_eq!(property, "timeout");
                assert_eq!(element, "ServerSection");
            }
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn unknown_name_is_unknown_property() {
        let mut el = server_element();
        assert!(matches!(
            el.set("nope", 1),
            Err(ConfigError::UnknownProperty { .. })
        ));
        assert!(matches!(el.get("nope"), Err(ConfigError::UnknownProperty { .. })));
    }

    #[test]
    fn deserialize_sets_attributes_and_nested() {
        let node = parse_fragment(
            r#"<server host="example.org" timeout="45"><limits maxConnections="7"/></server>"#,
        );
        let mut el = server_element();
        el.deserialize(&node, &ctx()).unwrap();
        assert!(el.is_present());
        assert_eq!(el.get("host").unwrap().unwrap().as_str(), Some("example.org"));
        assert_eq!(el.origin("host").unwrap(), ValueOrigin::SetHere);
        let limits = el.element("limits").unwrap();
        assert_eq!(
            limits.get("maxConnections").unwrap(),
            Some(Value::Integer(7))
        );
        let prov = el.property("timeout").unwrap().provenance().unwrap();
        assert_eq!(prov.file, "test.config");
    }

    #[test]
    fn deserialize_rejects_unknown_attribute() {
        let node = parse_fragment(r#"<server tiemout="45"/>"#);
        let err = server_element().deserialize(&node, &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProperty { .. }));
    }

    #[test]
    fn deserialize_rejects_duplicate_attribute() {
        let node = parse_fragment(r#"<server timeout="1" timeout="2"/>"#);
        let err = server_element().deserialize(&node, &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProperty { .. }));
    }

    #[test]
    fn deserialize_rejects_repeated_nested_element() {
        let node = parse_fragment(r#"<server><limits/><limits/></server>"#);
        let err = server_element().deserialize(&node, &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProperty { .. }));
    }

    #[test]
    fn deserialize_wraps_conversion_failure() {
        let node = parse_fragment(r#"<server timeout="soon"/>"#);
        let err = server_element().deserialize(&node, &ctx()).unwrap_err();
        match err {
            ConfigError::ValidationFailed { property, .. } => assert_eq!(property, "timeout"),
            other => panic!("Expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn reset_copies_parent_values_as_inherited() {
        let mut parent = server_element();
        parent.set("host", "parent.example").unwrap();
        parent.element_mut("limits").unwrap().set("maxConnections", 3).unwrap();

        let mut child = server_element();
        child.reset(Some(&parent));
        assert_eq!(child.origin("host").unwrap(), ValueOrigin::Inherited);
        assert_eq!(
            child.get("host").unwrap().unwrap().as_str(),
            Some("parent.example")
        );
        // Defaults in the parent stay defaults in the child.
        assert_eq!(child.origin("timeout").unwrap(), ValueOrigin::Default);
        let limits = child.element("limits").unwrap();
        assert_eq!(
            limits.origin("maxConnections").unwrap(),
            ValueOrigin::Inherited
        );
        assert!(!child.is_modified());
    }

    #[test]
    fn reset_without_parent_restores_defaults() {
        let mut el = server_element();
        el.set("timeout", 5).unwrap();
        el.reset(None);
        assert_eq!(el.origin("timeout").unwrap(), ValueOrigin::Default);
        assert_eq!(el.get("timeout").unwrap(), Some(Value::Integer(30)));
    }

    #[test]
    fn untouched_child_unmerges_to_nothing() {
        let mut parent = server_element();
        parent
            .deserialize(
                &parse_fragment(r#"<server host="a" timeout="10"><limits maxConnections="4"/></server>"#),
                &ctx(),
            )
            .unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));

        let mut delta = server_element();
        delta.unmerge(&child, Some(&parent), SaveMode::Modified);
        assert!(!delta.has_values(Some(&parent), SaveMode::Modified));
        let mut minimal = server_element();
        minimal.unmerge(&child, Some(&parent), SaveMode::Minimal);
        assert!(!minimal.has_values(Some(&parent), SaveMode::Minimal));
    }

    #[test]
    fn same_value_set_again_diverges_between_modes() {
        let mut parent = server_element();
        parent.set("timeout", 10).unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        child.set("timeout", 10).unwrap();

        let mut minimal = server_element();
        minimal.unmerge(&child, Some(&parent), SaveMode::Minimal);
        let node = minimal.serialize("server", Some(&parent), SaveMode::Minimal);
        assert_eq!(node.attr("timeout"), None);

        let mut modified = server_element();
        modified.unmerge(&child, Some(&parent), SaveMode::Modified);
        let node = modified.serialize("server", Some(&parent), SaveMode::Modified);
        assert_eq!(node.attr("timeout"), Some("10"));
    }

    #[test]
    fn changed_value_is_in_every_mode() {
        let mut parent = server_element();
        parent.set("timeout", 10).unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        child.set("timeout", 20).unwrap();
        for mode in [SaveMode::Minimal, SaveMode::Modified, SaveMode::Full] {
            let mut delta = server_element();
            delta.unmerge(&child, Some(&parent), mode);
            let node = delta.serialize("server", Some(&parent), mode);
            assert_eq!(node.attr("timeout"), Some("20"), "mode {mode:?}");
        }
    }

    #[test]
    fn full_mode_emits_defaults_and_nested() {
        let el = server_element();
        let node = el.serialize("server", None, SaveMode::Full);
        assert_eq!(node.attr("timeout"), Some("30"));
        assert!(node.child("limits").is_some());
    }

    #[test]
    fn nested_change_emits_only_nested() {
        let mut parent = server_element();
        parent.set("host", "a").unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        child.element_mut("limits").unwrap().set("maxConnections", 9).unwrap();

        let mut delta = server_element();
        delta.unmerge(&child, Some(&parent), SaveMode::Minimal);
        let node = delta.serialize("server", Some(&parent), SaveMode::Minimal);
        assert!(node.attributes.is_empty());
        assert_eq!(
            node.child("limits").unwrap().attr("maxConnections"),
            Some("9")
        );
    }

    #[test]
    fn parent_lock_blocks_descendant_attribute_only() {
        let mut parent = server_element();
        parent
            .deserialize(&parse_fragment(r#"<server lockAttributes="timeout"/>"#), &ctx())
            .unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        let err = child
            .deserialize(&parse_fragment(r#"<server timeout="5"/>"#), &ctx())
            .unwrap_err();
        assert!(matches!(err, ConfigError::LockedPropertyOverride { .. }));

        let mut child = server_element();
        child.reset(Some(&parent));
        child
            .deserialize(&parse_fragment(r#"<server host="ok"/>"#), &ctx())
            .unwrap();
        assert!(matches!(
            child.set("timeout", 5),
            Err(ConfigError::LockedPropertyOverride { .. })
        ));
        child.set("host", "fine").unwrap();
    }

    #[test]
    fn own_lock_does_not_restrict_declaring_document() {
        let mut el = server_element();
        el.deserialize(
            &parse_fragment(r#"<server lockAttributes="timeout" timeout="5"/>"#),
            &ctx(),
        )
        .unwrap();
        assert_eq!(el.get("timeout").unwrap(), Some(Value::Integer(5)));
    }

    #[test]
    fn lock_all_attributes_except_allows_listed() {
        let mut parent = server_element();
        parent
            .deserialize(
                &parse_fragment(r#"<server lockAllAttributesExcept="host"/>"#),
                &ctx(),
            )
            .unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        child.set("host", "x").unwrap();
        assert!(child.set("timeout", 1).is_err());
    }

    #[test]
    fn lock_elements_blocks_nested_element() {
        let mut parent = server_element();
        parent
            .deserialize(&parse_fragment(r#"<server lockElements="limits"/>"#), &ctx())
            .unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        let err = child
            .deserialize(
                &parse_fragment(r#"<server><limits maxConnections="1"/></server>"#),
                &ctx(),
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::LockedPropertyOverride { .. }));
        let limits = child.element_mut("limits").unwrap();
        assert!(limits.set("maxConnections", 2).is_err());
    }

    #[test]
    fn invalid_lock_names_are_rejected() {
        let mut el = server_element();
        assert!(matches!(
            el.lock(LockKind::Attributes, "bogus"),
            Err(ConfigError::InvalidLockName { .. })
        ));
        // An element is not an attribute.
        assert!(el.lock(LockKind::Attributes, "limits").is_err());
        assert!(el.lock(LockKind::Elements, "limits").is_ok());
        assert!(el.lock(LockKind::Attributes, "timeout").is_ok());

        let err = server_element()
            .deserialize(&parse_fragment(r#"<server lockElements="timeout"/>"#), &ctx())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLockName { .. }));
    }

    #[test]
    fn locks_are_serialized() {
        let mut el = server_element();
        el.lock(LockKind::Attributes, "timeout").unwrap();
        let node = el.serialize("server", None, SaveMode::Minimal);
        assert_eq!(node.attr("lockAttributes"), Some("timeout"));
    }

    #[test]
    fn missing_required_property_fails() {
        let node = parse_fragment(r#"<endpoint/>"#);
        let mut el = crate::fixtures::test::endpoint_element();
        let err = el.deserialize(&node, &ctx()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequiredProperty { .. }));
    }

    #[test]
    fn required_hook_substitutes_unmodified_value() {
        let node = parse_fragment(r#"<endpoint/>"#);
        let mut el = crate::fixtures::test::endpoint_with_hook_element();
        el.deserialize(&node, &ctx()).unwrap();
        assert_eq!(
            el.get("address").unwrap().unwrap().as_str(),
            Some("http://localhost")
        );
        assert_eq!(el.origin("address").unwrap(), ValueOrigin::SetHere);
        assert!(!el.property("address").unwrap().is_modified());
    }

    #[test]
    fn required_hook_refused_under_error_policy() {
        let node = parse_fragment(r#"<endpoint/>"#);
        let mut el = crate::fixtures::test::endpoint_with_hook_element();
        let ctx = ReadContext {
            file: "t",
            substitution: SubstitutionPolicy::Error,
        };
        assert!(matches!(
            el.deserialize(&node, &ctx),
            Err(ConfigError::MissingRequiredProperty { .. })
        ));
    }

    #[test]
    fn permissive_schema_ignores_unknowns() {
        let node = parse_fragment(r#"<loose extra="1"><whatever/></loose>"#);
        let mut el = crate::fixtures::test::loose_element();
        el.deserialize(&node, &ctx()).unwrap();
        assert!(el.is_present());
    }

    #[test]
    fn full_mode_leaves_out_what_ancestors_lock() {
        let mut parent = server_element();
        parent
            .deserialize(&parse_fragment(r#"<server timeout="10" lockAttributes="timeout"/>"#), &ctx())
            .unwrap();
        let mut child = server_element();
        child.reset(Some(&parent));
        child.set("host", "h").unwrap();

        let mut delta = server_element();
        delta.unmerge(&child, Some(&parent), SaveMode::Full);
        let node = delta.serialize("server", Some(&parent), SaveMode::Full);
        assert_eq!(node.attr("host"), Some("h"));
        assert_eq!(node.attr("timeout"), None);
        assert_eq!(node.attr("lockAttributes"), None);

        let mut reloaded = server_element();
        reloaded.reset(Some(&parent));
        reloaded.deserialize(&node, &ctx()).unwrap();
        assert!(reloaded.same_values(&child));
    }

    #[test]
    fn sealed_element_has_nothing_to_restate() {
        let mut parent = server_element();
        parent
            .deserialize(&parse_fragment(r#"<server timeout="5"/>"#), &ctx())
            .unwrap();
        parent.seal();
        let mut child = server_element();
        child.reset(Some(&parent));

        let mut delta = server_element();
        delta.unmerge(&child, Some(&parent), SaveMode::Full);
        assert!(!delta.has_values(Some(&parent), SaveMode::Full));
    }

    #[test]
    fn same_values_compares_effective_state() {
        let mut a = server_element();
        let mut b = server_element();
        assert!(a.same_values(&b));
        a.set("timeout", 31).unwrap();
        assert!(!a.same_values(&b));
        b.set("timeout", 31).unwrap();
        assert!(a.same_values(&b));
    }
}
