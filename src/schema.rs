//! Element schemas: the per-kind property table plus collection shape.
//!
//! A schema is built once per element kind and shared through an `Arc` by
//! every instance of that kind. Section kinds are registered by type name in
//! a [`SchemaRegistry`] so `<section type="...">` declarations can be turned
//! into elements without any dynamic type activation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use toml::Value;

use crate::element::Element;
use crate::property::{ElementCtor, PropertyDescriptor};

/// Supplies a value for a required property the document left out.
pub type RequiredHook = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

pub struct ElementSchema {
    type_name: String,
    properties: Vec<PropertyDescriptor>,
    index: HashMap<String, usize>,
    collection: Option<CollectionSchema>,
    allow_unknown_attributes: bool,
    allow_unknown_elements: bool,
    on_required_missing: Option<RequiredHook>,
}

impl fmt::Debug for ElementSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementSchema")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl ElementSchema {
    pub fn builder(type_name: impl Into<String>) -> ElementSchemaBuilder {
        ElementSchemaBuilder {
            schema: ElementSchema {
                type_name: type_name.into(),
                properties: Vec::new(),
                index: HashMap::new(),
                collection: None,
                allow_unknown_attributes: false,
                allow_unknown_elements: false,
                on_required_missing: None,
            },
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.index_of(name).map(|i| &self.properties[i])
    }

    pub fn collection(&self) -> Option<&CollectionSchema> {
        self.collection.as_ref()
    }

    pub fn default_collection_index(&self) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| p.flags().is_default_collection)
    }

    pub fn allows_unknown_attributes(&self) -> bool {
        self.allow_unknown_attributes
    }

    pub fn allows_unknown_elements(&self) -> bool {
        self.allow_unknown_elements
    }

    pub(crate) fn required_hook(&self) -> Option<&RequiredHook> {
        self.on_required_missing.as_ref()
    }

    /// Indices of the properties that make up a collection item's key.
    pub fn key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.properties
            .iter()
            .enumerate()
            .filter(|(_, p)| p.flags().is_key)
            .map(|(i, _)| i)
    }
}

pub struct ElementSchemaBuilder {
    schema: ElementSchema,
}

impl ElementSchemaBuilder {
    pub fn property(mut self, descriptor: PropertyDescriptor) -> Self {
        let name = descriptor.name().to_string();
        match self.schema.index.get(&name) {
            Some(&i) => self.schema.properties[i] = descriptor,
            None => {
                self.schema.index.insert(name, self.schema.properties.len());
                self.schema.properties.push(descriptor);
            }
        }
        self
    }

    /// Make this element a collection of repeated children.
    pub fn collection(mut self, collection: CollectionSchema) -> Self {
        self.schema.collection = Some(collection);
        self
    }

    /// Accept and ignore attributes the schema does not know.
    pub fn allow_unknown_attributes(mut self) -> Self {
        self.schema.allow_unknown_attributes = true;
        self
    }

    /// Accept and ignore child elements the schema does not know.
    pub fn allow_unknown_elements(mut self) -> Self {
        self.schema.allow_unknown_elements = true;
        self
    }

    /// `OnRequiredPropertyNotFound`: the hook receives the property name and
    /// may return a substitute value.
    pub fn on_required_missing(
        mut self,
        hook: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.schema.on_required_missing = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Arc<ElementSchema> {
        Arc::new(self.schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionStyle {
    /// Children identified by element name alone.
    Basic { element_names: Vec<String> },
    /// Children declared through add / remove / clear markers.
    AddRemoveClear {
        add: String,
        remove: String,
        clear: String,
    },
}

#[derive(Clone)]
pub struct CollectionSchema {
    style: CollectionStyle,
    alternate: bool,
    item: ElementCtor,
}

impl fmt::Debug for CollectionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSchema")
            .field("style", &self.style)
            .field("alternate", &self.alternate)
            .finish_non_exhaustive()
    }
}

impl CollectionSchema {
    pub fn basic(
        element_name: impl Into<String>,
        item: impl Fn() -> Element + Send + Sync + 'static,
    ) -> Self {
        Self {
            style: CollectionStyle::Basic {
                element_names: vec![element_name.into()],
            },
            alternate: false,
            item: Arc::new(item),
        }
    }

    pub fn add_remove_clear(item: impl Fn() -> Element + Send + Sync + 'static) -> Self {
        Self {
            style: CollectionStyle::AddRemoveClear {
                add: "add".into(),
                remove: "remove".into(),
                clear: "clear".into(),
            },
            alternate: false,
            item: Arc::new(item),
        }
    }

    /// Rename the add / remove / clear markers.
    pub fn with_markers(mut self, add: &str, remove: &str, clear: &str) -> Self {
        if let CollectionStyle::AddRemoveClear { .. } = self.style {
            self.style = CollectionStyle::AddRemoveClear {
                add: add.into(),
                remove: remove.into(),
                clear: clear.into(),
            };
        }
        self
    }

    /// Accept an additional element name as a member of a basic collection.
    pub fn with_member_name(mut self, name: &str) -> Self {
        if let CollectionStyle::Basic { element_names } = &mut self.style {
            element_names.push(name.into());
        }
        self
    }

    /// New entries go before the inherited block instead of after it.
    pub fn alternate(mut self) -> Self {
        self.alternate = true;
        self
    }

    pub fn style(&self) -> &CollectionStyle {
        &self.style
    }

    pub fn is_alternate(&self) -> bool {
        self.alternate
    }

    pub fn is_add_remove_clear(&self) -> bool {
        matches!(self.style, CollectionStyle::AddRemoveClear { .. })
    }

    /// Only add/remove/clear collections reject a repeated key.
    pub fn throw_on_duplicate(&self) -> bool {
        self.is_add_remove_clear()
    }

    pub(crate) fn new_item(&self) -> Element {
        (self.item)()
    }

    /// Whether a child element name denotes a collection item.
    pub fn is_member(&self, name: &str) -> bool {
        match &self.style {
            CollectionStyle::Basic { element_names } => element_names.iter().any(|n| n == name),
            CollectionStyle::AddRemoveClear { add, .. } => add == name,
        }
    }

    /// Element name used when emitting an item.
    pub fn item_name(&self) -> &str {
        match &self.style {
            CollectionStyle::Basic { element_names } => {
                element_names.first().map(String::as_str).unwrap_or("add")
            }
            CollectionStyle::AddRemoveClear { add, .. } => add,
        }
    }

    /// Marker names that may appear in an element lock list.
    pub fn marker_names(&self) -> Vec<&str> {
        match &self.style {
            CollectionStyle::Basic { element_names } => {
                element_names.iter().map(String::as_str).collect()
            }
            CollectionStyle::AddRemoveClear { add, remove, clear } => {
                vec![add.as_str(), remove.as_str(), clear.as_str()]
            }
        }
    }
}

/// Maps declared section type names to constructors.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    sections: HashMap<String, ElementCtor>,
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.sections.keys().collect();
        names.sort();
        f.debug_struct("SchemaRegistry")
            .field("sections", &names)
            .finish()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        ctor: impl Fn() -> Element + Send + Sync + 'static,
    ) -> &mut Self {
        self.sections.insert(type_name.into(), Arc::new(ctor));
        self
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.sections.contains_key(type_name)
    }

    pub fn create(&self, type_name: &str) -> Option<Element> {
        self.sections.get(type_name).map(|ctor| ctor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test::{app_settings_schema, server_schema};

    #[test]
    fn builder_indexes_properties() {
        let schema = server_schema();
        assert!(schema.index_of("timeout").is_some());
        assert!(schema.property("missing").is_none());
    }

    #[test]
    fn redefining_a_property_replaces_it() {
        let schema = ElementSchema::builder("x")
            .property(PropertyDescriptor::integer("a"))
            .property(PropertyDescriptor::string("a"))
            .build();
        assert_eq!(schema.properties().len(), 1);
        assert!(!schema.properties()[0].is_element());
    }

    #[test]
    fn default_collection_is_found() {
        let schema = app_settings_schema();
        assert!(schema.default_collection_index().is_some());
    }

    #[test]
    fn add_remove_clear_throws_on_duplicate() {
        let c = CollectionSchema::add_remove_clear(|| Element::new(server_schema()));
        assert!(c.throw_on_duplicate());
        assert!(c.is_member("add"));
        assert!(!c.is_member("remove"));
        assert_eq!(c.marker_names(), vec!["add", "remove", "clear"]);
    }

    #[test]
    fn basic_accepts_extra_member_names() {
        let c = CollectionSchema::basic("rule", || Element::new(server_schema()))
            .with_member_name("deny");
        assert!(!c.throw_on_duplicate());
        assert!(c.is_member("rule"));
        assert!(c.is_member("deny"));
        assert_eq!(c.item_name(), "rule");
    }

    #[test]
    fn registry_creates_registered_types() {
        let mut reg = SchemaRegistry::new();
        reg.register("Server", || Element::new(server_schema()));
        assert!(reg.contains("Server"));
        assert!(reg.create("Server").is_some());
        assert!(reg.create("Other").is_none());
    }
}
