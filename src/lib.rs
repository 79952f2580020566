//! Layered configuration documents with inheritance, path-scoped overlays,
//! and differential persistence.
//!
//! A configuration system is a tree of XML documents. Each document declares
//! the sections it knows about, sets values on them, and inherits everything
//! it does not set from its parent. Saving writes back only what the document
//! itself contributes.
//!
//! ```ignore
//! let mut system = ConfigSystem::builder()
//!     .host(FsHost::new("/srv/site"))
//!     .register_section("AppSettingsSection", app_settings)
//!     .build();
//! let root = system.load("web.config", None)?;
//! let app = system.load_at("app", "app/web.config", root)?;
//!
//! if let Some(server) = system.get_section(app, "server")? {
//!     server.write().set("timeout", 60)?;
//! }
//! system.save(app, SaveMode::Modified)?;
//! ```
//!
//! # Documents and nodes
//!
//! Every loaded document is a node in a [`ConfigSystem`]. So is every
//! `<location path="...">` block once it has been resolved against a
//! position in the tree. Nodes are addressed by [`NodeId`]; the system owns
//! them all.
//!
//! A document looks like this:
//!
//! ```xml
//! <configuration>
//!   <configSections>
//!     <section name="server" type="ServerSection" />
//!     <sectionGroup name="system.web">
//!       <section name="pages" type="PagesSection" allowLocation="false" />
//!     </sectionGroup>
//!   </configSections>
//!   <server timeout="10" />
//!   <location path="admin" allowOverride="false">
//!     <server timeout="60" />
//!   </location>
//! </configuration>
//! ```
//!
//! Declarations are inherited: a child document sees every section its
//! ancestors declared and may declare more, but never redeclare one.
//!
//! # Sections and elements
//!
//! A section's shape comes from an [`ElementSchema`]: scalar properties with
//! optional defaults and [`Validator`]s, nested elements, and at most one
//! collection. The section type name used in `<configSections>` maps to a
//! constructor through [`register_section()`](ConfigSystemBuilder::register_section).
//!
//! Sections are materialized lazily. The first [`get_section()`](ConfigSystem::get_section)
//! on a node builds the parent's instance, resets a fresh element from it,
//! then reads the node's own markup on top. Every property remembers where
//! its value came from ([`ValueOrigin`]): the schema default, an ancestor, or
//! this node.
//!
//! # Collections
//!
//! Two styles exist:
//!
//! - **Add/remove/clear**: `<add key="a"/>`, `<remove key="a"/>` and
//!   `<clear/>` edit the inherited list. Removing an inherited entry is
//!   recorded and written back as a `<remove>`.
//! - **Basic**: children are named by their element name. Entries are
//!   merged by key; inherited entries come first, or last for an
//!   *alternate* collection.
//!
//! # Locks
//!
//! `lockAttributes`, `lockAllAttributesExcept`, `lockElements`,
//! `lockAllElementsExcept` and `lockItem` on any element restrict what
//! descendants may change. A `<location allowOverride="false">` block seals
//! its sections: nothing below may touch them. Violations are reported as
//! [`ConfigError::LockedPropertyOverride`], both when reading markup and
//! when setting values programmatically.
//!
//! # Persistence
//!
//! [`SaveMode`] picks how much of each section is written:
//!
//! | Mode | Writes |
//! |------|--------|
//! | `Minimal` | values that differ from what the parent supplies |
//! | `Modified` | values set on this node, plus anything changed since load |
//! | `Full` | every value, defaults included |
//!
//! Sections with `configSource` are written to their external file and
//! replaced in the main document by a stub. Protected sections go through
//! their [`ProtectedConfigProvider`] before they are written. Every document
//! is rendered before anything is written, and the system is only marked
//! clean once every write succeeded.
//!
//! # Hosts
//!
//! Documents are read and written through a [`ConfigHost`]. [`FsHost`] maps
//! names to files below a root directory; [`MemoryHost`] keeps them in memory
//! for tests and embedding.
//!
//! # Engine settings
//!
//! The engine's own knobs (default save mode, indentation, required-property
//! substitution policy, the section path separator) are an
//! [`EngineSettings`] struct built on confique. [`SettingsLoader`] layers
//! TOML files, `PREFIX__KEY` environment variables and programmatic
//! overrides on top of the compiled defaults, and rejects unknown keys with
//! their file and line.

pub mod collection;
pub mod element;
pub mod error;
pub mod host;
pub mod lock;
pub mod markup;
pub mod overlay;
pub mod property;
pub mod protect;
pub mod schema;
pub mod section;
pub mod settings;
pub mod types;
pub mod validate;
pub mod value;

mod builder;
mod document;
mod persist;
mod system;

#[cfg(test)]
mod fixtures;

pub use builder::ConfigSystemBuilder;
pub use collection::{Collection, CollectionMut};
pub use element::{Element, ReadContext};
pub use error::ConfigError;
pub use host::{ConfigHost, FsHost, MemoryHost};
pub use lock::LockKind;
pub use markup::MarkupNode;
pub use overlay::{Overlay, OverlayCollection};
pub use persist::RenderedDocument;
pub use property::PropertyDescriptor;
pub use protect::{ProtectedConfigProvider, ProviderRegistry};
pub use schema::{CollectionSchema, ElementSchema, SchemaRegistry};
pub use section::{Section, SectionGroupInfo, SectionHandle};
pub use settings::{EngineSettings, SettingsLoader};
pub use system::ConfigSystem;
pub use types::{NodeId, SaveMode, SubstitutionPolicy, ValueOrigin};
pub use validate::{CallbackValidator, IntegerRange, OneOf, RegexValidator, StringLength, Validator};
pub use value::{Converter, ValueType};
