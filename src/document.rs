//! Structural reading of one configuration document.
//!
//! A document is a `<configuration>` root holding, in order, an optional
//! `<configSections>` block, one element per declared section (possibly
//! wrapped in section-group elements) and any number of `<location>` blocks.
//! Section bodies are kept as raw markup here; they become [`Element`]s only
//! when a section is first requested.
//!
//! [`Element`]: crate::element::Element

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::error::ConfigError;
use crate::markup::{self, MarkupNode};
use crate::overlay::{Overlay, OverlayCollection, RawSection, normalize_path};
use crate::section::{SectionGroupInfo, SectionInfo, join_path};

pub(crate) const ROOT: &str = "configuration";
pub(crate) const CONFIG_SECTIONS: &str = "configSections";
pub(crate) const LOCATION: &str = "location";
pub(crate) const CONFIG_SOURCE: &str = "configSource";

#[derive(Debug, Default)]
pub(crate) struct ParsedDocument {
    pub(crate) groups: Arc<SectionGroupInfo>,
    /// The declaration block as written, re-emitted on save.
    pub(crate) config_sections: Option<MarkupNode>,
    pub(crate) sections: Vec<RawSection>,
    /// Body sections declared through `<location allowOverride="false">`
    /// without a path.
    pub(crate) sealed: HashSet<String>,
    pub(crate) overlays: OverlayCollection,
}

/// Parse `text` (or an absent document) on top of the declarations visible
/// from the parent chain.
pub(crate) fn parse_document(
    text: Option<&str>,
    file: &str,
    inherited: &Arc<SectionGroupInfo>,
) -> Result<ParsedDocument, ConfigError> {
    let mut doc = ParsedDocument {
        groups: Arc::clone(inherited),
        ..ParsedDocument::default()
    };
    let Some(text) = text else {
        return Ok(doc);
    };

    let root = markup::parse(text, file)?;
    if root.name != ROOT {
        return Err(ConfigError::malformed(
            file,
            root.line,
            format!("root element must be <{ROOT}>, found <{}>", root.name),
        ));
    }

    let mut overlays: Vec<Overlay> = Vec::new();
    for (i, child) in root.children.iter().enumerate() {
        if child.name == CONFIG_SECTIONS {
            if i != 0 {
                return Err(ConfigError::malformed(
                    file,
                    child.line,
                    "<configSections> must be the first child of <configuration>",
                ));
            }
            read_declarations(child, &mut Vec::new(), &mut doc.groups, file)?;
            doc.config_sections = Some(child.clone());
        } else if child.name == LOCATION {
            read_location(child, &mut doc, &mut overlays, file)?;
        } else {
            read_body_element(child, "", &doc.groups, &mut doc.sections, false, file)?;
        }
    }
    for overlay in overlays {
        doc.overlays.push(overlay);
    }
    trace!(
        file,
        sections = doc.sections.len(),
        overlays = doc.overlays.len(),
        "parsed document"
    );
    Ok(doc)
}

fn required_attr<'a>(node: &'a MarkupNode, name: &str, file: &str) -> Result<&'a str, ConfigError> {
    node.attr(name).filter(|v| !v.is_empty()).ok_or_else(|| {
        ConfigError::malformed(
            file,
            node.line,
            format!("<{}> requires a '{name}' attribute", node.name),
        )
    })
}

fn bool_attr(node: &MarkupNode, name: &str, default: bool, file: &str) -> Result<bool, ConfigError> {
    match node.attr(name) {
        None => Ok(default),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(ConfigError::malformed(
            file,
            node.line,
            format!("'{name}' must be true or false, found '{v}'"),
        )),
    }
}

fn read_declarations(
    block: &MarkupNode,
    parent: &mut Vec<String>,
    groups: &mut Arc<SectionGroupInfo>,
    file: &str,
) -> Result<(), ConfigError> {
    for decl in &block.children {
        match decl.name.as_str() {
            "section" => {
                if let Some(child) = decl.children.first() {
                    return Err(ConfigError::malformed(
                        file,
                        child.line,
                        "<section> declarations take no child elements",
                    ));
                }
                let info = SectionInfo {
                    name: required_attr(decl, "name", file)?.to_string(),
                    type_name: required_attr(decl, "type", file)?.to_string(),
                    allow_location: bool_attr(decl, "allowLocation", true, file)?,
                    declared_in: file.to_string(),
                };
                Arc::make_mut(groups)
                    .declare_section(parent, info)
                    .map_err(|reason| ConfigError::malformed(file, decl.line, reason))?;
            }
            "sectionGroup" => {
                let name = required_attr(decl, "name", file)?;
                let type_name = decl.attr("type").map(str::to_string);
                Arc::make_mut(groups)
                    .declare_group(parent, name, type_name)
                    .map_err(|reason| ConfigError::malformed(file, decl.line, reason))?;
                parent.push(name.to_string());
                read_declarations(decl, parent, groups, file)?;
                parent.pop();
            }
            other => {
                return Err(ConfigError::malformed(
                    file,
                    decl.line,
                    format!("unexpected <{other}> in <{CONFIG_SECTIONS}>"),
                ));
            }
        }
    }
    Ok(())
}

/// Route a body element to the section or group it names.
fn read_body_element(
    node: &MarkupNode,
    prefix: &str,
    groups: &SectionGroupInfo,
    out: &mut Vec<RawSection>,
    in_location: bool,
    file: &str,
) -> Result<(), ConfigError> {
    if node.name == LOCATION {
        return Err(ConfigError::malformed(
            file,
            node.line,
            "<location> elements cannot be nested",
        ));
    }
    let path = join_path(prefix, &node.name);

    if let Some(info) = groups.get_section(&path) {
        if in_location && !info.allow_location {
            return Err(ConfigError::malformed(
                file,
                node.line,
                format!("section '{path}' cannot be used inside <location>"),
            ));
        }
        if out.iter().any(|s| s.path == path) {
            return Err(ConfigError::malformed(
                file,
                node.line,
                format!("section '{path}' appears more than once"),
            ));
        }
        out.push(RawSection {
            path,
            node: node.clone(),
            file: file.to_string(),
        });
        return Ok(());
    }

    if groups.get_group(&path).is_some() {
        if let Some((name, _)) = node.attributes.first() {
            return Err(ConfigError::malformed(
                file,
                node.line,
                format!("section group '{path}' takes no attributes, found '{name}'"),
            ));
        }
        for child in &node.children {
            read_body_element(child, &path, groups, out, in_location, file)?;
        }
        return Ok(());
    }

    Err(ConfigError::UnrecognizedSection {
        name: path,
        file: file.to_string(),
        line: node.line,
    })
}

fn read_location(
    node: &MarkupNode,
    doc: &mut ParsedDocument,
    overlays: &mut Vec<Overlay>,
    file: &str,
) -> Result<(), ConfigError> {
    for (name, _) in &node.attributes {
        if name != "path" && name != "allowOverride" && !name.starts_with("xmlns") {
            return Err(ConfigError::malformed(
                file,
                node.line,
                format!("unexpected attribute '{name}' on <{LOCATION}>"),
            ));
        }
    }
    let path = normalize_path(node.attr("path").unwrap_or(""));
    let allow_override = bool_attr(node, "allowOverride", true, file)?;

    if path.is_empty() {
        let first = doc.sections.len();
        for child in &node.children {
            read_body_element(child, "", &doc.groups, &mut doc.sections, true, file)?;
        }
        if !allow_override {
            doc.sealed
                .extend(doc.sections[first..].iter().map(|s| s.path.clone()));
        }
        return Ok(());
    }

    let index = match overlays
        .iter()
        .position(|o| o.path().eq_ignore_ascii_case(&path))
    {
        Some(i) => {
            if overlays[i].allow_override() != allow_override {
                return Err(ConfigError::malformed(
                    file,
                    node.line,
                    format!("<location path=\"{path}\"> is declared with conflicting allowOverride values"),
                ));
            }
            i
        }
        None => {
            overlays.push(Overlay::new(path, allow_override, node.line));
            overlays.len() - 1
        }
    };
    for child in &node.children {
        read_body_element(
            child,
            "",
            &doc.groups,
            &mut overlays[index].sections,
            true,
            file,
        )?;
    }
    Ok(())
}
