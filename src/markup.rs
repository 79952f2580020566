//! The structured-markup tree the engine reads from and writes to.
//!
//! Documents are XML. Only elements and attributes carry meaning; comments,
//! processing instructions and the declaration are skipped on read, and text
//! content is rejected because no configuration element can hold it.

use std::fmt;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};

use crate::error::ConfigError;

/// One element of a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<MarkupNode>,
    /// 1-indexed line of the element's start tag; 0 for generated nodes.
    pub line: usize,
}

impl MarkupNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn push(&mut self, child: MarkupNode) {
        self.children.push(child);
    }

    pub fn child(&self, name: &str) -> Option<&MarkupNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.children.is_empty()
    }
}

/// Parse a whole document and return its root element.
pub fn parse(text: &str, file: &str) -> Result<MarkupNode, ConfigError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<MarkupNode> = Vec::new();
    let mut root: Option<MarkupNode> = None;

    loop {
        let event = reader.read_event();
        let line = line_at(text, (reader.buffer_position() as usize).saturating_sub(1));
        match event {
            Ok(Event::Start(e)) => {
                stack.push(open_node(&e, file, line)?);
            }
            Ok(Event::Empty(e)) => {
                let node = open_node(&e, file, line)?;
                attach(&mut stack, &mut root, node, file)?;
            }
            Ok(Event::End(_)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ConfigError::malformed(file, line, "unexpected end tag"))?;
                attach(&mut stack, &mut root, node, file)?;
            }
            Ok(Event::Text(t)) => {
                if !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(ConfigError::malformed(
                        file,
                        line,
                        "text content is not allowed in configuration elements",
                    ));
                }
            }
            Ok(Event::CData(_)) => {
                return Err(ConfigError::malformed(
                    file,
                    line,
                    "CDATA is not allowed in configuration elements",
                ));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                let line = line_at(text, reader.error_position() as usize);
                return Err(ConfigError::malformed(file, line, e.to_string()));
            }
        }
    }

    if !stack.is_empty() {
        return Err(ConfigError::malformed(
            file,
            line_at(text, text.len()),
            "unexpected end of document",
        ));
    }
    root.ok_or_else(|| ConfigError::malformed(file, 1, "document has no root element"))
}

fn open_node(e: &BytesStart<'_>, file: &str, line: usize) -> Result<MarkupNode, ConfigError> {
    let name = std::str::from_utf8(e.name().as_ref())
        .map_err(|err| ConfigError::malformed(file, line, err.to_string()))?
        .to_string();
    let mut node = MarkupNode {
        name,
        line,
        ..MarkupNode::default()
    };
    // Duplicates are reported by the element with property context.
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|err| ConfigError::malformed(file, line, err.to_string()))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|err| ConfigError::malformed(file, line, err.to_string()))?
            .to_string();
        let value = attr
            .unescape_value()
            .map_err(|err| ConfigError::malformed(file, line, err.to_string()))?
            .into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(
    stack: &mut [MarkupNode],
    root: &mut Option<MarkupNode>,
    node: MarkupNode,
    file: &str,
) -> Result<(), ConfigError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(ConfigError::malformed(
                file,
                node.line,
                "document has more than one root element",
            ));
        }
    }
    Ok(())
}

fn line_at(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

/// Render a complete document, with an XML declaration.
pub fn render_document(root: &MarkupNode, indent: usize) -> Result<String, ConfigError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', indent);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(render_error)?;
    write_node(&mut writer, root)?;
    finish(writer)
}

/// Render a single element without a declaration.
pub fn render_fragment(node: &MarkupNode, indent: usize) -> Result<String, ConfigError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', indent);
    write_node(&mut writer, node)?;
    finish(writer)
}

fn write_node(writer: &mut Writer<Vec<u8>>, node: &MarkupNode) -> Result<(), ConfigError> {
    let mut start = BytesStart::new(node.name.as_str());
    for (key, value) in &node.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }
    if node.children.is_empty() {
        writer.write_event(Event::Empty(start)).map_err(render_error)?;
        return Ok(());
    }
    writer.write_event(Event::Start(start)).map_err(render_error)?;
    for child in &node.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .map_err(render_error)
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String, ConfigError> {
    let mut out = String::from_utf8(writer.into_inner())
        .map_err(|e| ConfigError::malformed("<output>", 0, e.to_string()))?;
    out.push('\n');
    Ok(out)
}

fn render_error<E: fmt::Display>(e: E) -> ConfigError {
    ConfigError::malformed("<output>", 0, e.to_string())
}
