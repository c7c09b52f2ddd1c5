//! Mutable XML tree for DBGp packets.
//!
//! DBGp packets are small, attribute-centric documents, and the proxy's only
//! mutation is rewriting attribute values on direct children of the root.
//! Parsing goes through `roxmltree`; because that tree is read-only, the
//! parse is converted into this owned model, mutated, and re-serialized with
//! our own writer.
//!
//! Model limits, chosen to fit the traffic: namespace declarations are
//! collected document-wide and re-emitted on the root element, and comments
//! and processing instructions inside a packet are dropped. DBGp engines
//! declare namespaces on the root and never emit either.

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Local name, without any prefix.
    pub name: String,
    /// Prefix as written in the source document, e.g. `xdebug` in
    /// `<xdebug:message>`. `None` for unprefixed elements.
    pub prefix: Option<String>,
    /// Resolved namespace URI, if the element is in a namespace (default or
    /// prefixed).
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            prefix: None,
            namespace: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Value of the named attribute, matched on the local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attribute| attribute.name == name)
            .map(|attribute| attribute.value.as_str())
    }

    /// Overwrites the named attribute, or appends it when absent.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|attribute| attribute.name == name)
        {
            Some(attribute) => attribute.value = value,
            None => self.attributes.push(Attribute {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    pub fn child_elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for node in &self.children {
            if let Node::Text(text) = node {
                out.push_str(text);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
    /// `(prefix, uri)` namespace declarations re-emitted on the root.
    declarations: Vec<(Option<String>, String)>,
}

impl Document {
    pub fn new(root: Element) -> Self {
        Document {
            root,
            declarations: Vec::new(),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let parsed = roxmltree::Document::parse(text)?;
        let mut declarations: Vec<(Option<String>, String)> = Vec::new();
        collect_declarations(parsed.root_element(), &mut declarations);
        let root = convert(parsed.root_element(), &declarations);
        Ok(Document { root, declarations })
    }

    pub fn to_xml(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        write_element(&mut out, &self.root, Some(&self.declarations));
        out
    }
}

fn collect_declarations(
    node: roxmltree::Node<'_, '_>,
    declarations: &mut Vec<(Option<String>, String)>,
) {
    for namespace in node.namespaces() {
        // The xml prefix is implicitly bound; re-declaring it is just noise.
        if namespace.name() == Some("xml") {
            continue;
        }
        let declaration = (
            namespace.name().map(str::to_string),
            namespace.uri().to_string(),
        );
        if !declarations.contains(&declaration) {
            declarations.push(declaration);
        }
    }
    for child in node.children().filter(|child| child.is_element()) {
        collect_declarations(child, declarations);
    }
}

fn convert(
    node: roxmltree::Node<'_, '_>,
    declarations: &[(Option<String>, String)],
) -> Element {
    let tag = node.tag_name();
    let namespace = tag.namespace().map(str::to_string);
    let prefix = namespace.as_deref().and_then(|uri| {
        declarations
            .iter()
            .find(|(_, declared)| declared == uri)
            .and_then(|(prefix, _)| prefix.clone())
    });
    let mut element = Element {
        name: tag.name().to_string(),
        prefix,
        namespace,
        attributes: node
            .attributes()
            .map(|attribute| Attribute {
                name: attribute.name().to_string(),
                value: attribute.value().to_string(),
            })
            .collect(),
        children: Vec::new(),
    };
    for child in node.children() {
        if child.is_element() {
            element
                .children
                .push(Node::Element(convert(child, declarations)));
        } else if child.is_text() {
            if let Some(text) = child.text() {
                element.children.push(Node::Text(text.to_string()));
            }
        }
    }
    element
}

fn write_element(
    out: &mut String,
    element: &Element,
    declarations: Option<&[(Option<String>, String)]>,
) {
    out.push('<');
    push_qualified_name(out, element);
    if let Some(declarations) = declarations {
        for (prefix, uri) in declarations {
            match prefix {
                Some(prefix) => {
                    out.push_str(" xmlns:");
                    out.push_str(prefix);
                }
                None => out.push_str(" xmlns"),
            }
            out.push_str("=\"");
            push_escaped(out, uri, true);
            out.push('"');
        }
    }
    for attribute in &element.attributes {
        out.push(' ');
        out.push_str(&attribute.name);
        out.push_str("=\"");
        push_escaped(out, &attribute.value, true);
        out.push('"');
    }
    if element.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        match child {
            Node::Element(child) => write_element(out, child, None),
            Node::Text(text) => push_escaped(out, text, false),
        }
    }
    out.push_str("</");
    push_qualified_name(out, element);
    out.push('>');
}

fn push_qualified_name(out: &mut String, element: &Element) {
    if let Some(prefix) = &element.prefix {
        out.push_str(prefix);
        out.push(':');
    }
    out.push_str(&element.name);
}

fn push_escaped(out: &mut String, value: &str, in_attribute: bool) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
