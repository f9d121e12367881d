use std::io::Write;

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};

use crate::{
    document::{Document, Namespace, NodeId, NodeKind},
    error::FlattenError,
    names::{ExpandedName, XML_NAMESPACE},
};

fn serialize_error(err: impl std::fmt::Display) -> FlattenError {
    FlattenError::Serialize(err.to_string())
}

/// Comments may not contain `--`.
pub(crate) fn comment_text(text: &str) -> String {
    let mut text = text.to_string();
    while text.contains("--") {
        text = text.replace("--", "- -");
    }
    if text.ends_with('-') {
        text.push(' ');
    }
    text
}

impl Document {
    /// Renders the document, indented, with an XML declaration.
    pub fn to_xml_string(&self) -> Result<String, FlattenError> {
        let mut buffer = Vec::new();
        self.write_xml(&mut buffer)?;
        String::from_utf8(buffer).map_err(serialize_error)
    }

    pub fn write_xml<W: Write>(&self, output: W) -> Result<(), FlattenError> {
        let mut writer = Writer::new_with_indent(output, b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(serialize_error)?;
        let mut serializer = Serializer::new(self);
        serializer.write_node(&mut writer, self.root(), true)?;
        writer.into_inner().flush().map_err(serialize_error)
    }

    /// Renders a single element without its children, for use in diagnostic comments.
    pub fn element_snippet(&self, id: NodeId) -> String {
        let mut writer = Writer::new(Vec::new());
        let mut serializer = Serializer::with_scope(self, id);
        match serializer.write_node(&mut writer, id, false) {
            Ok(()) => String::from_utf8_lossy(&writer.into_inner()).into_owned(),
            Err(_) => String::new(),
        }
    }
}

struct Serializer<'d> {
    document: &'d Document,
    scopes: Vec<Vec<Namespace>>,
}

impl<'d> Serializer<'d> {
    fn new(document: &'d Document) -> Self {
        Self {
            document,
            scopes: Vec::new(),
        }
    }

    /// Starts out with the bindings in scope at the parent of `id`.
    fn with_scope(document: &'d Document, id: NodeId) -> Self {
        let scopes = document
            .parent(id)
            .map(|parent| {
                // closest declarations last, as on the stack
                let mut scope = document.in_scope_namespaces(parent);
                scope.reverse();
                vec![scope]
            })
            .unwrap_or_default();
        Self { document, scopes }
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|ns| ns.prefix.as_deref() == prefix)
            .and_then(|ns| (!ns.uri.is_empty()).then_some(ns.uri.as_str()))
    }

    fn find_prefix(&self, uri: &str) -> Option<String> {
        if uri == XML_NAMESPACE {
            return Some("xml".to_string());
        }
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .filter_map(|ns| ns.prefix.as_deref().filter(|_| ns.uri == uri))
            .find(|prefix| self.lookup(Some(*prefix)) == Some(uri))
            .map(str::to_string)
    }

    fn declare(&mut self, prefix: Option<String>, uri: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(Namespace {
                prefix,
                uri: uri.to_string(),
            });
        }
    }

    fn fresh_prefix(&self) -> String {
        (0..)
            .map(|n| format!("ns{n}"))
            .find(|candidate| self.lookup(Some(candidate.as_str())).is_none())
            .unwrap_or_default()
    }

    /// The prefixed form of `name`, declaring a prefix in the current scope if none is bound.
    fn qualified_name(&mut self, name: &ExpandedName, is_element: bool) -> String {
        let Some(uri) = name.namespace.as_deref() else {
            if is_element && self.lookup(None).is_some() {
                self.declare(None, "");
            }
            return name.local_name.clone();
        };
        if is_element && self.lookup(None) == Some(uri) {
            return name.local_name.clone();
        }
        let prefix = match self.find_prefix(uri) {
            Some(prefix) => prefix,
            None => {
                let prefix = self.fresh_prefix();
                self.declare(Some(prefix.clone()), uri);
                prefix
            }
        };
        format!("{prefix}:{}", name.local_name)
    }

    fn write_node<W: Write>(
        &mut self,
        writer: &mut Writer<W>,
        id: NodeId,
        recurse: bool,
    ) -> Result<(), FlattenError> {
        let document = self.document;
        let element = match document.kind(id) {
            NodeKind::Element(element) => element,
            NodeKind::Text(text) => {
                return writer
                    .write_event(Event::Text(BytesText::new(text)))
                    .map_err(serialize_error);
            }
            NodeKind::Comment(text) => {
                let text = comment_text(text);
                return writer
                    .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                    .map_err(serialize_error);
            }
        };

        self.scopes.push(element.namespaces.clone());
        let tag = self.qualified_name(&element.name, true);
        let attributes: Vec<(String, &str)> = element
            .attributes
            .iter()
            .map(|a| (self.qualified_name(&a.name, false), a.value.as_str()))
            .collect();

        let mut start = BytesStart::new(tag.as_str());
        for ns in self.scopes.last().into_iter().flatten() {
            let key = match ns.prefix.as_deref() {
                Some(prefix) => format!("xmlns:{prefix}"),
                None => "xmlns".to_string(),
            };
            start.push_attribute((key.as_str(), ns.uri.as_str()));
        }
        for (key, value) in &attributes {
            start.push_attribute((key.as_str(), *value));
        }

        let children = document.children(id);
        if !recurse || children.is_empty() {
            writer
                .write_event(Event::Empty(start))
                .map_err(serialize_error)?;
        } else {
            writer
                .write_event(Event::Start(start))
                .map_err(serialize_error)?;
            for &child in children {
                self.write_node(writer, child, true)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(tag.as_str())))
                .map_err(serialize_error)?;
        }
        self.scopes.pop();
        Ok(())
    }
}
