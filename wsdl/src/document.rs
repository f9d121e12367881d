//! Mutable XML tree used while documents are merged.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. Ids stay valid across every edit,
//! including for nodes that have been detached from the tree.

use encoding_rs::{Encoding, UTF_8};

use crate::names::{ExpandedName, XML_NAMESPACE};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// A namespace declaration. An empty `uri` on the default prefix undeclares the default namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub prefix: Option<String>,
    pub uri: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    pub name: ExpandedName,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    pub name: ExpandedName,
    pub attributes: Vec<Attribute>,
    /// Declarations made on this element; bindings inherited from ancestors are not repeated.
    pub namespaces: Vec<Namespace>,
}

impl Element {
    pub fn new(name: ExpandedName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
        }
    }

    /// Value of an attribute without namespace.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.namespace.is_none() && a.name.local_name == name)
            .map(|a| a.value.as_str())
    }

    pub fn attribute_by_name(&self, name: &ExpandedName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == *name)
            .map(|a| a.value.as_str())
    }

    /// Sets an attribute, keeping its position if it already exists.
    pub fn set_attribute(&mut self, name: ExpandedName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(attribute) => attribute.value = value,
            None => self.attributes.push(Attribute { name, value }),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        let index = self
            .attributes
            .iter()
            .position(|a| a.name.namespace.is_none() && a.name.local_name == name)?;
        Some(self.attributes.remove(index).value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    nodes: Vec<NodeData>,
    root: NodeId,
}

impl Document {
    /// Creates a document consisting of a single root element.
    pub fn new(root: Element) -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Element(root),
                parent: None,
                children: Vec::new(),
            }],
            root: NodeId(0),
        }
    }

    pub fn parse(text: &str) -> Result<Self, roxmltree::Error> {
        Self::parse_with_options(text, false)
    }

    pub fn parse_with_options(text: &str, allow_dtd: bool) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd,
            ..roxmltree::ParsingOptions::default()
        };
        let xml = roxmltree::Document::parse_with_options(text, options)?;
        let mut document = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        document.root = document.map_from_xml(xml.root_element(), None);
        Ok(document)
    }

    /// Decodes raw bytes and parses them. A byte order mark wins over the encoding named in the
    /// XML declaration; without either the bytes are taken as UTF-8.
    pub fn from_bytes(bytes: &[u8], allow_dtd: bool) -> Result<Self, roxmltree::Error> {
        let encoding = declared_encoding(bytes).unwrap_or(UTF_8);
        let (text, _, _) = encoding.decode(bytes);
        Self::parse_with_options(&text, allow_dtd)
    }

    fn map_from_xml(&mut self, node: roxmltree::Node, parent: Option<NodeId>) -> NodeId {
        let kind = if node.is_element() {
            NodeKind::Element(element_from_xml(node))
        } else if node.is_comment() {
            NodeKind::Comment(node.text().unwrap_or_default().to_string())
        } else {
            NodeKind::Text(node.text().unwrap_or_default().to_string())
        };
        let id = self.push(kind, parent);
        for child in node.children() {
            let keep = match child.node_type() {
                roxmltree::NodeType::Element | roxmltree::NodeType::Comment => true,
                // The output is re-indented, so layout whitespace is dropped.
                roxmltree::NodeType::Text => {
                    !child.text().unwrap_or_default().trim().is_empty()
                }
                _ => false,
            };
            if keep {
                let child_id = self.map_from_xml(child, Some(id));
                self.nodes[id.0].children.push(child_id);
            }
        }
        id
    }

    fn push(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeData {
            kind,
            parent,
            children: Vec::new(),
        });
        id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[id.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn is_element_named(&self, id: NodeId, namespace: &str, local_name: &str) -> bool {
        self.element(id)
            .map(|e| e.name.is(namespace, local_name))
            .unwrap_or(false)
    }

    /// Direct child elements with the given name, in document order.
    pub fn child_elements_named(
        &self,
        id: NodeId,
        namespace: &str,
        local_name: &str,
    ) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|&child| self.is_element_named(child, namespace, local_name))
            .collect()
    }

    /// All nodes below `id` (and `id` itself) in document order.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            result.push(node);
            stack.extend(self.nodes[node.0].children.iter().rev());
        }
        result
    }

    /// Elements strictly below `id` with the given name, in document order.
    pub fn descendant_elements_named(
        &self,
        id: NodeId,
        namespace: &str,
        local_name: &str,
    ) -> Vec<NodeId> {
        self.descendants(id)
            .into_iter()
            .skip(1)
            .filter(|&node| self.is_element_named(node, namespace, local_name))
            .collect()
    }

    /// Concatenated text of the direct text children.
    #[cfg(test)]
    pub(crate) fn text(&self, id: NodeId) -> String {
        self.children(id)
            .iter()
            .filter_map(|&child| match self.kind(child) {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.push(NodeKind::Element(element), None)
    }

    pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Comment(text.into()), None)
    }

    /// Removes `id` from its parent. The node and its subtree stay addressable.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.nodes[id.0].parent.take() {
            self.nodes[parent.0].children.retain(|&child| child != id);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Inserts `node` as the immediately preceding sibling of `anchor`.
    ///
    /// The root has no siblings; inserting before it leaves the tree untouched.
    pub fn insert_before(&mut self, anchor: NodeId, node: NodeId) {
        let Some(parent) = self.nodes[anchor.0].parent else {
            return;
        };
        self.detach(node);
        let Some(index) = self.position(parent, anchor) else {
            return;
        };
        self.nodes[node.0].parent = Some(parent);
        self.nodes[parent.0].children.insert(index, node);
    }

    /// Puts `new` where `old` is and detaches `old`.
    pub fn replace(&mut self, old: NodeId, new: NodeId) {
        self.insert_before(old, new);
        self.detach(old);
    }

    fn position(&self, parent: NodeId, child: NodeId) -> Option<usize> {
        self.nodes[parent.0]
            .children
            .iter()
            .position(|&candidate| candidate == child)
    }

    /// Copies the subtree at `id` of `other` into this arena, detached.
    ///
    /// Every namespace binding in scope at `id` in `other` is declared on the copy, so the copy
    /// means the same thing wherever it is inserted.
    pub fn adopt(&mut self, other: &Document, id: NodeId) -> NodeId {
        let copy = self.copy_subtree(other, id, None);
        if other.element(id).is_some() {
            let mut scope = other.in_scope_namespaces(id);
            if other.lookup_namespace(id, None).is_none() {
                scope.push(Namespace {
                    prefix: None,
                    uri: String::new(),
                });
            }
            if let Some(element) = self.element_mut(copy) {
                for namespace in scope {
                    if !element
                        .namespaces
                        .iter()
                        .any(|n| n.prefix == namespace.prefix)
                    {
                        element.namespaces.push(namespace);
                    }
                }
            }
        }
        copy
    }

    fn copy_subtree(&mut self, other: &Document, id: NodeId, parent: Option<NodeId>) -> NodeId {
        let copy = self.push(other.nodes[id.0].kind.clone(), parent);
        for &child in &other.nodes[id.0].children {
            let child_copy = self.copy_subtree(other, child, Some(copy));
            self.nodes[copy.0].children.push(child_copy);
        }
        copy
    }

    /// Adopts the subtree at `id` of `other` and inserts it before `anchor`, dropping the
    /// namespace declarations the new location already provides.
    pub fn adopt_before(&mut self, anchor: NodeId, other: &Document, id: NodeId) -> NodeId {
        let copy = self.adopt(other, id);
        self.insert_before(anchor, copy);
        self.prune_namespaces(copy);
        copy
    }

    fn prune_namespaces(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        let Some(element) = self.element(id) else {
            return;
        };
        let redundant: Vec<Option<String>> = element
            .namespaces
            .iter()
            .filter(|ns| {
                let expected = (!ns.uri.is_empty()).then_some(ns.uri.as_str());
                self.lookup_namespace(parent, ns.prefix.as_deref()) == expected
            })
            .map(|ns| ns.prefix.clone())
            .collect();
        if let Some(element) = self.element_mut(id) {
            element
                .namespaces
                .retain(|ns| !redundant.contains(&ns.prefix));
        }
    }

    /// Resolves `prefix` (`None` for the default namespace) at `id`.
    pub fn lookup_namespace(&self, id: NodeId, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        let mut current = Some(id);
        while let Some(node) = current {
            if let NodeKind::Element(element) = &self.nodes[node.0].kind {
                if let Some(ns) = element
                    .namespaces
                    .iter()
                    .find(|ns| ns.prefix.as_deref() == prefix)
                {
                    return (!ns.uri.is_empty()).then_some(ns.uri.as_str());
                }
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Finds a prefix bound to `uri` at `id`. `Some(None)` means `uri` is the default namespace,
    /// which is preferred over any prefix.
    pub fn lookup_prefix(&self, id: NodeId, uri: &str) -> Option<Option<&str>> {
        if self.lookup_namespace(id, None) == Some(uri) {
            return Some(None);
        }
        if uri == XML_NAMESPACE {
            return Some(Some("xml"));
        }
        let mut current = Some(id);
        while let Some(node) = current {
            if let NodeKind::Element(element) = &self.nodes[node.0].kind {
                for ns in &element.namespaces {
                    let Some(prefix) = ns.prefix.as_deref() else {
                        continue;
                    };
                    // A closer declaration may shadow this prefix with another URI.
                    if ns.uri == uri && self.lookup_namespace(id, Some(prefix)) == Some(uri) {
                        return Some(Some(prefix));
                    }
                }
            }
            current = self.nodes[node.0].parent;
        }
        None
    }

    /// Every binding visible at `id`, the closest declaration winning.
    pub fn in_scope_namespaces(&self, id: NodeId) -> Vec<Namespace> {
        let mut scope: Vec<Namespace> = Vec::new();
        let mut current = Some(id);
        while let Some(node) = current {
            if let NodeKind::Element(element) = &self.nodes[node.0].kind {
                for ns in &element.namespaces {
                    if !scope.iter().any(|seen| seen.prefix == ns.prefix) {
                        scope.push(ns.clone());
                    }
                }
            }
            current = self.nodes[node.0].parent;
        }
        scope.retain(|ns| !ns.uri.is_empty());
        scope
    }

    /// Declares `prefix` on `id`, replacing an existing local declaration of the same prefix.
    pub fn declare_namespace(&mut self, id: NodeId, prefix: Option<&str>, uri: &str) {
        let Some(element) = self.element_mut(id) else {
            return;
        };
        match element
            .namespaces
            .iter_mut()
            .find(|ns| ns.prefix.as_deref() == prefix)
        {
            Some(ns) => ns.uri = uri.to_string(),
            None => element.namespaces.push(Namespace {
                prefix: prefix.map(str::to_string),
                uri: uri.to_string(),
            }),
        }
    }

    /// A prefix of the form `nsN` that is not bound at `id`.
    pub fn unused_prefix(&self, id: NodeId) -> String {
        (0..)
            .map(|n| format!("ns{n}"))
            .find(|candidate| self.lookup_namespace(id, Some(candidate.as_str())).is_none())
            .unwrap_or_default()
    }
}

/// The `encoding` of the XML declaration, if the document starts with one naming an encoding
/// that can be read byte by byte like ASCII.
fn declared_encoding(bytes: &[u8]) -> Option<&'static Encoding> {
    let declaration = bytes.strip_prefix(b"<?xml")?;
    let end = declaration.windows(2).position(|w| w == b"?>")?;
    let declaration = std::str::from_utf8(&declaration[..end]).ok()?;
    let (_, rest) = declaration.split_once("encoding")?;
    let rest = rest.trim_start().strip_prefix('=')?.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let label = rest[1..].split(quote).next()?;
    Encoding::for_label(label.trim().as_bytes()).filter(|encoding| encoding.is_ascii_compatible())
}

fn element_from_xml(node: roxmltree::Node) -> Element {
    let tag = node.tag_name();
    // under xmlns="" roxmltree reports an empty namespace rather than none
    let name = ExpandedName::with_optional_namespace(
        tag.namespace().filter(|ns| !ns.is_empty()),
        tag.name(),
    );
    let attributes = node
        .attributes()
        .map(|a| Attribute {
            name: ExpandedName::with_optional_namespace(
                a.namespace().filter(|ns| !ns.is_empty()),
                a.name(),
            ),
            value: a.value().to_string(),
        })
        .collect();

    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|parent| parent.namespaces().map(|ns| (ns.name(), ns.uri())).collect())
        .unwrap_or_default();
    let mut namespaces: Vec<Namespace> = node
        .namespaces()
        .filter(|ns| ns.name() != Some("xml"))
        .filter(|ns| !inherited.contains(&(ns.name(), ns.uri())))
        .map(|ns| Namespace {
            prefix: ns.name().map(str::to_string),
            uri: ns.uri().to_string(),
        })
        .collect();
    // xmlns="" on a child of an element with a default namespace
    let inherits_default = inherited.iter().any(|(prefix, _)| prefix.is_none());
    if inherits_default && node.namespaces().all(|ns| ns.name().is_some()) {
        namespaces.push(Namespace {
            prefix: None,
            uri: String::new(),
        });
    }

    Element {
        name,
        attributes,
        namespaces,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::XSD_NAMESPACE;

    const HOST: &str = r#"<definitions xmlns="http://schemas.xmlsoap.org/wsdl/" xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <types>
    <xs:schema targetNamespace="urn:host">
      <xs:element name="a" type="xs:string"/>
    </xs:schema>
  </types>
</definitions>"#;

    #[test]
    fn parse_keeps_only_local_declarations() {
        let doc = Document::parse(HOST).unwrap();
        let root = doc.root();
        assert_eq!(doc.element(root).unwrap().namespaces.len(), 2);

        let schema = doc.descendant_elements_named(root, XSD_NAMESPACE, "schema")[0];
        assert!(doc.element(schema).unwrap().namespaces.is_empty());
        assert_eq!(doc.lookup_namespace(schema, Some("xs")), Some(XSD_NAMESPACE));
        assert_eq!(
            doc.lookup_namespace(schema, None),
            Some("http://schemas.xmlsoap.org/wsdl/")
        );
    }

    #[test]
    fn whitespace_text_is_dropped() {
        let doc = Document::parse("<a>\n  <b> hello </b>\n</a>").unwrap();
        let root = doc.root();
        assert_eq!(doc.children(root).len(), 1);
        assert_eq!(doc.text(doc.children(root)[0]), " hello ");
    }

    #[test]
    fn lookup_prefix_prefers_default_and_skips_shadowed() {
        let doc = Document::parse(
            r#"<a xmlns:p="urn:one"><b xmlns:p="urn:two" xmlns="urn:three"><c/></b></a>"#,
        )
        .unwrap();
        let b = doc.children(doc.root())[0];
        let c = doc.children(b)[0];
        assert_eq!(doc.lookup_prefix(c, "urn:two"), Some(Some("p")));
        assert_eq!(doc.lookup_prefix(c, "urn:one"), None);
        assert_eq!(doc.lookup_prefix(c, "urn:three"), Some(None));
        assert_eq!(doc.lookup_prefix(c, XML_NAMESPACE), Some(Some("xml")));
    }

    #[test]
    fn undeclared_default_namespace_is_recorded() {
        let doc = Document::parse(r#"<a xmlns="urn:one"><b xmlns=""/></a>"#).unwrap();
        let b = doc.children(doc.root())[0];
        assert_eq!(doc.lookup_namespace(b, None), None);
        assert_eq!(doc.element(b).unwrap().name, ExpandedName::local("b"));
    }

    #[test]
    fn declared_encoding_is_honoured() {
        let mut bytes = br#"<?xml version="1.0" encoding="ISO-8859-1"?><doc>Gr"#.to_vec();
        bytes.extend_from_slice(&[0xF6, 0xDF]);
        bytes.extend_from_slice(b"e</doc>");
        let doc = Document::from_bytes(&bytes, false).unwrap();
        assert_eq!(doc.text(doc.root()), "Gr\u{f6}\u{df}e");
    }

    #[test]
    fn byte_order_mark_beats_declaration() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(r#"<?xml version="1.0" encoding="ISO-8859-1"?><doc>Größe</doc>"#.as_bytes());
        let doc = Document::from_bytes(&bytes, false).unwrap();
        assert_eq!(doc.text(doc.root()), "Größe");
    }

    #[test]
    fn undeclared_encoding_defaults_to_utf8() {
        assert_eq!(declared_encoding(br#"<?xml version="1.0"?><doc/>"#), None);
        assert_eq!(declared_encoding(b"<doc/>"), None);
        assert_eq!(
            declared_encoding(br#"<?xml version='1.0' encoding = 'windows-1252'?>"#),
            Some(encoding_rs::WINDOWS_1252)
        );
    }

    #[test]
    fn insert_and_replace_keep_ids_valid() {
        let mut doc = Document::parse("<a><b/><c/></a>").unwrap();
        let root = doc.root();
        let b = doc.children(root)[0];
        let c = doc.children(root)[1];

        let comment = doc.create_comment("note");
        doc.insert_before(c, comment);
        assert_eq!(doc.children(root), &[b, comment, c]);

        let d = doc.create_element(Element::new(ExpandedName::local("d")));
        doc.replace(b, d);
        assert_eq!(doc.children(root), &[d, comment, c]);
        assert_eq!(doc.parent(b), None);
        assert_eq!(doc.element(b).unwrap().name, ExpandedName::local("b"));
    }

    #[test]
    fn insert_before_root_is_a_no_op() {
        let mut doc = Document::parse("<a/>").unwrap();
        let comment = doc.create_comment("x");
        doc.insert_before(doc.root(), comment);
        assert_eq!(doc.parent(comment), None);
    }

    #[test]
    fn adopt_before_carries_missing_bindings_only() {
        let mut host = Document::parse(HOST).unwrap();
        let guest = Document::parse(
            r#"<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:g="urn:guest" targetNamespace="urn:guest"><xsd:element name="b"/></xsd:schema>"#,
        )
        .unwrap();
        let schema = host.descendant_elements_named(host.root(), XSD_NAMESPACE, "schema")[0];

        let copy = host.adopt_before(schema, &guest, guest.root());
        let types = host.parent(schema).unwrap();
        assert_eq!(host.children(types), &[copy, schema]);

        let mut prefixes: Vec<Option<String>> = host
            .element(copy)
            .unwrap()
            .namespaces
            .iter()
            .map(|ns| ns.prefix.clone())
            .collect();
        prefixes.sort();
        // the default namespace is undeclared since the guest had none
        assert_eq!(
            prefixes,
            vec![None, Some("g".to_string()), Some("xsd".to_string())]
        );
        assert_eq!(host.lookup_namespace(copy, None), None);
    }
}
