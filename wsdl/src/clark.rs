//! Conversion of QName-valued attributes between prefixed form and Clark notation.
//!
//! Element names keep their namespace when a subtree moves between documents, but a value like
//! `type="xs:string"` only means something relative to the prefixes declared around it. Before
//! documents with different prefix conventions are merged, such values are rewritten to Clark
//! notation (`{http://www.w3.org/2001/XMLSchema}string`), and after merging they are rewritten back.

use lazy_static::lazy_static;

use crate::{
    document::{Document, NodeId},
    error::FlattenError,
    names::{split_clark, ExpandedName, NIEM_APPINFO_NAMESPACE},
};

/// Which attributes of which elements hold QNames (or space separated lists of QNames).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<(ExpandedName, Vec<ExpandedName>)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, element: ExpandedName, attributes: &[ExpandedName]) -> Self {
        match self.entries.iter_mut().find(|(name, _)| *name == element) {
            Some((_, existing)) => existing.extend_from_slice(attributes),
            None => self.entries.push((element, attributes.to_vec())),
        }
        self
    }

    pub fn attributes_for(&self, element: &ExpandedName) -> Option<&[ExpandedName]> {
        self.entries
            .iter()
            .find(|(name, _)| name == element)
            .map(|(_, attributes)| attributes.as_slice())
    }
}

lazy_static! {
    /// The QName-valued attributes of XML Schema and WSDL 1.1.
    pub static ref DEFAULT_CATALOG: Catalog = {
        let local = ExpandedName::local;
        Catalog::new()
            .with(ExpandedName::xsd("attribute"), &[local("type"), local("ref")])
            .with(ExpandedName::xsd("attributeGroup"), &[local("ref")])
            .with(
                ExpandedName::xsd("element"),
                &[
                    local("type"),
                    local("substitutionGroup"),
                    local("ref"),
                    ExpandedName::with_namespace(NIEM_APPINFO_NAMESPACE, "appliesToTypes"),
                ],
            )
            .with(ExpandedName::xsd("extension"), &[local("base")])
            .with(ExpandedName::xsd("restriction"), &[local("base")])
            .with(ExpandedName::wsdl("part"), &[local("element")])
            .with(ExpandedName::wsdl("input"), &[local("message")])
            .with(ExpandedName::wsdl("output"), &[local("message")])
            .with(ExpandedName::wsdl("binding"), &[local("type")])
    };
}

/// Elements in the subtree of the root that have catalogued attributes, with those attributes.
fn catalogued_attributes(
    document: &Document,
    catalog: &Catalog,
) -> Vec<(NodeId, ExpandedName, String)> {
    let mut found = Vec::new();
    for node in document.descendants(document.root()) {
        let Some(element) = document.element(node) else {
            continue;
        };
        let Some(names) = catalog.attributes_for(&element.name) else {
            continue;
        };
        for name in names {
            if let Some(value) = element.attribute_by_name(name) {
                found.push((node, name.clone(), value.to_string()));
            }
        }
    }
    found
}

/// Rewrites every catalogued attribute value to Clark notation. Returns the number of values
/// visited.
pub fn qualify(document: &mut Document, catalog: &Catalog) -> Result<usize, FlattenError> {
    let found = catalogued_attributes(document, catalog);
    let count = found.len();
    for (node, attribute, value) in found {
        let qualified = value
            .split(' ')
            .filter(|token| !token.is_empty())
            .map(|token| qualify_token(document, node, &attribute, token))
            .collect::<Result<Vec<_>, _>>()?
            .join(" ");
        if let Some(element) = document.element_mut(node) {
            element.set_attribute(attribute, qualified);
        }
    }
    Ok(count)
}

fn qualify_token(
    document: &Document,
    node: NodeId,
    attribute: &ExpandedName,
    token: &str,
) -> Result<String, FlattenError> {
    if split_clark(token).is_some() {
        return Ok(token.to_string());
    }
    let element_name = || {
        document
            .element(node)
            .map(|e| e.name.to_string())
            .unwrap_or_default()
    };
    if let Some((prefix, local_name)) = token.split_once(':') {
        let namespace = document
            .lookup_namespace(node, Some(prefix))
            .ok_or_else(|| FlattenError::UnboundPrefix {
                element: element_name(),
                attribute: attribute.to_string(),
                token: token.to_string(),
                prefix: prefix.to_string(),
            })?;
        Ok(format!("{{{namespace}}}{local_name}"))
    } else if let Some(namespace) = document.lookup_namespace(node, None) {
        Ok(format!("{{{namespace}}}{token}"))
    } else {
        Err(FlattenError::AmbiguousNamespace {
            element: element_name(),
            attribute: attribute.to_string(),
            token: token.to_string(),
        })
    }
}

/// Rewrites catalogued Clark notation values back to prefixed names, using the prefixes in scope
/// at each element. A namespace without any binding gets a new prefix declared on the element.
/// Returns the number of values visited.
pub fn unqualify(document: &mut Document, catalog: &Catalog) -> usize {
    let found = catalogued_attributes(document, catalog);
    let count = found.len();
    for (node, attribute, value) in found {
        let tokens: Vec<String> = value
            .split(' ')
            .filter(|token| !token.is_empty())
            .map(|token| unqualify_token(document, node, token))
            .collect();
        if let Some(element) = document.element_mut(node) {
            element.set_attribute(attribute, tokens.join(" "));
        }
    }
    count
}

fn unqualify_token(document: &mut Document, node: NodeId, token: &str) -> String {
    let Some((namespace, local_name)) = split_clark(token) else {
        return token.to_string();
    };
    match document.lookup_prefix(node, namespace) {
        Some(None) => local_name.to_string(),
        Some(Some(prefix)) => format!("{prefix}:{local_name}"),
        None => {
            let prefix = document.unused_prefix(node);
            document.declare_namespace(node, Some(&prefix), namespace);
            format!("{prefix}:{local_name}")
        }
    }
}
