use log::debug;
use url::Url;

use crate::{
    document::{Document, NodeId},
    error::FetchError,
    names::{ExpandedName, WSDL_NAMESPACE, XSD_NAMESPACE},
};

pub const LOCATION_ATTRIBUTES: [&str; 2] = ["location", "schemaLocation"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    WsdlImport,
    SchemaImport,
    SchemaInclude,
}

/// An element that points at another document.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub node: NodeId,
    pub kind: ReferenceKind,
}

impl Reference {
    /// The `location` attribute, or else the `schemaLocation` attribute.
    pub fn location<'d>(&self, document: &'d Document) -> Option<&'d str> {
        let element = document.element(self.node)?;
        LOCATION_ATTRIBUTES
            .iter()
            .filter_map(|name| element.attribute(name))
            .find(|location| !location.is_empty())
    }
}

/// The `schema` elements of a document: the root if it is one, else every one below it.
pub fn schema_elements(document: &Document) -> Vec<NodeId> {
    let root = document.root();
    if document.is_element_named(root, XSD_NAMESPACE, "schema") {
        vec![root]
    } else {
        document.descendant_elements_named(root, XSD_NAMESPACE, "schema")
    }
}

/// Finds the references of a document: the WSDL import directly below the root, then the
/// imports of every schema, then the includes of every schema.
pub fn discover_references(document: &Document) -> Vec<Reference> {
    let root = document.root();
    let mut references = Vec::new();
    if let Some(&import) = document
        .child_elements_named(root, WSDL_NAMESPACE, "import")
        .first()
    {
        references.push(Reference {
            node: import,
            kind: ReferenceKind::WsdlImport,
        });
    }

    let schemas = schema_elements(document);
    for &schema in &schemas {
        references.extend(
            document
                .child_elements_named(schema, XSD_NAMESPACE, "import")
                .into_iter()
                .map(|node| Reference {
                    node,
                    kind: ReferenceKind::SchemaImport,
                }),
        );
    }
    for &schema in &schemas {
        references.extend(
            document
                .child_elements_named(schema, XSD_NAMESPACE, "include")
                .into_iter()
                .map(|node| Reference {
                    node,
                    kind: ReferenceKind::SchemaInclude,
                }),
        );
    }
    references
}

/// Resolves a possibly relative reference against `base_url`.
///
/// Backslashes, literal or percent-encoded, are turned into slashes first, since some exporters
/// write Windows paths into `schemaLocation`.
pub fn normalize_url(raw: &str, base_url: &str) -> Result<String, FetchError> {
    let raw = raw
        .replace('\\', "/")
        .replace("%5c", "/")
        .replace("%5C", "/");
    let base = Url::parse(base_url).map_err(|source| FetchError::InvalidUrl {
        url: base_url.to_string(),
        source,
    })?;
    let url = base.join(&raw).map_err(|source| FetchError::InvalidUrl {
        url: raw.clone(),
        source,
    })?;
    Ok(url.into())
}

/// Rewrites the location attributes of `references` to absolute URLs.
pub fn fix_references(
    document: &mut Document,
    references: &[Reference],
    base_url: &str,
) -> Result<(), FetchError> {
    debug!("Fixing references for {base_url}");
    for reference in references {
        let Some(element) = document.element_mut(reference.node) else {
            continue;
        };
        for name in LOCATION_ATTRIBUTES {
            let Some(url) = element.attribute(name).filter(|url| !url.is_empty()) else {
                continue;
            };
            let new_url = normalize_url(url, base_url)?;
            if url != new_url {
                debug!("{base_url}: {url} -> {new_url}");
                element.set_attribute(ExpandedName::local(name), new_url);
            }
        }
    }
    Ok(())
}

/// Finds the references of a freshly loaded document and makes them absolute.
pub fn resolve_references(document: &mut Document, base_url: &str) -> Result<(), FetchError> {
    let references = discover_references(document);
    fix_references(document, &references, base_url)
}
