//! Pulls imported and included schemas into the document that references them.
//!
//! Every step rescans the schemas from the top and performs at most one edit, so no scan ever
//! runs over a tree that changed under it. Documents are small enough for that to be cheap.
//!
//! The first occurrence of a URL is the one that gets inlined. Later references to the same URL
//! are dropped, which also ends cycles of includes.

use log::{debug, info, warn};

use crate::{
    document::{Document, NodeId},
    error::{Diagnostic, FlattenError},
    loader::{LoadOutcome, LoadedDocument, Loader, Transport},
    names::XSD_NAMESPACE,
    references::{resolve_references, Reference, ReferenceKind},
};

/// The result of a single [`inline_next`] step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// A reference element was changed or removed.
    pub modified: bool,
    /// A new document was retrieved and spliced in.
    pub fetched: bool,
}

impl StepOutcome {
    pub const UNCHANGED: Self = Self {
        modified: false,
        fetched: false,
    };
    pub const MODIFIED: Self = Self {
        modified: true,
        fetched: false,
    };
    pub const FETCHED: Self = Self {
        modified: true,
        fetched: true,
    };
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineReport {
    /// Import and include elements that were changed.
    pub modified: usize,
    /// Documents that were spliced in.
    pub imported: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// The schemas the engine works on: every `schema` element below the root.
fn schemas(document: &Document) -> Vec<NodeId> {
    document.descendant_elements_named(document.root(), XSD_NAMESPACE, "schema")
}

/// Imports or includes the next schema, if any reference is left.
///
/// Imports are handled before includes. An imported schema is inserted before the schema that
/// imports it, since consumers expect dependencies first. The content of an included schema
/// replaces the include element, which is kept as a comment.
pub fn inline_next<T: Transport>(
    loader: &mut Loader<T>,
    document: &mut Document,
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<StepOutcome, FlattenError> {
    let schemas = schemas(document);
    if let Some(outcome) = import_next(loader, document, &schemas)? {
        return Ok(outcome);
    }
    if let Some(outcome) = include_next(loader, document, &schemas, diagnostics)? {
        return Ok(outcome);
    }
    Ok(StepOutcome::UNCHANGED)
}

fn import_next<T: Transport>(
    loader: &mut Loader<T>,
    document: &mut Document,
    schemas: &[NodeId],
) -> Result<Option<StepOutcome>, FlattenError> {
    for &schema in schemas {
        for import in document.child_elements_named(schema, XSD_NAMESPACE, "import") {
            let Some(location) = document
                .element_mut(import)
                .and_then(|element| element.remove_attribute("schemaLocation"))
            else {
                continue;
            };
            let LoadedDocument {
                document: mut imported,
                url,
            } = match loader.fetch(&location)? {
                LoadOutcome::Loaded(loaded) => loaded,
                LoadOutcome::AlreadyLoaded => {
                    debug!("{location} is already part of the document");
                    return Ok(Some(StepOutcome::MODIFIED));
                }
            };
            resolve_references(&mut imported, &url)?;
            document.adopt_before(schema, &imported, imported.root());
            return Ok(Some(StepOutcome::FETCHED));
        }
    }
    Ok(None)
}

fn include_next<T: Transport>(
    loader: &mut Loader<T>,
    document: &mut Document,
    schemas: &[NodeId],
    diagnostics: &mut Vec<Diagnostic>,
) -> Result<Option<StepOutcome>, FlattenError> {
    let Some(include) = schemas.iter().find_map(|&schema| {
        document
            .child_elements_named(schema, XSD_NAMESPACE, "include")
            .first()
            .copied()
    }) else {
        return Ok(None);
    };

    let reference = Reference {
        node: include,
        kind: ReferenceKind::SchemaInclude,
    };
    let Some(location) = reference.location(document).map(str::to_string) else {
        warn!("found an include tag without a location");
        mark(document, include, Diagnostic::MissingLocation, diagnostics);
        return Ok(Some(StepOutcome::MODIFIED));
    };

    let LoadedDocument {
        document: mut included,
        url,
    } = match loader.fetch(&location)? {
        LoadOutcome::Loaded(loaded) => loaded,
        LoadOutcome::AlreadyLoaded => {
            info!("{location} was already included, dropping the include");
            let diagnostic = Diagnostic::DuplicateReference { url: location };
            mark(document, include, diagnostic, diagnostics);
            return Ok(Some(StepOutcome::MODIFIED));
        }
    };
    resolve_references(&mut included, &url)?;
    for &child in included.children(included.root()) {
        document.adopt_before(include, &included, child);
    }
    let snippet = document.element_snippet(include);
    let marker = document.create_comment(format!("inlined {snippet}"));
    document.replace(include, marker);
    Ok(Some(StepOutcome::FETCHED))
}

/// Replaces `node` with a comment recording why it was dropped.
fn mark(
    document: &mut Document,
    node: NodeId,
    diagnostic: Diagnostic,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let text = format!("{diagnostic}: {}", document.element_snippet(node));
    let marker = document.create_comment(text);
    document.replace(node, marker);
    diagnostics.push(diagnostic);
}

/// Runs [`inline_next`] until nothing is left to do.
pub fn inline_references<T: Transport>(
    loader: &mut Loader<T>,
    document: &mut Document,
    url: &str,
) -> Result<InlineReport, FlattenError> {
    let mut report = InlineReport::default();
    loop {
        let outcome = inline_next(loader, document, &mut report.diagnostics)?;
        if outcome.modified {
            report.modified += 1;
        }
        if outcome.fetched {
            report.imported += 1;
        }
        if outcome == StepOutcome::UNCHANGED {
            break;
        }
    }
    info!(
        "{url}: imported {} XSD files, modified {} XSD import/include tags",
        report.imported, report.modified
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{comments, element_names, MemoryTransport};

    fn wsdl(schema_body: &str) -> String {
        format!(
            r#"<wsdl:definitions xmlns:wsdl="http://schemas.xmlsoap.org/wsdl/" xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <wsdl:types>
    <xs:schema targetNamespace="urn:root">{schema_body}<xs:element name="Root"/></xs:schema>
  </wsdl:types>
  <wsdl:message name="RootMessage"/>
</wsdl:definitions>"#
        )
    }

    fn xsd(body: &str) -> String {
        format!(
            r#"<xsd:schema xmlns:xsd="http://www.w3.org/2001/XMLSchema" targetNamespace="urn:a">{body}</xsd:schema>"#
        )
    }

    fn load_root<T: Transport>(loader: &mut Loader<T>, url: &str) -> Document {
        let LoadOutcome::Loaded(mut loaded) = loader.fetch(url).unwrap() else {
            panic!("root was already loaded");
        };
        resolve_references(&mut loaded.document, &loaded.url).unwrap();
        loaded.document
    }

    fn location_attributes(document: &Document) -> usize {
        document
            .descendants(document.root())
            .into_iter()
            .filter_map(|node| document.element(node))
            .filter(|e| e.attribute("schemaLocation").is_some() || e.attribute("location").is_some())
            .count()
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let transport = MemoryTransport::new()
            .serve(
                "http://host/svc/root.wsdl",
                &wsdl(r#"<xs:import namespace="urn:a" schemaLocation="xsd/a.xsd"/>"#),
            )
            .serve(
                "http://host/svc/xsd/a.xsd",
                &xsd(r#"<xsd:include schemaLocation="b.xsd"/><xsd:element name="A"/>"#),
            )
            .serve(
                "http://host/svc/xsd/b.xsd",
                &xsd(r#"<xsd:element name="B"/>"#),
            );
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/svc/root.wsdl");

        let report = inline_references(&mut loader, &mut doc, "http://host/svc/root.wsdl").unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.modified, 2);
        assert!(report.diagnostics.is_empty());
        assert_eq!(element_names(&doc), vec!["B", "A", "Root", "RootMessage"]);
        assert_eq!(location_attributes(&doc), 0);
        assert_eq!(
            comments(&doc),
            vec![r#"inlined <xsd:include schemaLocation="http://host/svc/xsd/b.xsd"/>"#]
        );
    }

    #[test]
    fn diamond_dependency_is_fetched_once() {
        let transport = MemoryTransport::new()
            .serve(
                "http://host/root.wsdl",
                &wsdl(
                    r#"<xs:import namespace="urn:a" schemaLocation="a.xsd"/><xs:import namespace="urn:b" schemaLocation="b.xsd"/>"#,
                ),
            )
            .serve(
                "http://host/a.xsd",
                &xsd(r#"<xsd:include schemaLocation="c.xsd"/><xsd:element name="A"/>"#),
            )
            .serve(
                "http://host/b.xsd",
                &xsd(r#"<xsd:include schemaLocation="c.xsd"/><xsd:element name="B"/>"#),
            )
            .serve("http://host/c.xsd", &xsd(r#"<xsd:element name="C"/>"#));
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");

        let report = inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap();
        assert_eq!(transport.request_count("http://host/c.xsd"), 1);
        assert_eq!(element_names(&doc), vec!["C", "A", "B", "Root", "RootMessage"]);
        assert_eq!(report.imported, 3);
        assert_eq!(
            report.diagnostics,
            vec![Diagnostic::DuplicateReference {
                url: "http://host/c.xsd".to_string()
            }]
        );
    }

    #[test]
    fn include_cycles_terminate() {
        let transport = MemoryTransport::new()
            .serve(
                "http://host/root.wsdl",
                &wsdl(r#"<xs:include schemaLocation="x.xsd"/>"#),
            )
            .serve(
                "http://host/x.xsd",
                &xsd(r#"<xsd:include schemaLocation="y.xsd"/><xsd:element name="X"/>"#),
            )
            .serve(
                "http://host/y.xsd",
                &xsd(r#"<xsd:include schemaLocation="x.xsd"/><xsd:element name="Y"/>"#),
            );
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");

        let report = inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.modified, 3);
        assert_eq!(element_names(&doc), vec!["Y", "X", "Root", "RootMessage"]);
        assert_eq!(transport.requests().len(), 3);
        let markers = comments(&doc);
        assert_eq!(markers.len(), 3);
        assert!(markers[0].starts_with("include was already loaded from http://host/x.xsd: "));
    }

    #[test]
    fn including_the_root_again_is_a_duplicate() {
        let transport = MemoryTransport::new().serve(
            "http://host/root.wsdl",
            &wsdl(r#"<xs:include schemaLocation="root.wsdl"/>"#),
        );
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");

        let report = inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap();
        assert_eq!(report.modified, 1);
        assert_eq!(report.imported, 0);
        assert_eq!(transport.requests().len(), 1);
    }

    #[test]
    fn include_without_location_is_marked() {
        let transport = MemoryTransport::new().serve(
            "http://host/root.wsdl",
            &wsdl(r#"<xs:include/>"#),
        );
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");

        let report = inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap();
        assert_eq!(report.diagnostics, vec![Diagnostic::MissingLocation]);
        assert_eq!(
            comments(&doc),
            vec!["found an include tag without a location: <xs:include/>"]
        );
    }

    #[test]
    fn repeated_import_is_stripped_without_fetching() {
        let transport = MemoryTransport::new()
            .serve(
                "http://host/root.wsdl",
                &wsdl(
                    r#"<xs:import namespace="urn:a" schemaLocation="a.xsd"/><xs:import namespace="urn:a" schemaLocation="a.xsd"/>"#,
                ),
            )
            .serve("http://host/a.xsd", &xsd(r#"<xsd:element name="A"/>"#));
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");

        let mut diagnostics = Vec::new();
        assert_eq!(
            inline_next(&mut loader, &mut doc, &mut diagnostics).unwrap(),
            StepOutcome::FETCHED
        );
        assert_eq!(
            inline_next(&mut loader, &mut doc, &mut diagnostics).unwrap(),
            StepOutcome::MODIFIED
        );
        assert_eq!(
            inline_next(&mut loader, &mut doc, &mut diagnostics).unwrap(),
            StepOutcome::UNCHANGED
        );
        assert!(diagnostics.is_empty());
        assert_eq!(
            doc.descendant_elements_named(doc.root(), XSD_NAMESPACE, "import")
                .len(),
            2
        );
        assert_eq!(location_attributes(&doc), 0);
    }

    #[test]
    fn inlined_document_needs_no_further_steps() {
        let transport = MemoryTransport::new()
            .serve(
                "http://host/root.wsdl",
                &wsdl(r#"<xs:import namespace="urn:a" schemaLocation="a.xsd"/>"#),
            )
            .serve(
                "http://host/a.xsd",
                &xsd(r#"<xsd:include schemaLocation="b.xsd"/>"#),
            )
            .serve("http://host/b.xsd", &xsd(r#"<xsd:element name="B"/>"#));
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");
        inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap();

        let mut fresh = Loader::new(&transport);
        let report = inline_references(&mut fresh, &mut doc, "http://host/root.wsdl").unwrap();
        assert_eq!(report, InlineReport::default());
    }

    #[test]
    fn fetch_errors_abort_the_run() {
        let transport = MemoryTransport::new().serve(
            "http://host/root.wsdl",
            &wsdl(r#"<xs:import namespace="urn:a" schemaLocation="missing.xsd"/>"#),
        );
        let mut loader = Loader::new(&transport);
        let mut doc = load_root(&mut loader, "http://host/root.wsdl");
        let err = inline_references(&mut loader, &mut doc, "http://host/root.wsdl").unwrap_err();
        assert!(matches!(err, FlattenError::Fetch(_)));
    }
}
