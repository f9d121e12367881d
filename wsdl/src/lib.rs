//! Reduces a Web Services Description and every schema it imports or includes to one document.

pub mod clark;
pub mod compat;
pub mod document;
pub mod error;
pub mod inline;
pub mod loader;
pub mod names;
pub mod references;

mod serialize;
#[cfg(test)]
mod testing;

use log::info;

pub use clark::{Catalog, DEFAULT_CATALOG};
pub use document::{Document, NodeId};
pub use error::{Diagnostic, FetchError, FlattenError};
pub use inline::InlineReport;
pub use loader::{HttpTransport, LoadOutcome, Loader, Transport, TransportOptions};

/// How QName-valued attributes are written in the result.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NamespaceNotation {
    /// `xs:string`, using the prefixes declared in the result.
    #[default]
    Prefixed,
    /// `{http://www.w3.org/2001/XMLSchema}string`
    Clark,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Compatibility {
    #[default]
    AsIs,
    /// Apply [`compat::ZEEP_PATCHES`].
    Zeep,
}

#[derive(Clone, Debug)]
pub struct FlattenOptions {
    pub notation: NamespaceNotation,
    pub compatibility: Compatibility,
    pub allow_dtd: bool,
    pub catalog: Catalog,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            notation: NamespaceNotation::default(),
            compatibility: Compatibility::default(),
            allow_dtd: false,
            catalog: DEFAULT_CATALOG.clone(),
        }
    }
}

#[derive(Debug)]
pub struct Flattened {
    pub document: Document,
    /// Where the root document was found.
    pub url: String,
    pub report: InlineReport,
}

/// Loads the document at `url` and inlines everything it references.
pub fn flatten<T: Transport>(
    transport: T,
    url: &str,
    options: &FlattenOptions,
) -> Result<Flattened, FlattenError> {
    let mut loader = Loader::new(transport)
        .with_catalog(options.catalog.clone())
        .allow_dtd(options.allow_dtd);
    let loaded = match loader.fetch(url)? {
        LoadOutcome::Loaded(loaded) => loaded,
        LoadOutcome::AlreadyLoaded => {
            return Err(FlattenError::RootAlreadyLoaded {
                url: url.to_string(),
            })
        }
    };
    let mut document = loaded.document;
    references::resolve_references(&mut document, &loaded.url)?;
    let report = inline::inline_references(&mut loader, &mut document, &loaded.url)?;

    if options.compatibility == Compatibility::Zeep {
        let changed = compat::apply_patches(&mut document, &compat::ZEEP_PATCHES);
        info!("Made {changed} elements compatible with zeep");
    }
    if options.notation == NamespaceNotation::Prefixed {
        clark::unqualify(&mut document, &options.catalog);
    }
    Ok(Flattened {
        document,
        url: loaded.url,
        report,
    })
}
