use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Retrieval failures. All of them abort the run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{url} does not name a local file")]
    NotAFilePath { url: String },
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request for {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to decompress the response from {url}")]
    Decompress {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal errors of a flattening run.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("failed to parse {url}")]
    Parse {
        url: String,
        #[source]
        source: roxmltree::Error,
    },
    #[error("cannot qualify {token:?} in attribute {attribute} of <{element}>: no default namespace is in scope")]
    AmbiguousNamespace {
        element: String,
        attribute: String,
        token: String,
    },
    #[error("cannot qualify {token:?} in attribute {attribute} of <{element}>: prefix {prefix:?} is not bound")]
    UnboundPrefix {
        element: String,
        attribute: String,
        token: String,
        prefix: String,
    },
    #[error("{url} was already loaded by this loader")]
    RootAlreadyLoaded { url: String },
    #[error("failed to load client certificate {}", path.display())]
    ClientCertificate {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to set up the HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("failed to write the document: {0}")]
    Serialize(String),
}

/// Conditions that do not stop a run. They end up as comments in the output tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// An `include` without any location attribute.
    MissingLocation,
    /// A reference to a document that was already inlined earlier in the run.
    DuplicateReference { url: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLocation => write!(f, "found an include tag without a location"),
            Self::DuplicateReference { url } => write!(f, "include was already loaded from {url}"),
        }
    }
}
