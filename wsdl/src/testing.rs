use std::{cell::RefCell, collections::HashMap, path::PathBuf};

use url::Url;

use crate::{
    document::{Document, NodeKind},
    error::FetchError,
    loader::{Response, Transport},
};

/// Serves documents from memory and records every request.
#[derive(Default)]
pub(crate) struct MemoryTransport {
    documents: HashMap<String, Response>,
    requests: RefCell<Vec<String>>,
}

impl MemoryTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn serve(self, url: &str, body: &str) -> Self {
        self.serve_response(url, url, None, body.as_bytes().to_vec())
    }

    pub(crate) fn redirect(self, url: &str, final_url: &str, body: &str) -> Self {
        self.serve_response(url, final_url, None, body.as_bytes().to_vec())
    }

    pub(crate) fn serve_response(
        mut self,
        url: &str,
        final_url: &str,
        content_encoding: Option<&str>,
        body: Vec<u8>,
    ) -> Self {
        self.documents.insert(
            url.to_string(),
            Response {
                url: Url::parse(final_url).unwrap(),
                content_encoding: content_encoding.map(str::to_string),
                body,
            },
        );
        self
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub(crate) fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|r| *r == url).count()
    }
}

impl Transport for MemoryTransport {
    fn get(&self, url: &Url) -> Result<Response, FetchError> {
        self.requests.borrow_mut().push(url.to_string());
        self.documents
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| FetchError::Io {
                path: PathBuf::from(url.path()),
                source: std::io::ErrorKind::NotFound.into(),
            })
    }
}

/// The text of every comment in the document, in document order.
pub(crate) fn comments(document: &Document) -> Vec<String> {
    document
        .descendants(document.root())
        .into_iter()
        .filter_map(|node| match document.kind(node) {
            NodeKind::Comment(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

/// The `name` attributes of every element in the document, in document order.
pub(crate) fn element_names(document: &Document) -> Vec<String> {
    document
        .descendants(document.root())
        .into_iter()
        .filter_map(|node| document.element(node)?.attribute("name"))
        .map(str::to_string)
        .collect()
}
