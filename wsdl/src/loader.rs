use std::{collections::HashSet, io::Read, path::PathBuf, time::Duration};

use flate2::read::MultiGzDecoder;
use log::{debug, info};
use reqwest::{blocking::Client, header::CONTENT_ENCODING, Identity};
use url::Url;

use crate::{
    clark::{self, Catalog},
    document::Document,
    error::{FetchError, FlattenError},
};

/// What a [`Transport`] hands back for one request.
#[derive(Clone, Debug)]
pub struct Response {
    /// The URL the content was finally retrieved from, after redirects.
    pub url: Url,
    pub content_encoding: Option<String>,
    pub body: Vec<u8>,
}

/// Retrieves raw documents. Implementations block until the retrieval completes.
pub trait Transport {
    fn get(&self, url: &Url) -> Result<Response, FetchError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &Url) -> Result<Response, FetchError> {
        (**self).get(url)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(&self, url: &Url) -> Result<Response, FetchError> {
        (**self).get(url)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransportOptions {
    /// A PEM file holding both the client certificate and its private key.
    pub client_certificate: Option<PathBuf>,
    /// Per request. Without it the HTTP client's default applies.
    pub timeout: Option<Duration>,
}

/// HTTP(S) through a blocking `reqwest` client, `file:` URLs from the local filesystem.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, FlattenError> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(path) = options.client_certificate.as_ref() {
            let pem = std::fs::read(path).map_err(|source| FlattenError::ClientCertificate {
                path: path.clone(),
                source: Box::new(source),
            })?;
            let identity =
                Identity::from_pem(&pem).map_err(|source| FlattenError::ClientCertificate {
                    path: path.clone(),
                    source: Box::new(source),
                })?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(FlattenError::Client)?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url) -> Result<Response, FetchError> {
        if url.scheme() == "file" {
            return read_file(url);
        }
        let http_error = |source: reqwest::Error| FetchError::Http {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url.clone())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(http_error)?;
        let final_url = response.url().clone();
        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(http_error)?.to_vec();
        Ok(Response {
            url: final_url,
            content_encoding,
            body,
        })
    }
}

fn read_file(url: &Url) -> Result<Response, FetchError> {
    let path = url.to_file_path().map_err(|()| FetchError::NotAFilePath {
        url: url.to_string(),
    })?;
    let body = std::fs::read(&path).map_err(|source| FetchError::Io { path, source })?;
    Ok(Response {
        url: url.clone(),
        content_encoding: None,
        body,
    })
}

fn decode_body(response: Response) -> Result<(Url, Vec<u8>), FetchError> {
    let gzipped = response
        .content_encoding
        .as_deref()
        .map(|encoding| encoding.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    if !gzipped {
        return Ok((response.url, response.body));
    }
    let mut body = Vec::new();
    MultiGzDecoder::new(response.body.as_slice())
        .read_to_end(&mut body)
        .map_err(|source| FetchError::Decompress {
            url: response.url.to_string(),
            source,
        })?;
    Ok((response.url, body))
}

#[derive(Debug)]
pub struct LoadedDocument {
    pub document: Document,
    /// Where the document was actually found; relative references resolve against this.
    pub url: String,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(LoadedDocument),
    /// The URL was fetched before during this run; nothing was retrieved.
    AlreadyLoaded,
}

/// Fetches and parses documents, never fetching the same URL twice.
///
/// The set of seen URLs lives as long as the loader, so one loader should serve exactly one run.
pub struct Loader<T: Transport> {
    transport: T,
    seen: HashSet<String>,
    catalog: Option<Catalog>,
    allow_dtd: bool,
}

impl<T: Transport> Loader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            seen: HashSet::new(),
            catalog: None,
            allow_dtd: false,
        }
    }

    /// Qualify the catalogued attributes of every document right after it is parsed.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn allow_dtd(mut self, allow_dtd: bool) -> Self {
        self.allow_dtd = allow_dtd;
        self
    }

    #[cfg(test)]
    pub(crate) fn has_seen(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    /// Loads `url` unless it was loaded before.
    pub fn fetch(&mut self, url: &str) -> Result<LoadOutcome, FlattenError> {
        self.load(url, false)
    }

    /// Loads `url` even if it was loaded before.
    pub fn reload(&mut self, url: &str) -> Result<LoadOutcome, FlattenError> {
        self.load(url, true)
    }

    fn load(&mut self, url: &str, always: bool) -> Result<LoadOutcome, FlattenError> {
        if !always && self.seen.contains(url) {
            debug!("Already loaded {url}");
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        info!("Loading {url}");
        let request_url = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let response = self.transport.get(&request_url)?;
        let (final_url, body) = decode_body(response)?;
        let final_url = String::from(final_url);

        let mut document =
            Document::from_bytes(&body, self.allow_dtd).map_err(|source| FlattenError::Parse {
                url: final_url.clone(),
                source,
            })?;
        self.seen.insert(url.to_string());
        self.seen.insert(final_url.clone());

        if let Some(catalog) = self.catalog.as_ref() {
            clark::qualify(&mut document, catalog)?;
        }
        Ok(LoadOutcome::Loaded(LoadedDocument {
            document,
            url: final_url,
        }))
    }
}
