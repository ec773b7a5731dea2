//! Scheme-dispatched fetching.
//!
//! A fetch returns optional protocol metadata and a body stream. Bodies are
//! never buffered whole; the caller drains the stream into the revision store.
//!
//! - `http`/`https` go through [`HttpFetcher`], which reuses one client
//! - `ftp` goes through [`FtpFetcher`], which reports no metadata
//! - `file` goes through [`FileFetcher`], which reports no metadata either
//! - anything else fails with [`FetchError::UnsupportedScheme`]

mod constants;
mod error;
mod file;
mod ftp;
mod http;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use tracing::instrument;
use url::Url;

pub use constants::{CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT_FETCHES, READ_TIMEOUT_SECS};
pub use error::FetchError;
pub use file::FileFetcher;
pub use ftp::FtpFetcher;
pub use http::{HttpFetcher, HttpSettings};

use crate::revision::RevisionMetadata;

/// A body delivered chunk by chunk.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// A successful fetch.
pub struct FetchResponse {
    /// Protocol metadata; `None` for schemes without any (e.g. `file`).
    pub metadata: Option<RevisionMetadata>,
    /// The body.
    pub body: BodyStream,
}

impl fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchResponse")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Fetches a URL.
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    /// Starts fetching `url` and returns once the response head is available.
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

/// Dispatches on the URL scheme.
#[derive(Debug)]
pub struct ProtocolFetcher {
    http: HttpFetcher,
    ftp: FtpFetcher,
    file: FileFetcher,
}

impl ProtocolFetcher {
    #[must_use]
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            ftp: FtpFetcher::new(settings.connect_timeout),
            http: HttpFetcher::new(settings),
            file: FileFetcher,
        }
    }
}

impl Default for ProtocolFetcher {
    fn default() -> Self {
        Self::new(HttpSettings::default())
    }
}

#[async_trait]
impl Fetcher for ProtocolFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::protocol(url, format!("invalid URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => self.http.fetch(url).await,
            "ftp" => self.ftp.fetch(url).await,
            "file" => self.file.fetch(url).await,
            other => Err(FetchError::unsupported_scheme(url, other)),
        }
    }
}
