//! Immutable fetch outcomes.
//!
//! A revision is either a persisted error or protocol metadata plus an
//! optional body file at `revisions/<id>`. Revisions are never modified after
//! creation; a resource's default revision is its newest one.

mod error;
mod links;
mod store;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use error::RevisionError;
pub use links::REDIRECT_LINK_KIND;

use crate::doc::{guess_content_type, parse_content_type};
use crate::fetch::{BodyStream, FetchError};
use crate::identity::Resource;
use crate::types::RevisionId;

/// A failure stored as a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedError {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl PersistedError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

impl From<&FetchError> for PersistedError {
    fn from(error: &FetchError) -> Self {
        Self::new(error.type_name(), error.to_string())
    }
}

impl From<&RevisionError> for PersistedError {
    fn from(error: &RevisionError) -> Self {
        Self::new(error.type_name(), error.to_string())
    }
}

/// Protocol metadata of a response. Currently always HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    /// 9, 10, 11, 20 or 30.
    pub http_version: u8,
    pub status_code: u16,
    pub reason_phrase: String,
    /// Header name/value pairs in response order.
    pub headers: Vec<(String, String)>,
}

impl RevisionMetadata {
    /// Returns the first value of a header, matching the name case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What to record for a fetch attempt.
pub enum RevisionOutcome {
    /// The fetch failed.
    Error(PersistedError),
    /// The fetch produced a response.
    Response {
        metadata: Option<RevisionMetadata>,
        body: BodyStream,
    },
}

impl fmt::Debug for RevisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(error) => f.debug_tuple("Error").field(error).finish(),
            Self::Response { metadata, .. } => f
                .debug_struct("Response")
                .field("metadata", metadata)
                .finish_non_exhaustive(),
        }
    }
}

/// One stored fetch outcome.
#[derive(Debug, Clone)]
pub struct ResourceRevision {
    pub(crate) id: RevisionId,
    pub(crate) resource: Resource,
    pub(crate) error: Option<PersistedError>,
    pub(crate) metadata: Option<RevisionMetadata>,
    pub(crate) has_body: bool,
    pub(crate) body_path: PathBuf,
}

impl ResourceRevision {
    #[must_use]
    pub fn id(&self) -> RevisionId {
        self.id
    }

    #[must_use]
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    #[must_use]
    pub fn error(&self) -> Option<&PersistedError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&RevisionMetadata> {
        self.metadata.as_ref()
    }

    #[must_use]
    pub fn has_body(&self) -> bool {
        self.has_body
    }

    /// Location of the body file, whether or not it exists.
    #[must_use]
    pub fn body_path(&self) -> &std::path::Path {
        &self.body_path
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    #[must_use]
    pub fn is_http(&self) -> bool {
        self.metadata.is_some()
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.metadata.as_ref().map(|m| m.status_code)
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status_code().is_some_and(|code| code / 100 == 3)
    }

    /// Target of a redirect, from the first `Location` header.
    #[must_use]
    pub fn redirect_url(&self) -> Option<&str> {
        if !self.is_redirect() {
            return None;
        }
        self.metadata.as_ref()?.header("location")
    }

    /// Title of a redirect, e.g. `"301 Moved Permanently"`.
    #[must_use]
    pub fn redirect_title(&self) -> Option<String> {
        let metadata = self.metadata.as_ref().filter(|_| self.is_redirect())?;
        Some(format!("{} {}", metadata.status_code, metadata.reason_phrase))
    }

    /// MIME type from the `Content-Type` header, lower-cased.
    #[must_use]
    pub fn declared_content_type(&self) -> Option<String> {
        let value = self.metadata.as_ref()?.header("content-type")?;
        let (mime, _) = parse_content_type(value);
        (!mime.is_empty()).then_some(mime)
    }

    /// Charset from the `Content-Type` header.
    #[must_use]
    pub fn declared_charset(&self) -> Option<String> {
        let value = self.metadata.as_ref()?.header("content-type")?;
        parse_content_type(value).1
    }

    /// Declared MIME type, else one guessed from the resource URL's extension.
    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.declared_content_type()
            .or_else(|| guess_content_type(&self.resource.url()).map(str::to_owned))
    }

    #[must_use]
    pub fn is_html(&self) -> bool {
        self.content_type().as_deref() == Some("text/html")
    }

    #[must_use]
    pub fn is_css(&self) -> bool {
        self.content_type().as_deref() == Some("text/css")
    }
}
