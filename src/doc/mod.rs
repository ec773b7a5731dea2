//! Documents and links found in archived content.
//!
//! Link extraction is a pluggable capability ([`LinkExtractor`]). The default
//! [`HtmlLinkExtractor`] parses HTML for `src`/`href` attributes and scans CSS
//! for `url(...)` references and `@import` rules.

mod extractor;
mod mime;
mod urls;

use std::fmt;

pub use extractor::HtmlLinkExtractor;
pub use mime::{guess_content_type, parse_content_type};
pub use urls::{is_unrewritable_url, resolve_link};

/// Document types that can contain links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
}

/// A reference from one document to another URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Target as written in the document; resolve against the document URL.
    pub relative_url: String,
    pub title: Option<String>,
    /// Human-readable kind, e.g. `"Image"` or `"Redirect"`.
    pub kind: String,
    /// Whether the target is needed to render the document (image, stylesheet, ...).
    pub embedded: bool,
}

impl Link {
    pub fn new(
        relative_url: impl Into<String>,
        title: Option<String>,
        kind: impl Into<String>,
        embedded: bool,
    ) -> Self {
        Self {
            relative_url: relative_url.into(),
            title,
            kind: kind.into(),
            embedded,
        }
    }
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub kind: ContentKind,
    /// Decoded text of the body.
    pub text: String,
}

/// Parses a body and lists its links.
pub trait LinkExtractor: Send + Sync + fmt::Debug {
    fn extract(
        &self,
        body: &[u8],
        declared_charset: Option<&str>,
        kind: ContentKind,
    ) -> (Option<Document>, Vec<Link>);
}
