//! Error types for the fetch layer.
//!
//! Every fetch failure is one of four kinds. The kind name is persisted as the
//! `type` of an error revision, so the names are part of the project format.

use std::error::Error as StdError;

use thiserror::Error;

/// Errors that can occur while fetching a URL.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// No fetcher handles the URL's scheme.
    #[error("unsupported URL scheme {scheme:?} in {url}")]
    UnsupportedScheme {
        /// The URL that was requested.
        url: String,
        /// Its scheme.
        scheme: String,
    },

    /// Could not connect, or the connection timed out or dropped.
    #[error("connection failure fetching {url}: {message}")]
    ConnectionFailure {
        /// The URL that was requested.
        url: String,
        /// Details from the underlying library.
        message: String,
    },

    /// The server or resource violated the protocol, or the request was malformed.
    #[error("protocol error fetching {url}: {message}")]
    ProtocolError {
        /// The URL that was requested.
        url: String,
        /// Details from the underlying library.
        message: String,
    },

    /// TLS handshake or certificate verification failed.
    #[error("TLS error fetching {url}: {message}")]
    TlsError {
        /// The URL that was requested.
        url: String,
        /// Details from the underlying library.
        message: String,
    },
}

impl FetchError {
    /// Creates an unsupported-scheme error.
    pub fn unsupported_scheme(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            url: url.into(),
            scheme: scheme.into(),
        }
    }

    /// Creates a connection failure.
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailure {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolError {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Classifies a reqwest error.
    ///
    /// TLS problems are recognised by finding a `rustls` error in the source
    /// chain, since reqwest reports them as generic connect errors.
    #[must_use]
    pub fn from_reqwest(url: &str, error: &reqwest::Error) -> Self {
        let message = error_chain_message(error);

        if has_tls_cause(error) {
            Self::TlsError {
                url: url.to_owned(),
                message,
            }
        } else if error.is_connect() || error.is_timeout() {
            Self::connection(url, message)
        } else if error.is_body() || error.is_decode() {
            // A body that stops mid-stream is a dropped connection.
            Self::connection(url, message)
        } else {
            Self::protocol(url, message)
        }
    }

    /// Persisted type tag for this error.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::UnsupportedScheme { .. } => "UnsupportedScheme",
            Self::ConnectionFailure { .. } => "ConnectionFailure",
            Self::ProtocolError { .. } => "ProtocolError",
            Self::TlsError { .. } => "TLSError",
        }
    }

    /// Returns the URL that failed.
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::UnsupportedScheme { url, .. }
            | Self::ConnectionFailure { url, .. }
            | Self::ProtocolError { url, .. }
            | Self::TlsError { url, .. } => url,
        }
    }
}

/// Walks the source chain looking for a TLS library error.
///
/// `std::io::Error` hides the error it wraps from `source()`, so wrapped
/// errors are inspected through `get_ref()`.
fn has_tls_cause(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(cause) = current {
        if cause.is::<rustls::Error>() {
            return true;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(inner) = io.get_ref() {
                if inner.is::<rustls::Error>() {
                    return true;
                }
            }
        }
        current = cause.source();
    }
    false
}

fn error_chain_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
