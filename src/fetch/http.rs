//! HTTP(S) fetcher.
//!
//! The underlying client (and with it the TLS configuration) is built on first
//! use and shared by every later fetch. Redirects are not followed: a 3xx
//! response is archived as-is and its target is discovered as a link.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use hyper::ext::ReasonPhrase;
use reqwest::{Client, Response, Version};
use tokio::sync::OnceCell;
use tracing::{debug, instrument};

use super::{CONNECT_TIMEOUT_SECS, FetchError, FetchResponse, Fetcher, READ_TIMEOUT_SECS};
use crate::revision::RevisionMetadata;
use crate::user_agent;

/// Client settings for [`HttpFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    /// Whole-request timeout, including the body.
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
        }
    }
}

/// Fetches `http` and `https` URLs.
#[derive(Debug)]
pub struct HttpFetcher {
    settings: HttpSettings,
    client: OnceCell<Client>,
}

impl HttpFetcher {
    #[must_use]
    pub fn new(settings: HttpSettings) -> Self {
        Self {
            settings,
            client: OnceCell::new(),
        }
    }

    async fn client(&self, url: &str) -> Result<&Client, FetchError> {
        self.client
            .get_or_try_init(|| async {
                debug!("building HTTP client");
                Client::builder()
                    .connect_timeout(self.settings.connect_timeout)
                    .timeout(self.settings.read_timeout)
                    .redirect(reqwest::redirect::Policy::none())
                    .gzip(true)
                    .user_agent(self.settings.user_agent.as_str())
                    .build()
                    .map_err(|e| FetchError::from_reqwest(url, &e))
            })
            .await
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let client = self.client(url).await?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, &e))?;

        let metadata = response_metadata(&response);
        debug!(
            status = metadata.status_code,
            headers = metadata.headers.len(),
            "response received"
        );

        let owned_url = url.to_owned();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| FetchError::from_reqwest(&owned_url, &e)))
            .boxed();

        Ok(FetchResponse {
            metadata: Some(metadata),
            body,
        })
    }
}

fn response_metadata(response: &Response) -> RevisionMetadata {
    let status = response.status();
    RevisionMetadata {
        http_version: http_version_number(response.version()),
        status_code: status.as_u16(),
        reason_phrase: reason_phrase(response),
        headers: response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
    }
}

/// The reason phrase the server sent.
///
/// hyper only records the phrase when it differs from the canonical one for
/// the status code, so the canonical phrase fills in otherwise.
fn reason_phrase(response: &Response) -> String {
    match response.extensions().get::<ReasonPhrase>() {
        Some(reason) => String::from_utf8_lossy(reason.as_bytes()).into_owned(),
        None => response
            .status()
            .canonical_reason()
            .unwrap_or_default()
            .to_owned(),
    }
}

/// Encodes an HTTP version the way it is persisted: 9, 10, 11, 20 or 30.
fn http_version_number(version: Version) -> u8 {
    match version {
        Version::HTTP_09 => 9,
        Version::HTTP_10 => 10,
        Version::HTTP_2 => 20,
        Version::HTTP_3 => 30,
        _ => 11,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_captures_metadata_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/plain")
                    .set_body_string("hello"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpSettings::default());
        let response = fetcher.fetch(&format!("{}/page", server.uri())).await.unwrap();

        let metadata = response.metadata.unwrap();
        assert_eq!(metadata.status_code, 200);
        assert_eq!(metadata.reason_phrase, "OK");
        assert_eq!(metadata.http_version, 11);
        assert!(
            metadata
                .headers
                .iter()
                .any(|(k, v)| k == "content-type" && v == "text/plain")
        );

        let chunks: Vec<bytes::Bytes> = response.body.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"hello");
    }

    #[tokio::test]
    async fn test_fetch_does_not_follow_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", "/new"),
            )
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpSettings::default());
        let response = fetcher.fetch(&format!("{}/old", server.uri())).await.unwrap();

        assert_eq!(response.metadata.unwrap().status_code, 301);
    }

    #[tokio::test]
    async fn test_fetch_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(wiremock::matchers::header("user-agent", "test-agent/1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(HttpSettings {
            user_agent: "test-agent/1".into(),
            ..HttpSettings::default()
        });
        fetcher.fetch(&server.uri()).await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_failure() {
        let fetcher = HttpFetcher::new(HttpSettings {
            connect_timeout: Duration::from_secs(2),
            ..HttpSettings::default()
        });
        let err = fetcher.fetch("http://127.0.0.1:1/").await.unwrap_err();
        assert_eq!(err.type_name(), "ConnectionFailure");
    }

    #[tokio::test]
    async fn test_tls_words_in_url_do_not_make_a_tls_error() {
        let fetcher = HttpFetcher::new(HttpSettings {
            connect_timeout: Duration::from_secs(2),
            ..HttpSettings::default()
        });
        let err = fetcher
            .fetch("http://127.0.0.1:1/ssl/tls-certificate-handshake")
            .await
            .unwrap_err();
        assert_eq!(err.type_name(), "ConnectionFailure");
    }

    #[tokio::test]
    async fn test_custom_reason_phrase_is_kept() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 Everything Fine\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let fetcher = HttpFetcher::new(HttpSettings::default());
        let response = fetcher.fetch(&format!("http://{addr}/")).await.unwrap();

        let metadata = response.metadata.unwrap();
        assert_eq!(metadata.status_code, 200);
        assert_eq!(metadata.reason_phrase, "Everything Fine");
    }
}
