//! `file:` URL fetcher.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use url::Url;

use super::{FetchError, FetchResponse, Fetcher};

/// Opens local files named by `file:` URLs. Reports no metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

#[async_trait]
impl Fetcher for FileFetcher {
    #[instrument(skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let parsed =
            Url::parse(url).map_err(|e| FetchError::protocol(url, format!("invalid URL: {e}")))?;
        let path = parsed
            .to_file_path()
            .map_err(|()| FetchError::protocol(url, "not a local file path"))?;

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FetchError::connection(url, format!("{}: {e}", path.display())))?;

        let owned_url = url.to_owned();
        let body = ReaderStream::new(file)
            .map(move |chunk| chunk.map_err(|e| FetchError::connection(&owned_url, e.to_string())))
            .boxed();

        Ok(FetchResponse {
            metadata: None,
            body,
        })
    }
}
