//! Shared HTTP client for provider adapters.
//!
//! One [`HttpFetcher`] is built per process and cloned into every adapter so
//! connections are pooled. Every request runs under an individual timeout and
//! bodies are buffered with a size cap.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::error::DownloadError;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default end-to-end timeout for one request, body included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest body accepted from a provider (256 MiB).
pub const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

const PROJECT_UA_URL: &str = "https://github.com/fierce/fulltext";

/// User-Agent sent to providers (identifies the tool and its version).
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fulltext/{version} (scientific-literature-cache; +{PROJECT_UA_URL})")
}

/// Timeouts and identity for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_body_bytes: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: default_user_agent(),
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

/// A fully buffered response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    /// URL after redirects.
    pub final_url: String,
}

/// Pooled HTTP client with per-request timeouts.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    request_timeout: Duration,
    max_body_bytes: u64,
}

impl HttpFetcher {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error if the TLS backend or
    /// system configuration cannot be initialised.
    pub fn new(options: &HttpOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.clone())
            .gzip(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self {
            client,
            request_timeout: options.request_timeout,
            max_body_bytes: options.max_body_bytes,
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// GETs `url` and buffers the body.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::InvalidUrl`] for unparseable URLs
    /// - [`DownloadError::Timeout`] when the request timeout elapses
    /// - [`DownloadError::HttpStatus`] for non-2xx responses (with `Retry-After`)
    /// - [`DownloadError::Network`] for transport failures
    /// - [`DownloadError::InvalidResponse`] when the body exceeds the size cap
    #[instrument(skip(self), fields(url = %url))]
    pub async fn get_bytes(&self, url: &str) -> Result<FetchedBody, DownloadError> {
        let response = self.send(url).await?;
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let read = async {
            let mut stream = response.bytes_stream();
            let mut bytes = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| map_reqwest_error(url, e))?;
                bytes.extend_from_slice(&chunk);
                if bytes.len() as u64 > self.max_body_bytes {
                    return Err(DownloadError::invalid_response(
                        url,
                        format!("body exceeds {} bytes", self.max_body_bytes),
                    ));
                }
            }
            Ok(bytes)
        };
        let bytes = tokio::time::timeout(self.request_timeout, read)
            .await
            .map_err(|_| DownloadError::timeout(url))??;

        debug!(bytes = bytes.len(), content_type = ?content_type, "response body received");
        Ok(FetchedBody {
            bytes,
            content_type,
            final_url,
        })
    }

    /// GETs `url` and decodes a JSON body.
    ///
    /// A 404 is returned as `Ok(None)`, since lookup APIs use it for
    /// "no such record".
    ///
    /// # Errors
    ///
    /// As [`get_bytes`](Self::get_bytes), plus [`DownloadError::InvalidResponse`]
    /// when the body is not valid JSON for `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>, DownloadError> {
        let body = match self.get_bytes(url).await {
            Ok(body) => body,
            Err(DownloadError::HttpStatus { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&body.bytes)
            .map(Some)
            .map_err(|e| DownloadError::invalid_response(url, format!("invalid JSON: {e}")))
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, DownloadError> {
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(&HttpOptions {
            request_timeout: Duration::from_secs(2),
            ..HttpOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_user_agent_identifies_tool() {
        let ua = default_user_agent();
        assert!(ua.starts_with("fulltext/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }

    #[tokio::test]
    async fn test_get_bytes_invalid_url() {
        let err = fetcher().get_bytes("not a url").await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_get_bytes_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paper.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"%PDF-1.4 data".to_vec())
                    .insert_header("content-type", "application/pdf"),
            )
            .mount(&server)
            .await;

        let body = fetcher()
            .get_bytes(&format!("{}/paper.pdf", server.uri()))
            .await
            .unwrap();
        assert_eq!(body.bytes, b"%PDF-1.4 data");
        assert_eq!(body.content_type.as_deref(), Some("application/pdf"));
    }

    #[tokio::test]
    async fn test_get_bytes_status_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
            .mount(&server)
            .await;

        let err = fetcher().get_bytes(&server.uri()).await.unwrap_err();
        match err {
            DownloadError::HttpStatus {
                status, retry_after, ..
            } => {
                assert_eq!(status, 429);
                assert_eq!(retry_after.as_deref(), Some("3"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_bytes_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&HttpOptions {
            request_timeout: Duration::from_millis(200),
            ..HttpOptions::default()
        })
        .unwrap();
        let err = fetcher.get_bytes(&server.uri()).await.unwrap_err();
        assert!(matches!(err, DownloadError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_get_json_404_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let value: Option<serde_json::Value> = fetcher().get_json(&server.uri()).await.unwrap();
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_get_json_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = fetcher()
            .get_json::<serde_json::Value>(&server.uri())
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidResponse { .. }));
    }
}
