//! Remote object fetch client
//!
//! The retrieval pool talks to the remote object store through the
//! [`FetchClient`] trait, so tests can substitute a deterministic in-memory
//! client and production code can use [`HttpFetchClient`].
//!
//! The HTTP implementation maps response statuses onto the fetch error
//! taxonomy: 401 is fatal for the whole run, 403/404 are permanent per-task
//! failures, and 429 plus server errors and connection problems are
//! transient and eligible for retry.

use crate::error::FetchError;
use crate::types::FileId;
use async_trait::async_trait;
use std::time::Duration;

/// Timeout for a single fetch request, including the body read.
const FETCH_TIMEOUT_SECS: u64 = 120;

/// Payload returned by a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    /// The raw object content
    pub bytes: Vec<u8>,
    /// Size advertised by the remote service (Content-Length), when present
    pub reported_size: Option<u64>,
}

/// Abstraction over the remote object store
///
/// Implementations must be safe to share across workers; the retrieval pool
/// calls `fetch` concurrently from up to `max_concurrent_fetches` tasks.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Fetch the full content of a single remote object by identifier
    async fn fetch(&self, file_id: &FileId) -> Result<FetchedBytes, FetchError>;
}

/// HTTP-backed fetch client
///
/// Objects are fetched from `<base_url>?id=<file_id>` with a shared
/// connection pool and a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetchClient {
    client: reqwest::Client,
    base_url: url::Url,
}

impl HttpFetchClient {
    /// Create a client for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the underlying
    /// HTTP client cannot be constructed.
    pub fn new(base_url: &str) -> crate::error::Result<Self> {
        let base_url = url::Url::parse(base_url).map_err(|e| crate::error::Error::Config {
            message: format!("invalid fetch endpoint '{}': {}", base_url, e),
            key: Some("fetch_endpoint".to_string()),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(concat!("docbatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| crate::error::Error::Config {
                message: format!("failed to create HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self { client, base_url })
    }

    fn object_url(&self, file_id: &FileId) -> url::Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("id", &file_id.0);
        url
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn fetch(&self, file_id: &FileId) -> Result<FetchedBytes, FetchError> {
        let url = self.object_url(file_id);
        tracing::debug!(file_id = %file_id, url = %url, "Fetching remote object");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if let Some(err) = classify_status(status) {
            tracing::debug!(file_id = %file_id, status = status.as_u16(), error = %err, "Fetch rejected by remote");
            return Err(err);
        }

        let reported_size = response.content_length();
        let bytes = response
            .bytes()
            .await
            .map_err(map_transport_error)?
            .to_vec();

        Ok(FetchedBytes {
            bytes,
            reported_size,
        })
    }
}

/// Map an HTTP status onto the fetch taxonomy; `None` means success.
fn classify_status(status: reqwest::StatusCode) -> Option<FetchError> {
    match status.as_u16() {
        200..=299 => None,
        401 => Some(FetchError::Unauthorized),
        403 => Some(FetchError::PermissionDenied),
        404 | 410 => Some(FetchError::NotFound),
        429 => Some(FetchError::RateLimited),
        code if status.is_server_error() => Some(FetchError::TransientNetwork(format!(
            "server returned {}",
            code
        ))),
        code => Some(FetchError::TransientNetwork(format!(
            "unexpected status {}",
            code
        ))),
    }
}

/// Timeouts, connect failures, and body-read interruptions are all
/// transient from the scheduler's point of view.
fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::TransientNetwork("request timed out".to_string())
    } else if e.is_connect() {
        FetchError::TransientNetwork(format!("connection failed: {}", e))
    } else {
        FetchError::TransientNetwork(e.to_string())
    }
}
