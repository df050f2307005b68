//! Transport abstraction for fetching a remote resource as a chunk stream

use crate::config::DownloadConfig;
use crate::error::{Error, Result, TransferError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;

/// An opened transfer: declared length plus the body as a stream of chunks
pub struct TransferBody {
    /// Declared total length, if the server sent one
    pub content_length: Option<u64>,
    /// Body chunks in order; the stream ends when the body is complete
    pub chunks: BoxStream<'static, std::result::Result<Bytes, TransferError>>,
}

impl std::fmt::Debug for TransferBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferBody")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Trait for opening a remote resource
///
/// Implementations perform the request and return once the response headers
/// are available; the body is consumed chunk by chunk by the fetch worker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `url` for reading
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] if the request cannot be sent or the
    /// server answers with a non-success status.
    async fn open(&self, url: &url::Url) -> std::result::Result<TransferBody, TransferError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// HTTP(S) transport backed by `reqwest`
///
/// Sends a plain GET without authentication or custom headers.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport using the connect and request timeouts from `config`
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| Error::Config {
            message: format!("Failed to create HTTP client: {}", e),
            key: None,
        })?;

        Ok(Self { client })
    }

    /// Create a transport around an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &url::Url) -> std::result::Result<TransferBody, TransferError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| network_error(url.as_str(), &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_length = response.content_length();
        let url_for_errors = url.to_string();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| network_error(&url_for_errors, &e)))
            .boxed();

        Ok(TransferBody {
            content_length,
            chunks,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

fn network_error(url: &str, e: &reqwest::Error) -> TransferError {
    let reason = if e.is_timeout() {
        format!("request timed out: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    };
    TransferError::Network {
        url: url.to_string(),
        reason,
    }
}
