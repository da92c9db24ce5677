//! Archive transport: the raw byte-stream side of a download.
//!
//! Separating the HTTP mechanics behind a trait lets the store's resume,
//! cancellation, and single-session logic be tested against scripted
//! in-memory transfers.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use reqwest::header;
use reqwest::{Client, StatusCode};
use thiserror::Error;

use crate::catalog::AuthSession;

/// Errors from the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transient network failure.
    #[error("network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// The session capability was rejected; re-authentication is required.
    #[error("authenticated session expired")]
    AuthExpired,
}

/// Stream of archive bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// An opened transfer.
pub struct TransferBody {
    /// True when the server honored the requested byte offset (the stream
    /// continues the partial file); false when it starts from byte zero.
    pub resumed: bool,
    /// Total length of the complete resource, when the server reports it.
    pub total_len: Option<u64>,
    /// Validator token for this representation (ETag or Last-Modified).
    pub validator: Option<String>,
    /// The byte stream itself.
    pub stream: ByteStream,
}

/// Transport for fetching archive bytes, optionally from an offset.
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Open a transfer for `url`.
    ///
    /// # Arguments
    ///
    /// * `session` - authenticated session capability for the request
    /// * `offset` - byte offset to continue from (0 for a fresh transfer)
    /// * `validator` - validator token captured when the partial began; the
    ///   transport must only continue the partial if the remote resource
    ///   still matches it
    async fn open(
        &self,
        url: &str,
        session: &AuthSession,
        offset: u64,
        validator: Option<&str>,
    ) -> Result<TransferBody, TransportError>;
}

/// HTTP transport using ranged requests for resume.
///
/// Resume is a `Range: bytes=<offset>-` request with `If-Range` carrying the
/// stored validator: the server answers 206 and continues the partial only
/// when the resource is unchanged, and 200 with the full body otherwise.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Create a transport with default settings.
    ///
    /// No overall request timeout is set; multi-gigabyte transfers are
    /// bounded by cancellation, not by wall-clock limits. A connect timeout
    /// still applies.
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("Toolvault/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to create HTTP client");

        Self { client }
    }
}

#[async_trait]
impl ArchiveTransport for HttpTransport {
    async fn open(
        &self,
        url: &str,
        session: &AuthSession,
        offset: u64,
        validator: Option<&str>,
    ) -> Result<TransferBody, TransportError> {
        let mut request = self.client.get(url).bearer_auth(session.bearer_token());

        // A range request is only safe when conditioned on the validator the
        // partial was downloaded under; otherwise fetch the full body and let
        // the caller restart from zero.
        if offset > 0 {
            if let Some(validator) = validator {
                request = request.header(header::RANGE, format!("bytes={}-", offset));
                request = request.header(header::IF_RANGE, validator);
            }
        }

        let response = request.send().await.map_err(|e| TransportError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(TransportError::AuthExpired);
            }
            StatusCode::OK | StatusCode::PARTIAL_CONTENT => {}
            _ => {
                return Err(TransportError::Network {
                    url: url.to_string(),
                    reason: format!("HTTP {}", status),
                });
            }
        }

        let resumed = status == StatusCode::PARTIAL_CONTENT;
        let total_len = if resumed {
            // Content-Range: bytes <start>-<end>/<total>
            response
                .headers()
                .get(header::CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.rsplit('/').next())
                .and_then(|total| total.parse().ok())
        } else {
            response.content_length()
        };

        let validator = response
            .headers()
            .get(header::ETAG)
            .or_else(|| response.headers().get(header::LAST_MODIFIED))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let stream_url = url.to_string();
        let stream = response
            .bytes_stream()
            .map_err(move |e| TransportError::Network {
                url: stream_url.clone(),
                reason: e.to_string(),
            });

        Ok(TransferBody {
            resumed,
            total_len,
            validator,
            stream: Box::pin(stream),
        })
    }
}
