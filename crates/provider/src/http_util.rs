//! Shared HTTP utilities for the completion relay.
//!
//! Centralises the send → status-check → byte-stream pattern and the mapping
//! of `reqwest` failures onto the gateway error taxonomy.

use futures_util::StreamExt as _;
use promptgate_types::{
    GatewayError,
    traits::{ByteStream, Result},
};
use reqwest::{Client, RequestBuilder};

/// Thin wrapper over a shared [`Client`].
#[derive(Clone)]
pub struct ProviderHttp {
    http: Client,
}

impl ProviderHttp {
    #[must_use]
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// Returns a reference to the inner HTTP client for building requests.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.http
    }

    /// Sends a request and checks for success status.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UpstreamUnreachable`] if the request cannot be
    /// delivered, or [`GatewayError::UpstreamRejected`] with the response body
    /// on a non-2xx status.
    pub async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnreachable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(GatewayError::UpstreamRejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Converts a response body into a [`ByteStream`]; read failures surface
    /// as [`GatewayError::Transport`].
    #[must_use]
    pub fn byte_stream(resp: reqwest::Response) -> ByteStream {
        Box::pin(
            resp.bytes_stream()
                .map(|r| r.map_err(|e| GatewayError::Transport(e.to_string()))),
        )
    }
}

/// Wraps an in-memory list of chunks as a [`ByteStream`].
#[cfg(test)]
pub(crate) fn chunks_stream<I>(chunks: I) -> ByteStream
where
    I: IntoIterator<Item = Result<bytes::Bytes>>,
    I::IntoIter: Send + 'static,
{
    Box::pin(futures_util::stream::iter(chunks))
}
