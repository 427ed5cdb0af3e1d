//! HTTP transport abstraction.
//!
//! All server operations go through the [`HttpTransport`] trait so that
//! tests can substitute scripted transports for the real reqwest-backed
//! implementation. The trait returns boxed `'static` futures, allowing
//! callers to spawn each exchange as an independent task and race it
//! against a cancellation token.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture =
    Pin<Box<dyn Future<Output = Result<TransportResponse, TransportError>> + Send + 'static>>;

/// HTTP request methods used by the library server API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Put,
    Post,
    Delete,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A single outgoing HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: Url,
    /// Pre-serialized compact JSON body. Sent with
    /// `Content-Type: application/json` when present.
    pub json_body: Option<Vec<u8>>,
}

/// The raw result of a completed HTTP exchange.
///
/// A response is produced for every exchange that reached the server,
/// including non-2xx outcomes. Connection-level failures surface as
/// [`TransportError`] instead.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// HTTP status code, if one could be read from the response.
    pub status: Option<u16>,
    /// Content-Type header value, if present.
    pub content_type: Option<String>,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Connection-level transport failures.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The exchange was aborted before completion.
    #[error("request aborted")]
    Aborted,

    /// The request failed before a response could be read.
    #[error("{0}")]
    Failed(String),
}

/// Object-safe async HTTP transport.
pub trait HttpTransport: Send + Sync + 'static {
    /// Dispatches a single HTTP exchange.
    ///
    /// The returned future is `'static` so callers can spawn it and
    /// race it against cancellation. Implementations clone whatever
    /// internal state they need.
    fn send(&self, request: TransportRequest) -> TransportFuture;
}

/// Production transport backed by a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with connection pooling suitable for a local
    /// library server.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("medley/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| TransportError::Failed(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> TransportFuture {
        let client = self.client.clone();
        Box::pin(async move {
            let builder = match request.method {
                HttpMethod::Get => client.get(request.url),
                HttpMethod::Put => client.put(request.url),
                HttpMethod::Post => client.post(request.url),
                HttpMethod::Delete => client.delete(request.url),
            };
            let builder = match request.json_body {
                Some(body) => builder
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body),
                None => builder,
            };
            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::Failed(format!("request failed: {}", e)))?;
            let status = response.status().as_u16();
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(|value| value.to_string());
            let body = response
                .bytes()
                .await
                .map_err(|e| TransportError::Failed(format!("failed to read response body: {}", e)))?
                .to_vec();
            Ok(TransportResponse {
                status: Some(status),
                content_type,
                body,
            })
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Put.to_string(), "PUT");
        assert_eq!(HttpMethod::Post.to_string(), "POST");
        assert_eq!(HttpMethod::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_transport_error_display() {
        assert_eq!(TransportError::Aborted.to_string(), "request aborted");
        assert_eq!(
            TransportError::Failed("connection refused".to_string()).to_string(),
            "connection refused"
        );
    }

    #[tokio::test]
    async fn test_fixed_transport_records_requests() {
        let transport = mock::FixedTransport::empty(204);
        let request = TransportRequest {
            method: HttpMethod::Delete,
            url: "http://localhost/collections/abc".parse().unwrap(),
            json_body: None,
        };
        let response = transport.send(request).await.unwrap();
        assert_eq!(response.status, Some(204));
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }
}
