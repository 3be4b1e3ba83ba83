use std::time::Duration;

use async_trait::async_trait;

use crate::error::FailureReason;
use crate::headers::Headers;
use crate::types::HttpMethod;

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// What came back from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// 2xx and 3xx count as delivered.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }
}

/// Sends one request. Errors mean no response was received.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, FailureReason>;
}

#[cfg(feature = "http")]
pub use self::http::ReqwestTransport;

#[cfg(feature = "http")]
mod http {
    use super::*;

    use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};

    /// Transport backed by a shared `reqwest::Client`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, FailureReason> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut header_map = HeaderMap::new();
            header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            for (key, value) in &request.headers {
                let name = HeaderName::try_from(key.as_str())
                    .map_err(|e| FailureReason::Network(format!("invalid header name {key}: {e}")))?;
                let value = HeaderValue::try_from(value.as_str())
                    .map_err(|e| FailureReason::Network(format!("invalid header value for {key}: {e}")))?;
                header_map.insert(name, value);
            }

            let response = self
                .client
                .request(method, &request.url)
                .headers(header_map)
                .body(request.body.clone())
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|err| {
                    if err.is_timeout() {
                        FailureReason::Timeout
                    } else {
                        FailureReason::Network(err.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            // A body that cannot be read still leaves us with a status.
            let body = response.text().await.unwrap_or_default();
            Ok(TransportResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> TransportResponse {
        TransportResponse { status, body: String::new() }
    }

    #[test]
    fn test_success_range() {
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(response(301).is_success());
        assert!(!response(199).is_success());
        assert!(!response(400).is_success());
        assert!(!response(503).is_success());
    }
}
