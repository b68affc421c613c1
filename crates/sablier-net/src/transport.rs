//! The transport boundary.
//!
//! The core never talks to the network directly: it hands fully-built
//! request parts to a [`Transport`] and consumes the raw response bytes.
//! [`HttpTransport`] is the production adapter over reqwest.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use sablier_shared::constants::MAX_FILE_SIZE;

use crate::endpoint::Method;

/// Transport-level failures consumed by the core.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Request timed out")]
    Timeout,

    #[error("Payload exceeds the maximum file size")]
    MaxFileSizeExceeded,

    #[error("Invalid prepared request: {0}")]
    InvalidPreparedRequest(String),

    #[error("Response parsing failed: {0}")]
    ParsingFailed(String),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Status code and headers of a transport response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInfo {
    pub code: u16,
    pub headers: BTreeMap<String, String>,
}

impl ResponseInfo {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// The transport-level view of a prepared request.
#[derive(Debug, Clone)]
pub struct RequestParts {
    pub url: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

/// External collaborator performing the actual network call.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestParts)
        -> Result<(ResponseInfo, Vec<u8>), NetworkError>;
}

/// Production transport over a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: RequestParts,
    ) -> Result<(ResponseInfo, Vec<u8>), NetworkError> {
        if let Some(body) = &request.body {
            if body.len() > MAX_FILE_SIZE {
                return Err(NetworkError::MaxFileSizeExceeded);
            }
        }

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        debug!(url = %request.url, method = request.method.as_str(), "sending request");

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout
            } else {
                NetworkError::Transport(e.to_string())
            }
        })?;

        let code = response.status().as_u16();
        if code == 413 {
            return Err(NetworkError::MaxFileSizeExceeded);
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        Ok((ResponseInfo { code, headers }, bytes.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_info_success_range() {
        let ok = ResponseInfo { code: 204, headers: BTreeMap::new() };
        let not = ResponseInfo { code: 404, headers: BTreeMap::new() };
        assert!(ok.is_success());
        assert!(!not.is_success());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected_before_send() {
        let transport = HttpTransport::new();
        let parts = RequestParts {
            url: "https://example.invalid/upload".to_string(),
            method: Method::Post,
            headers: BTreeMap::new(),
            body: Some(vec![0u8; MAX_FILE_SIZE + 1]),
            timeout: Duration::from_secs(1),
        };
        assert!(matches!(
            transport.send(parts).await,
            Err(NetworkError::MaxFileSizeExceeded)
        ));
    }
}
