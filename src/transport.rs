use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::error::AmoError;
use crate::response::RawResponse;

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish()
    }
}

/// A single outbound HTTP call, fully encoded.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Path including any query string.
    pub path: String,
    pub hostname: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<String>,
    pub secure: bool,
}

impl TransportRequest {
    pub fn url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{}", self.hostname, self.path)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform the call. Any HTTP status is a successful send; only failures
    /// to complete the exchange are errors.
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, AmoError>;
}
