use async_trait::async_trait;
use tracing::debug;

use crate::error::AmoError;
use crate::response::RawResponse;
use crate::transport::{Transport, TransportRequest};

/// reqwest-backed [`Transport`].
///
/// Rejects cleartext requests (`secure == false`) unless built with
/// `allow_http`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    allow_http: bool,
}

impl HttpTransport {
    pub fn new(allow_http: bool) -> Result<Self, AmoError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AmoError::TransportError(Box::new(e)))?;
        Ok(Self { client, allow_http })
    }

    pub fn with_client(client: reqwest::Client, allow_http: bool) -> Self {
        Self { client, allow_http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, AmoError> {
        if !request.secure && !self.allow_http {
            return Err(AmoError::TransportError(
                format!(
                    "Cleartext HTTP is not allowed for '{}'. Build the transport with allow_http to permit it.",
                    request.hostname
                )
                .into(),
            ));
        }

        let url = request.url();
        debug!(method = %request.method, %url, "sending request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AmoError::TransportError(Box::new(e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| AmoError::TransportError(Box::new(e)))?;

        debug!(status, bytes = body.len(), "received response");
        Ok(RawResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;
    use reqwest::Method;

    fn insecure_request() -> TransportRequest {
        TransportRequest {
            path: "/".into(),
            hostname: "127.0.0.1:9".into(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            secure: false,
        }
    }

    #[tokio::test]
    async fn rejects_http_without_allow_flag() {
        let transport = HttpTransport::new(false).unwrap();
        let err = transport.send(insecure_request()).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Cleartext HTTP is not allowed"), "got: {msg}");
    }

    #[tokio::test]
    async fn connection_refused_is_transport_error() {
        let transport = HttpTransport::new(true).unwrap();
        let err = transport.send(insecure_request()).await.unwrap_err();
        assert!(matches!(err, AmoError::TransportError(_)));
    }
}
