use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use amocrm_connect::transport::{Transport, TransportRequest};
use amocrm_connect::{AmoError, Credentials, RawResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, DATE};
use serde_json::{json, Value};

/// Fixed server time for tests that check expiry arithmetic.
#[allow(dead_code)]
pub const SERVER_DATE: &str = "Mon, 01 Jan 2024 00:00:00 GMT";

#[allow(dead_code)]
enum Scripted {
    Response(RawResponse),
    Failure(String),
}

/// In-memory [`Transport`] that replays scripted responses in order and
/// records every request it receives.
///
/// Each send sleeps briefly so overlapping calls would be observable through
/// `max_in_flight`.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<TransportRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: RawResponse) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Response(response));
        self
    }

    pub fn push_json(&self, status: u16, body: Value) -> &Self {
        self.push(RawResponse::new(status, HeaderMap::new(), body.to_string()))
    }

    pub fn push_failure(&self, message: &str) -> &Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Failure(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[allow(dead_code)]
#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: TransportRequest) -> Result<RawResponse, AmoError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());

        tokio::time::sleep(Duration::from_millis(5)).await;

        let next = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match next {
            Some(Scripted::Response(response)) => Ok(response),
            Some(Scripted::Failure(message)) => Err(AmoError::TransportError(message.into())),
            None => panic!("no scripted response left for {} {}", request.method, request.path),
        }
    }
}

#[allow(dead_code)]
pub fn credentials() -> Credentials {
    Credentials::new("client-1", "secret-1", "https://example.com/oauth")
}

/// `Date` header value for an instant.
#[allow(dead_code)]
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Token endpoint success dated now.
#[allow(dead_code)]
pub fn token_response(access: &str, refresh: &str, expires_in: i64) -> RawResponse {
    token_response_dated(access, refresh, expires_in, &http_date(Utc::now()))
}

#[allow(dead_code)]
pub fn token_response_dated(access: &str, refresh: &str, expires_in: i64, date: &str) -> RawResponse {
    let mut headers = HeaderMap::new();
    headers.insert(DATE, HeaderValue::from_str(date).unwrap());
    let body = json!({
        "token_type": "Bearer",
        "expires_in": expires_in,
        "access_token": access,
        "refresh_token": refresh,
    });
    RawResponse::new(200, headers, body.to_string())
}

/// Parsed JSON body of a recorded request.
#[allow(dead_code)]
pub fn body_json(request: &TransportRequest) -> Value {
    serde_json::from_str(request.body.as_deref().unwrap_or("null")).unwrap()
}

#[allow(dead_code)]
pub fn header<'a>(request: &'a TransportRequest, name: &str) -> Option<&'a str> {
    request.headers.get(name).and_then(|v| v.to_str().ok())
}

/// Write a config file into a fresh temp dir and return both.
#[allow(dead_code)]
pub fn temp_config(config: &Value) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("amocrm.json");
    std::fs::write(&path, serde_json::to_string_pretty(config).unwrap()).unwrap();
    (dir, path)
}
