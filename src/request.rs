use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE,
    USER_AGENT,
};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::encoding::{append_query, encode_body, encode_query};
use crate::error::AmoError;
use crate::events::{Emitter, EventBus, EventKind, EventPayload};
use crate::queue::{RequestRunner, SerialQueue};
use crate::response::{normalize, DomainResponse, RawResponse, ResponseOptions};
use crate::token::{CookieExpiry, Token, TokenStore};
use crate::transport::{Transport, TransportRequest};

pub const DEFAULT_USER_AGENT: &str = "amoCRM-API-client/1.0";
pub const DEFAULT_DOMAIN_SUFFIX: &str = ".amocrm.ru";

const REQUEST_EVENTS: &[EventKind] = &[EventKind::ExpiresUnknown];

/// Per-call options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Attach `Authorization: Bearer` when a token is present. When false the
    /// stored cookies are sent instead.
    pub with_token: bool,
    /// Default `Content-Type: application/json`.
    pub json: bool,
    /// Forward `Set-Cookie` from the response into the cookie jar.
    pub save_cookies: bool,
    pub headers: HashMap<String, String>,
    pub response: ResponseOptions,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            with_token: true,
            json: true,
            save_cookies: false,
            headers: HashMap::new(),
            response: ResponseOptions::default(),
        }
    }
}

impl RequestOptions {
    /// Cookie-session call: no bearer token, remember returned cookies.
    pub fn cookie_session() -> Self {
        Self {
            with_token: false,
            save_cookies: true,
            ..Self::default()
        }
    }
}

/// HTTP access to one CRM account domain.
///
/// Every call goes through the configured [`RequestRunner`], which by default
/// keeps a single call in flight at a time.
pub struct DomainRequest {
    hostname: String,
    secure: bool,
    store: Mutex<TokenStore>,
    transport: Arc<dyn Transport>,
    runner: Arc<dyn RequestRunner>,
    events: Emitter,
}

impl std::fmt::Debug for DomainRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRequest")
            .field("hostname", &self.hostname)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl DomainRequest {
    /// Create a request pipeline for `domain`.
    ///
    /// A bare account name (no dot) is expanded to `<name>.amocrm.ru`.
    pub fn new(domain: &str, transport: Arc<dyn Transport>) -> Result<Self, AmoError> {
        Self::with_parts(domain, transport, Arc::new(SerialQueue::new()), &EventBus::default())
    }

    pub fn with_parts(
        domain: &str,
        transport: Arc<dyn Transport>,
        runner: Arc<dyn RequestRunner>,
        bus: &EventBus,
    ) -> Result<Self, AmoError> {
        let domain = domain.trim();
        if domain.is_empty() {
            return Err(AmoError::MissingDomain);
        }
        let hostname = if domain.contains('.') {
            domain.to_string()
        } else {
            format!("{domain}{DEFAULT_DOMAIN_SUFFIX}")
        };

        Ok(Self {
            hostname,
            secure: true,
            store: Mutex::new(TokenStore::new()),
            transport,
            runner,
            events: bus.emitter("request", REQUEST_EVENTS),
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Use plain HTTP. Only meaningful against local test servers.
    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn events(&self) -> &Emitter {
        &self.events
    }

    pub async fn get(
        &self,
        url: &str,
        data: &Value,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::GET, options).await
    }

    pub async fn post(
        &self,
        url: &str,
        data: &Value,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::POST, options).await
    }

    pub async fn patch(
        &self,
        url: &str,
        data: &Value,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::PATCH, options).await
    }

    pub async fn delete(
        &self,
        url: &str,
        data: &Value,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::DELETE, options).await
    }

    /// Encode and enqueue one call. Headers are computed when the call reaches
    /// the front of the queue, so it sees any token stored by earlier calls.
    pub async fn request(
        &self,
        url: &str,
        data: &Value,
        method: Method,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        let encoded = encode_data(data, &method)?;
        let path = if method == Method::GET {
            append_query(url, &encoded)
        } else {
            url.to_string()
        };

        self.runner
            .run(Box::pin(async move {
                let headers = self.request_headers(&encoded, &method, options)?;
                let request = TransportRequest {
                    path,
                    hostname: self.hostname.clone(),
                    body: (method != Method::GET).then_some(encoded),
                    method,
                    headers,
                    secure: self.secure,
                };
                let raw = self.transport.send(request).await?;
                self.handle_response(raw, options)
            }))
            .await
    }

    /// Headers for a call: caller headers first, then auth, content type and
    /// content length.
    pub fn request_headers(
        &self,
        encoded: &str,
        method: &Method,
        options: &RequestOptions,
    ) -> Result<HeaderMap, AmoError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));

        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| invalid_header(key, e.to_string()))?;
            let val = HeaderValue::from_str(value).map_err(|e| invalid_header(key, e.to_string()))?;
            headers.insert(name, val);
        }

        {
            let store = self.store();
            if options.with_token {
                if let Some(token) = store.token() {
                    let bearer = format!("Bearer {}", token.access_token);
                    let val = HeaderValue::from_str(&bearer)
                        .map_err(|e| invalid_header("Authorization", e.to_string()))?;
                    headers.insert(AUTHORIZATION, val);
                }
            } else {
                let cookies = store.cookie_header();
                if !cookies.is_empty() {
                    let val = HeaderValue::from_str(&cookies)
                        .map_err(|e| invalid_header("Cookie", e.to_string()))?;
                    headers.insert(COOKIE, val);
                }
            }
        }

        if options.json && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if *method != Method::GET && !encoded.is_empty() {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        }
        Ok(headers)
    }

    fn handle_response(
        &self,
        raw: RawResponse,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        if options.save_cookies {
            let cookies = raw.set_cookies();
            if !cookies.is_empty() {
                self.set_cookies(cookies)?;
            }
        }
        normalize(raw, &options.response)
    }

    pub fn set_token(&self, token: Token, observed_at: DateTime<Utc>) {
        debug!(hostname = %self.hostname, expires_in = token.expires_in, "storing token");
        self.store().set_token(token, observed_at);
    }

    pub fn get_token(&self) -> Option<Token> {
        self.store().token().cloned()
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.store().expires()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.store().is_expired(now)
    }

    pub fn cookies(&self) -> Vec<String> {
        self.store().cookies().to_vec()
    }

    /// Replace the cookie jar. An unknown expiry disables expiry tracking and
    /// emits `expiresUnknown`.
    pub fn set_cookies(&self, cookies: Vec<String>) -> Result<CookieExpiry, AmoError> {
        let outcome = self.store().set_cookies(cookies);
        if outcome == CookieExpiry::Unknown {
            warn!(hostname = %self.hostname, "cookie session expiry unknown, expiry tracking disabled");
            self.events.emit(EventKind::ExpiresUnknown, EventPayload::Empty)?;
        }
        Ok(outcome)
    }

    pub fn clear(&self) {
        self.store().clear_cookies();
    }

    fn store(&self) -> MutexGuard<'_, TokenStore> {
        // Never held across an await.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// GET data becomes a query string, everything else a JSON body.
pub fn encode_data(data: &Value, method: &Method) -> Result<String, AmoError> {
    if *method == Method::GET {
        Ok(encode_query(data))
    } else {
        encode_body(data)
    }
}

fn invalid_header(name: &str, detail: String) -> AmoError {
    AmoError::InvalidArgument(format!("Invalid header '{name}': {detail}"))
}
