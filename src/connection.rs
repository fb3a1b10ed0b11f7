use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::{Credentials, ListenerConfig};
use crate::error::AmoError;
use crate::events::{Emitter, Event, EventKind, EventPayload};
use crate::oauth::{default_listener_factory, ListenerFactory};
use crate::request::{DomainRequest, RequestOptions};
use crate::response::DomainResponse;
use crate::token::Token;
use crate::transport::Transport;

pub const TOKEN_PATH: &str = "/oauth2/access_token";
pub const AUTHORIZE_URL: &str = "https://www.amocrm.ru/oauth";

const CONNECTION_EVENTS: &[EventKind] = &[
    EventKind::BeforeConnect,
    EventKind::BeforeFetchToken,
    EventKind::BeforeRefreshToken,
    EventKind::NewToken,
    EventKind::CheckToken,
    EventKind::Connected,
    EventKind::AuthError,
    EventKind::Error,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// How the provider presents the consent screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Popup,
    Redirect,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Popup => "popup",
            AuthMode::Redirect => "redirect",
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "popup" => Ok(AuthMode::Popup),
            "redirect" => Ok(AuthMode::Redirect),
            other => Err(format!("unknown auth mode '{other}', expected popup or redirect")),
        }
    }
}

#[derive(Debug)]
enum Strategy {
    Refresh,
    FetchToken,
    WaitUserAction(ListenerConfig),
    Unavailable,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    credentials: Arc<Credentials>,
    oauth_state: Option<String>,
    last_request_at: Option<DateTime<Utc>>,
    last_connection_request_at: Option<DateTime<Utc>>,
}

/// OAuth session for one CRM account.
///
/// Every request first makes sure the session is usable: it connects when
/// disconnected and refreshes when the stored token has expired. Token calls
/// and regular calls share the [`DomainRequest`] queue, and concurrent connect
/// attempts are coalesced so only one token call is made per transition.
pub struct Connection {
    request: DomainRequest,
    inner: Mutex<Inner>,
    connect_gate: tokio::sync::Mutex<()>,
    listener_factory: ListenerFactory,
    events: Emitter,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("request", &self.request)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        domain: &str,
        credentials: Credentials,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AmoError> {
        let request = DomainRequest::new(domain, transport)?;
        Ok(Self::from_request(request, credentials))
    }

    pub fn from_config(config: &ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, AmoError> {
        Self::new(&config.domain, config.auth.clone(), transport)
    }

    /// Wrap an existing request pipeline. Connection events go to the same
    /// bus as the request's.
    pub fn from_request(request: DomainRequest, credentials: Credentials) -> Self {
        let events = request.events().bus().emitter("connection", CONNECTION_EVENTS);
        Self {
            request,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                credentials: Arc::new(credentials),
                oauth_state: None,
                last_request_at: None,
                last_connection_request_at: None,
            }),
            connect_gate: tokio::sync::Mutex::new(()),
            listener_factory: default_listener_factory(),
            events,
        }
    }

    pub fn with_listener_factory(mut self, factory: ListenerFactory) -> Self {
        self.listener_factory = factory;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn domain_request(&self) -> &DomainRequest {
        &self.request
    }

    pub fn state(&self) -> ConnectionState {
        self.inner().state
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn credentials(&self) -> Arc<Credentials> {
        self.inner().credentials.clone()
    }

    pub fn last_request_at(&self) -> Option<DateTime<Utc>> {
        self.inner().last_request_at
    }

    pub fn last_connection_request_at(&self) -> Option<DateTime<Utc>> {
        self.inner().last_connection_request_at
    }

    pub fn set_state(&self, state: Option<String>) -> &Self {
        self.inner().oauth_state = state;
        self
    }

    pub fn get_state(&self) -> Option<String> {
        self.inner().oauth_state.clone()
    }

    pub fn set_token(&self, token: Token, observed_at: DateTime<Utc>) -> &Self {
        self.request.set_token(token, observed_at);
        self
    }

    pub fn get_token(&self) -> Option<Token> {
        self.request.get_token()
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.request.expires()
    }

    /// Authorize URL the user opens to grant access.
    pub fn auth_url(&self, mode: AuthMode) -> String {
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params.append_pair("client_id", &self.credentials().client_id);
        params.append_pair("mode", mode.as_str());
        if let Some(state) = self.get_state() {
            params.append_pair("state", &state);
        }
        format!("{AUTHORIZE_URL}?{}", params.finish())
    }

    /// Install a freshly obtained authorization code and connect with it.
    pub async fn set_code(&self, code: &str) -> Result<bool, AmoError> {
        self.replace_code(code);
        self.connect().await
    }

    /// Drop back to `disconnected`. The stored token is kept, so the next
    /// connect refreshes it.
    pub fn disconnect(&self) {
        self.inner().state = ConnectionState::Disconnected;
    }

    /// Ensure the session can serve a request.
    ///
    /// Returns `Ok(false)` when no token, code or listener is configured; the
    /// connection then stays disconnected and nothing is sent.
    pub async fn connect_if_needed(&self) -> Result<bool, AmoError> {
        self.events
            .emit(EventKind::CheckToken, EventPayload::Flag(self.connected()))?;

        if !self.connected() {
            return self.connect().await;
        }
        if self.request.is_expired(Utc::now()) {
            return self.refresh_expired().await;
        }
        Ok(true)
    }

    pub async fn connect(&self) -> Result<bool, AmoError> {
        if self.connected() {
            return Ok(true);
        }
        let _gate = self.connect_gate.lock().await;
        if self.connected() {
            debug!("connected while waiting for an in-flight attempt");
            return Ok(true);
        }
        self.connect_locked().await
    }

    pub async fn request(
        &self,
        url: &str,
        data: &Value,
        method: Method,
        options: &RequestOptions,
    ) -> Result<DomainResponse, AmoError> {
        self.connect_if_needed().await?;
        self.inner().last_request_at = Some(Utc::now());
        self.request.request(url, data, method, options).await
    }

    pub async fn get(&self, url: &str, data: &Value) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::GET, &RequestOptions::default())
            .await
    }

    pub async fn post(&self, url: &str, data: &Value) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::POST, &RequestOptions::default())
            .await
    }

    pub async fn patch(&self, url: &str, data: &Value) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::PATCH, &RequestOptions::default())
            .await
    }

    pub async fn delete(&self, url: &str, data: &Value) -> Result<DomainResponse, AmoError> {
        self.request(url, data, Method::DELETE, &RequestOptions::default())
            .await
    }

    async fn refresh_expired(&self) -> Result<bool, AmoError> {
        let _gate = self.connect_gate.lock().await;
        if self.connected() && !self.request.is_expired(Utc::now()) {
            debug!("token refreshed by an in-flight attempt");
            return Ok(true);
        }
        info!(hostname = %self.request.hostname(), "token expired, refreshing");
        self.begin_connecting();
        let outcome = self.refresh_token().await;
        self.finish_connect(outcome)
    }

    async fn connect_locked(&self) -> Result<bool, AmoError> {
        self.events.emit(EventKind::BeforeConnect, EventPayload::Empty)?;
        self.inner().last_connection_request_at = Some(Utc::now());

        let outcome = match self.strategy() {
            Strategy::Unavailable => {
                debug!("no token, code or callback listener configured; staying disconnected");
                return Ok(false);
            }
            Strategy::Refresh => {
                self.begin_connecting();
                self.refresh_token().await
            }
            Strategy::FetchToken => {
                self.begin_connecting();
                self.fetch_token().await
            }
            Strategy::WaitUserAction(config) => {
                self.begin_connecting();
                match self.wait_user_action(&config).await {
                    Ok(code) => {
                        self.replace_code(&code);
                        self.fetch_token().await
                    }
                    Err(e) => Err(e),
                }
            }
        };
        self.finish_connect(outcome)
    }

    fn strategy(&self) -> Strategy {
        if self.request.get_token().is_some() {
            return Strategy::Refresh;
        }
        let credentials = self.credentials();
        if credentials.code.is_some() {
            Strategy::FetchToken
        } else if let Some(server) = &credentials.server {
            Strategy::WaitUserAction(server.clone())
        } else {
            Strategy::Unavailable
        }
    }

    async fn fetch_token(&self) -> Result<DomainResponse, AmoError> {
        self.events
            .emit(EventKind::BeforeFetchToken, EventPayload::Empty)?;
        let credentials = self.credentials();
        let body = TokenRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            redirect_uri: &credentials.redirect_uri,
            grant_type: "authorization_code",
            code: credentials.code.as_deref(),
            refresh_token: None,
        };
        self.post_token_request(&body).await
    }

    async fn refresh_token(&self) -> Result<DomainResponse, AmoError> {
        self.events
            .emit(EventKind::BeforeRefreshToken, EventPayload::Empty)?;
        let token = self.request.get_token().ok_or_else(|| AmoError::AuthError {
            data: serde_json::json!({ "error": "no_token" }),
        })?;
        let credentials = self.credentials();
        let body = TokenRequest {
            client_id: &credentials.client_id,
            client_secret: &credentials.client_secret,
            redirect_uri: &credentials.redirect_uri,
            grant_type: "refresh_token",
            code: None,
            refresh_token: Some(&token.refresh_token),
        };
        self.post_token_request(&body).await
    }

    async fn post_token_request(&self, body: &TokenRequest<'_>) -> Result<DomainResponse, AmoError> {
        debug!(grant_type = body.grant_type, "requesting token");
        let data = serde_json::to_value(body).map_err(|e| AmoError::InvalidBody {
            status: 0,
            raw: String::new(),
            reason: format!("Failed to serialize token request: {e}"),
        })?;
        self.request
            .post(TOKEN_PATH, &data, &RequestOptions::default())
            .await
    }

    /// Run the callback listener until it yields a code. The listener is
    /// stopped exactly once and dropped before returning.
    async fn wait_user_action(&self, config: &ListenerConfig) -> Result<String, AmoError> {
        let state = self.get_state();
        let mut listener = (self.listener_factory)(config, state.as_deref());
        info!(addr = %config.bind_addr(), "waiting for user authorization");

        let received = match listener.run().await {
            Ok(rx) => rx.await.map_err(|_| {
                AmoError::OAuthError("Callback listener closed before a code arrived".into())
            }),
            Err(e) => Err(e),
        };
        let stopped = listener.stop().await;
        drop(listener);

        let code = received?;
        stopped?;
        Ok(code)
    }

    /// Store the token carried by a token-endpoint response. Returns false
    /// when the payload has no usable token.
    fn handle_token(&self, response: &DomainResponse) -> Result<bool, AmoError> {
        let Some(token) = Token::from_payload(&response.data) else {
            return Ok(false);
        };
        let observed_at = response.info.date().unwrap_or_else(|| {
            warn!("token response has no usable Date header, using local time");
            Utc::now()
        });
        if token.expires_at(observed_at).is_none() {
            warn!(expires_in = token.expires_in, "token lifetime out of range");
            return Ok(false);
        }
        self.request.set_token(token, observed_at);
        self.events.emit(
            EventKind::NewToken,
            EventPayload::Response(Box::new(response.clone())),
        )?;
        Ok(true)
    }

    fn finish_connect(&self, outcome: Result<DomainResponse, AmoError>) -> Result<bool, AmoError> {
        match outcome {
            Ok(response) => {
                if self.handle_token(&response)? {
                    {
                        let mut inner = self.inner();
                        inner.state = ConnectionState::Connected;
                        inner.last_request_at = Some(Utc::now());
                    }
                    info!(hostname = %self.request.hostname(), "connected");
                    self.events.emit(EventKind::Connected, EventPayload::Empty)?;
                    Ok(true)
                } else {
                    self.fail_auth(response.data)
                }
            }
            Err(AmoError::HttpStatus { status, data, .. }) if (400..500).contains(&status) => {
                self.fail_auth(data)
            }
            Err(e) => {
                self.inner().state = ConnectionState::Disconnected;
                warn!(error = %e, "connect attempt failed");
                self.events.emit(EventKind::Error, EventPayload::failure(&e))?;
                Err(e)
            }
        }
    }

    fn fail_auth(&self, data: Value) -> Result<bool, AmoError> {
        self.inner().state = ConnectionState::Disconnected;
        let err = AmoError::AuthError { data };
        warn!(error = %err, "authorization failed");
        self.events.emit(EventKind::AuthError, EventPayload::failure(&err))?;
        self.events.emit(EventKind::Error, EventPayload::failure(&err))?;
        Err(err)
    }

    fn begin_connecting(&self) {
        self.inner().state = ConnectionState::Connecting;
    }

    fn replace_code(&self, code: &str) {
        let mut inner = self.inner();
        inner.credentials = Arc::new(inner.credentials.with_code(code));
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::RawResponse;
    use crate::transport::TransportRequest;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;

    struct UnreachableTransport;

    #[async_trait]
    impl Transport for UnreachableTransport {
        async fn send(&self, request: TransportRequest) -> Result<RawResponse, AmoError> {
            panic!("unexpected request to {}", request.path);
        }
    }

    fn connection(credentials: Credentials) -> Connection {
        Connection::new("test", credentials, Arc::new(UnreachableTransport)).unwrap()
    }

    fn credentials() -> Credentials {
        Credentials::new("client-1", "secret", "https://example.com/oauth")
    }

    #[test]
    fn auth_url_without_state() {
        let conn = connection(credentials());
        assert_eq!(
            conn.auth_url(AuthMode::Popup),
            "https://www.amocrm.ru/oauth?client_id=client-1&mode=popup"
        );
    }

    #[test]
    fn auth_url_with_state_keeps_param_order() {
        let conn = connection(credentials());
        conn.set_state(Some("st 1".into()));
        assert_eq!(
            conn.auth_url(AuthMode::Redirect),
            "https://www.amocrm.ru/oauth?client_id=client-1&mode=redirect&state=st+1"
        );
    }

    #[test]
    fn auth_mode_parsing() {
        assert_eq!("popup".parse::<AuthMode>().unwrap(), AuthMode::Popup);
        assert_eq!("redirect".parse::<AuthMode>().unwrap(), AuthMode::Redirect);
        assert!("window".parse::<AuthMode>().is_err());
    }

    #[test]
    fn new_connection_is_disconnected() {
        let conn = connection(credentials());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.connected());
        assert!(conn.get_token().is_none());
        assert!(conn.last_request_at().is_none());
    }

    #[test]
    fn missing_domain_is_fatal() {
        let err = Connection::new("", credentials(), Arc::new(UnreachableTransport)).unwrap_err();
        assert!(matches!(err, AmoError::MissingDomain));
    }

    #[tokio::test]
    async fn connect_without_strategy_is_a_noop() {
        let conn = connection(credentials());
        let mut rx = conn.subscribe();
        assert!(!conn.connect_if_needed().await.unwrap());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.last_connection_request_at().is_some());

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::CheckToken);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::BeforeConnect);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn token_request_serialization() {
        let creds = credentials();
        let body = TokenRequest {
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
            redirect_uri: &creds.redirect_uri,
            grant_type: "refresh_token",
            code: None,
            refresh_token: Some("R"),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["grant_type"], "refresh_token");
        assert_eq!(value["refresh_token"], "R");
        assert!(value.get("code").is_none());
    }

    #[test]
    fn handle_token_ignores_payload_without_token_type() {
        let conn = connection(credentials());
        let response = DomainResponse {
            data: serde_json::json!({"error": "invalid_grant"}),
            info: crate::response::ResponseInfo {
                status: 200,
                headers: HeaderMap::new(),
            },
            raw: None,
        };
        assert!(!conn.handle_token(&response).unwrap());
        assert!(conn.get_token().is_none());
    }
}
