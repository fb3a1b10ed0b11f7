use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::parse_http_date;

/// Bearer token as returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

impl Token {
    /// Extract a token from a token-endpoint payload.
    ///
    /// Returns `None` unless the payload carries a non-empty `token_type`
    /// and decodes into a full token.
    pub fn from_payload(data: &Value) -> Option<Token> {
        let token_type = data.get("token_type").and_then(Value::as_str)?;
        if token_type.is_empty() {
            return None;
        }
        serde_json::from_value(data.clone()).ok()
    }

    /// Expiry instant for a token issued at `observed_at`, or `None` when
    /// `expires_in` falls outside the representable date range.
    pub fn expires_at(&self, observed_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        TimeDelta::try_seconds(self.expires_in).and_then(|ttl| observed_at.checked_add_signed(ttl))
    }
}

/// Result of feeding `Set-Cookie` values into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieExpiry {
    Known(DateTime<Utc>),
    Unknown,
}

/// Current session credentials for one domain.
///
/// The token and its expiry are always replaced together, so readers never
/// observe an expiry that belongs to a different token.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    token: Option<Token>,
    expires_at: Option<DateTime<Utc>>,
    cookies: Vec<String>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `token`, computing its expiry from the instant the server
    /// produced the response rather than the local clock.
    pub fn set_token(&mut self, token: Token, observed_at: DateTime<Utc>) {
        let expires_at = token.expires_at(observed_at).unwrap_or(if token.expires_in < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        });
        self.expires_at = Some(expires_at);
        self.token = Some(token);
    }

    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    pub fn expires(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires) if now > expires)
    }

    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// `Cookie` header value built from the stored `name=value` pairs.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .filter_map(|cookie| cookie.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Replace the cookie jar and derive the session expiry from the first
    /// cookie that carries an `expires=` attribute.
    ///
    /// When no such attribute exists or it cannot be parsed the expiry is
    /// cleared rather than left stale.
    pub fn set_cookies(&mut self, cookies: Vec<String>) -> CookieExpiry {
        let expiry = cookies
            .iter()
            .find_map(|cookie| cookie_expires_attr(cookie))
            .and_then(parse_http_date);
        self.cookies = cookies;
        self.expires_at = expiry;
        match expiry {
            Some(at) => CookieExpiry::Known(at),
            None => CookieExpiry::Unknown,
        }
    }

    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }
}

fn cookie_expires_attr(cookie: &str) -> Option<&str> {
    cookie.split(';').map(str::trim).find_map(|attr| {
        let (name, value) = attr.split_once('=')?;
        name.eq_ignore_ascii_case("expires").then_some(value)
    })
}
