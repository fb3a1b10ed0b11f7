use serde::{Deserialize, Serialize};

/// Where the interactive OAuth callback listener binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Path the provider redirects to; requests elsewhere are answered 404.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

impl ListenerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: default_path(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// OAuth client credentials for one integration.
///
/// Treated as an immutable value: a new authorization code produces a new
/// `Credentials` through [`Credentials::with_code`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ListenerConfig>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("code", &self.code.as_ref().map(|_| "<redacted>"))
            .field("server", &self.server)
            .finish()
    }
}

impl Credentials {
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            code: None,
            server: None,
        }
    }

    pub fn with_code(&self, code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            ..self.clone()
        }
    }

    pub fn with_server(&self, server: ListenerConfig) -> Self {
        Self {
            server: Some(server),
            ..self.clone()
        }
    }
}
