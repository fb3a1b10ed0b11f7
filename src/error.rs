use std::path::PathBuf;

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum AmoError {
    #[error("Portal domain must be set")]
    MissingDomain,

    #[error("Error in config {}: {detail}", path.display())]
    ConfigError { path: PathBuf, detail: String },

    #[error("Auth error: token endpoint returned no token{}", format_error_field(.data))]
    AuthError { data: Value },

    #[error("HTTP {status}: {raw}")]
    HttpStatus { status: u16, data: Value, raw: String },

    #[error("Invalid response body (HTTP {status}): {reason}")]
    InvalidBody {
        status: u16,
        raw: String,
        reason: String,
    },

    #[error("Transport error: {0}")]
    TransportError(Box<dyn std::error::Error + Send + Sync>),

    #[error("Event '{name}' is not emitted by {component}")]
    UnknownEvent { component: &'static str, name: String },

    #[error("OAuth error: {0}")]
    OAuthError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

fn format_error_field(data: &Value) -> String {
    match data.get("error").and_then(Value::as_str) {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl AmoError {
    /// Error code string for structured JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            AmoError::MissingDomain => "config_error",
            AmoError::ConfigError { .. } => "config_error",
            AmoError::AuthError { .. } => "auth_error",
            AmoError::HttpStatus { .. } => "http_error",
            AmoError::InvalidBody { .. } => "parse_error",
            AmoError::TransportError(_) => "transport_error",
            AmoError::UnknownEvent { .. } => "unknown_event",
            AmoError::OAuthError(_) => "oauth_error",
            AmoError::InvalidArgument(_) => "invalid_argument",
            AmoError::IoError(_) => "io_error",
        }
    }

    /// Response payload carried by auth and HTTP failures.
    pub fn data(&self) -> Option<&Value> {
        match self {
            AmoError::AuthError { data } => Some(data),
            AmoError::HttpStatus { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AmoError::HttpStatus { status, .. } => Some(*status),
            AmoError::InvalidBody { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("message".into(), Value::String(self.to_string()));
        obj.insert("code".into(), Value::String(self.code().to_string()));
        if let Some(status) = self.status() {
            obj.insert("status".into(), Value::from(status));
        }
        if let Some(data) = self.data() {
            obj.insert("data".into(), data.clone());
        }
        serde_json::json!({ "error": obj })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn display_missing_domain() {
        assert_eq!(AmoError::MissingDomain.to_string(), "Portal domain must be set");
    }

    #[test]
    fn display_auth_error_with_code() {
        let err = AmoError::AuthError {
            data: json!({"error": "invalid_grant"}),
        };
        assert_eq!(
            err.to_string(),
            "Auth error: token endpoint returned no token (invalid_grant)"
        );
    }

    #[test]
    fn display_auth_error_without_code() {
        let err = AmoError::AuthError { data: json!({}) };
        assert_eq!(err.to_string(), "Auth error: token endpoint returned no token");
    }

    #[test]
    fn display_config_error() {
        let err = AmoError::ConfigError {
            path: PathBuf::from("/home/user/.amocrm/amocrm.json"),
            detail: "invalid JSON".into(),
        };
        assert_eq!(
            err.to_string(),
            "Error in config /home/user/.amocrm/amocrm.json: invalid JSON"
        );
    }

    #[test]
    fn display_unknown_event() {
        let err = AmoError::UnknownEvent {
            component: "connection",
            name: "bogus".into(),
        };
        assert_eq!(err.to_string(), "Event 'bogus' is not emitted by connection");
    }

    #[test]
    fn error_code_mapping() {
        assert_eq!(AmoError::MissingDomain.code(), "config_error");
        assert_eq!(AmoError::AuthError { data: Value::Null }.code(), "auth_error");
        assert_eq!(
            AmoError::HttpStatus {
                status: 500,
                data: Value::Null,
                raw: String::new()
            }
            .code(),
            "http_error"
        );
        assert_eq!(
            AmoError::InvalidBody {
                status: 200,
                raw: "<html>".into(),
                reason: "expected value".into()
            }
            .code(),
            "parse_error"
        );
        assert_eq!(AmoError::TransportError("e".into()).code(), "transport_error");
        assert_eq!(AmoError::OAuthError("e".into()).code(), "oauth_error");
        assert_eq!(AmoError::InvalidArgument("e".into()).code(), "invalid_argument");
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "test");
        assert_eq!(AmoError::IoError(io_err).code(), "io_error");
    }

    #[test]
    fn data_accessor_only_for_payload_errors() {
        let err = AmoError::AuthError {
            data: json!({"error": "invalid_grant"}),
        };
        assert_eq!(err.data().unwrap()["error"], "invalid_grant");
        assert!(AmoError::MissingDomain.data().is_none());
        assert!(AmoError::OAuthError("x".into()).data().is_none());
    }

    #[test]
    fn error_to_json_structure() {
        let err = AmoError::HttpStatus {
            status: 401,
            data: json!({"title": "Unauthorized"}),
            raw: r#"{"title":"Unauthorized"}"#.into(),
        };
        let json = err.to_json();
        let obj = json.get("error").expect("should have error key");
        assert_eq!(obj["code"], "http_error");
        assert_eq!(obj["status"], 401);
        assert_eq!(obj["data"]["title"], "Unauthorized");
        assert!(obj["message"].as_str().unwrap().contains("401"));
    }
}
