use std::iter::Peekable;
use std::str::Chars;

use crate::error::AmoError;

use super::types::ClientConfig;

/// Expand environment variable references in a string.
///
/// Supported syntaxes:
/// - `${VAR}` - replaced with env var value; error if unset
/// - `${VAR:-fallback}` - env var value, or fallback if unset or empty
/// - `$env:VAR` - same as `${VAR}`
pub fn expand_env_vars(input: &str) -> Result<String, AmoError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'{') {
            chars.next();
            result.push_str(&expand_braced(&mut chars)?);
            continue;
        }

        if chars.clone().take(4).eq("env:".chars()) {
            for _ in 0..4 {
                chars.next();
            }
            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    var_name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                return Err(env_error("Empty variable name in $env: reference"));
            }
            result.push_str(&required_var(&var_name)?);
            continue;
        }

        result.push('$');
    }

    Ok(result)
}

fn expand_braced(chars: &mut Peekable<Chars<'_>>) -> Result<String, AmoError> {
    let mut var_expr = String::new();
    let mut found_close = false;
    for c in chars.by_ref() {
        if c == '}' {
            found_close = true;
            break;
        }
        var_expr.push(c);
    }
    if !found_close {
        return Err(env_error(&format!(
            "Unclosed variable reference: ${{{var_expr}"
        )));
    }

    match var_expr.split_once(":-") {
        Some((var_name, fallback)) => match std::env::var(var_name) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(fallback.to_string()),
        },
        None => required_var(&var_expr),
    }
}

fn required_var(name: &str) -> Result<String, AmoError> {
    std::env::var(name)
        .map_err(|_| env_error(&format!("Environment variable '{name}' is not set")))
}

/// Expand environment variables in every string field of a [`ClientConfig`].
pub fn expand_client_config(config: &mut ClientConfig) -> Result<(), AmoError> {
    config.domain = expand_env_vars(&config.domain)?;

    let auth = &mut config.auth;
    auth.client_id = expand_env_vars(&auth.client_id)?;
    auth.client_secret = expand_env_vars(&auth.client_secret)?;
    auth.redirect_uri = expand_env_vars(&auth.redirect_uri)?;
    if let Some(ref mut code) = auth.code {
        *code = expand_env_vars(code)?;
    }
    if let Some(ref mut server) = auth.server {
        server.host = expand_env_vars(&server.host)?;
        server.path = expand_env_vars(&server.path)?;
    }
    Ok(())
}

fn env_error(detail: &str) -> AmoError {
    AmoError::ConfigError {
        path: std::path::PathBuf::from("<env>"),
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, ListenerConfig};

    #[test]
    fn expand_dollar_brace_var() {
        std::env::set_var("AMOCRM_TEST_VAR1", "hello");
        let result = expand_env_vars("prefix-${AMOCRM_TEST_VAR1}-suffix").unwrap();
        assert_eq!(result, "prefix-hello-suffix");
        std::env::remove_var("AMOCRM_TEST_VAR1");
    }

    #[test]
    fn expand_dollar_brace_unset_errors() {
        std::env::remove_var("AMOCRM_TEST_UNSET_XYZ");
        let err = expand_env_vars("${AMOCRM_TEST_UNSET_XYZ}").unwrap_err();
        assert!(err.to_string().contains("AMOCRM_TEST_UNSET_XYZ"));
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn expand_fallback_when_unset() {
        std::env::remove_var("AMOCRM_TEST_FB_UNSET");
        let result = expand_env_vars("${AMOCRM_TEST_FB_UNSET:-default_val}").unwrap();
        assert_eq!(result, "default_val");
    }

    #[test]
    fn expand_fallback_when_empty() {
        std::env::set_var("AMOCRM_TEST_FB_EMPTY", "");
        let result = expand_env_vars("${AMOCRM_TEST_FB_EMPTY:-fallback}").unwrap();
        assert_eq!(result, "fallback");
        std::env::remove_var("AMOCRM_TEST_FB_EMPTY");
    }

    #[test]
    fn expand_env_colon_var() {
        std::env::set_var("AMOCRM_TEST_ENV_COLON", "envval");
        let result = expand_env_vars("secret-$env:AMOCRM_TEST_ENV_COLON/x").unwrap();
        assert_eq!(result, "secret-envval/x");
        std::env::remove_var("AMOCRM_TEST_ENV_COLON");
    }

    #[test]
    fn unclosed_reference_errors() {
        let err = expand_env_vars("${OPEN").unwrap_err();
        assert!(err.to_string().contains("Unclosed"));
    }

    #[test]
    fn lone_dollar_is_literal() {
        assert_eq!(expand_env_vars("cost $5").unwrap(), "cost $5");
        assert_eq!(expand_env_vars("plain").unwrap(), "plain");
    }

    #[test]
    fn expand_client_config_expands_all_fields() {
        std::env::set_var("AMOCRM_TEST_CC_DOMAIN", "acme");
        std::env::set_var("AMOCRM_TEST_CC_SECRET", "s3cr3t");

        let mut cfg = ClientConfig {
            domain: "${AMOCRM_TEST_CC_DOMAIN}".into(),
            auth: Credentials::new("id", "$env:AMOCRM_TEST_CC_SECRET", "${AMOCRM_TEST_CC_UNSET:-http://localhost:3000}")
                .with_server(ListenerConfig::new("${AMOCRM_TEST_CC_HOST:-0.0.0.0}", 3000)),
        };
        expand_client_config(&mut cfg).unwrap();

        assert_eq!(cfg.domain, "acme");
        assert_eq!(cfg.auth.client_secret, "s3cr3t");
        assert_eq!(cfg.auth.redirect_uri, "http://localhost:3000");
        assert_eq!(cfg.auth.server.unwrap().host, "0.0.0.0");

        std::env::remove_var("AMOCRM_TEST_CC_DOMAIN");
        std::env::remove_var("AMOCRM_TEST_CC_SECRET");
    }
}
