use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::config::load_config;
use crate::connection::{AuthMode, Connection};
use crate::error::AmoError;
use crate::oauth::generate_state;
use crate::transports::HttpTransport;

use super::session::Session;

/// Print the authorize URL for the configured integration.
pub fn run_auth_url(
    config_path: Option<&str>,
    mode: AuthMode,
    state: Option<&str>,
) -> Result<(), AmoError> {
    let session = Session::open(config_path, None)?;
    session.connection.set_state(state.map(str::to_string));
    println!("{}", session.connection.auth_url(mode));
    Ok(())
}

/// Run the interactive authorization flow through the configured callback
/// listener and store the resulting token.
pub async fn run_login(
    config_path: Option<&str>,
    token_file: Option<&Path>,
    mode: AuthMode,
    open_browser: bool,
) -> Result<(), AmoError> {
    let mut config = load_config(config_path)?;
    if config.auth.server.is_none() {
        return Err(AmoError::ConfigError {
            path: config_path.unwrap_or("<config>").into(),
            detail: "login requires 'auth.server' (callback listener host/port)".into(),
        });
    }
    // A stale code from the config would skip the listener.
    config.auth.code = None;

    // Any stored token is ignored; login always runs the interactive flow.
    let transport = Arc::new(HttpTransport::new(false)?);
    let mut session = Session::new(Connection::from_config(&config, transport)?, token_file);
    session.connection.set_state(Some(generate_state()));

    let url = session.connection.auth_url(mode);
    eprintln!("Open this URL to authorize:\n{url}");
    if open_browser {
        if let Err(e) = webbrowser::open(&url) {
            warn!(error = %e, "failed to open browser");
        }
    }

    if !session.connection.connect().await? {
        return Err(AmoError::OAuthError("Authorization did not produce a token".into()));
    }
    session.persist_new_token()?;

    match session.connection.expires() {
        Some(expires) => println!("Authorized. Token expires at {}", expires.to_rfc3339()),
        None => println!("Authorized."),
    }
    Ok(())
}
