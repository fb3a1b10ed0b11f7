use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AmoError;

use super::env::expand_client_config;
use super::types::ClientConfig;

pub const CONFIG_ENV_VAR: &str = "AMOCRM_CONFIG";

/// Find the config file to use. The first existing candidate wins.
///
/// Precedence:
/// 1. `--config` CLI flag
/// 2. `AMOCRM_CONFIG` env var
/// 3. `./config/amocrm.json` (project-level)
/// 4. `~/.amocrm/amocrm.json` (home-level)
pub fn discover_config_file(cli_config: Option<&str>) -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(path) = cli_config {
        candidates.push(PathBuf::from(path));
    }
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("./config/amocrm.json"));
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".amocrm").join("amocrm.json"));
    }

    candidates.into_iter().find(|p| p.exists())
}

/// Load a single config file and expand environment variables in it.
pub fn load_config_file(path: &Path) -> Result<ClientConfig, AmoError> {
    let content = std::fs::read_to_string(path).map_err(|e| AmoError::ConfigError {
        path: path.to_path_buf(),
        detail: format!("Cannot read file: {e}"),
    })?;

    let mut config =
        serde_json::from_str::<ClientConfig>(&content).map_err(|e| AmoError::ConfigError {
            path: path.to_path_buf(),
            detail: format!("Invalid JSON: {e}"),
        })?;

    expand_client_config(&mut config).map_err(|e| match e {
        AmoError::ConfigError { detail, .. } => AmoError::ConfigError {
            path: path.to_path_buf(),
            detail,
        },
        other => other,
    })?;

    if config.domain.trim().is_empty() {
        return Err(AmoError::ConfigError {
            path: path.to_path_buf(),
            detail: "Field 'domain' must not be empty".into(),
        });
    }
    Ok(config)
}

/// Discover and load the client configuration.
pub fn load_config(cli_config: Option<&str>) -> Result<ClientConfig, AmoError> {
    let Some(path) = discover_config_file(cli_config) else {
        return Err(AmoError::ConfigError {
            path: PathBuf::from(cli_config.unwrap_or("./config/amocrm.json")),
            detail: "No config file found (use --config or AMOCRM_CONFIG)".into(),
        });
    };
    debug!(path = %path.display(), "loading config");
    load_config_file(&path)
}
