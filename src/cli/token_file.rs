use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AmoError;
use crate::token::Token;

/// Token persisted between CLI runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: Token,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    /// Instant the token was issued, recovered from its expiry.
    pub fn observed_at(&self) -> DateTime<Utc> {
        chrono::TimeDelta::try_seconds(self.token.expires_in)
            .and_then(|ttl| self.expires_at.checked_sub_signed(ttl))
            .unwrap_or(self.expires_at)
    }
}

/// Read a stored token. A missing file is not an error.
pub fn load_token(path: &Path) -> Result<Option<StoredToken>, AmoError> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| AmoError::ConfigError {
            path: path.to_path_buf(),
            detail: format!("Invalid token file: {e}"),
        })
}

pub fn save_token(path: &Path, token: &Token, expires_at: DateTime<Utc>) -> Result<(), AmoError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let stored = StoredToken {
        token: token.clone(),
        expires_at,
    };
    let data = serde_json::to_string_pretty(&stored)
        .map_err(|e| AmoError::OAuthError(format!("Failed to serialize token: {e}")))?;
    std::fs::write(path, data)?;
    restrict_permissions(path)?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AmoError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AmoError> {
    Ok(())
}
