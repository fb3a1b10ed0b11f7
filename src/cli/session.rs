use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;

use crate::config::{load_config, ClientConfig};
use crate::connection::Connection;
use crate::error::AmoError;
use crate::events::{Event, EventKind};
use crate::transports::HttpTransport;

use super::token_file::{load_token, save_token};

/// A configured connection plus the file its token is persisted to.
#[derive(Debug)]
pub struct Session {
    pub connection: Connection,
    token_file: Option<PathBuf>,
    events: broadcast::Receiver<Event>,
}

impl Session {
    pub fn new(connection: Connection, token_file: Option<&Path>) -> Self {
        let events = connection.subscribe();
        Self {
            connection,
            token_file: token_file.map(Path::to_path_buf),
            events,
        }
    }

    /// Load config and any stored token, and build the connection.
    pub fn open(config_path: Option<&str>, token_file: Option<&Path>) -> Result<Self, AmoError> {
        let config = load_config(config_path)?;
        Self::from_config(&config, token_file)
    }

    pub fn from_config(config: &ClientConfig, token_file: Option<&Path>) -> Result<Self, AmoError> {
        let transport = Arc::new(HttpTransport::new(false)?);
        let connection = Connection::from_config(config, transport)?;
        if let Some(path) = token_file {
            if let Some(stored) = load_token(path)? {
                debug!(path = %path.display(), "loaded stored token");
                connection.set_token(stored.token.clone(), stored.observed_at());
            }
        }
        Ok(Self::new(connection, token_file))
    }

    /// Write the current token to the token file if a `newToken` event was
    /// seen since the last call. Returns whether the file was written.
    pub fn persist_new_token(&mut self) -> Result<bool, AmoError> {
        let mut renewed = false;
        loop {
            match self.events.try_recv() {
                Ok(event) if event.kind == EventKind::NewToken => renewed = true,
                Ok(_) => {}
                Err(TryRecvError::Lagged(_)) => renewed = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if !renewed {
            return Ok(false);
        }

        let Some(path) = &self.token_file else {
            return Ok(false);
        };
        let (Some(token), Some(expires_at)) =
            (self.connection.get_token(), self.connection.expires())
        else {
            return Ok(false);
        };
        save_token(path, &token, expires_at)?;
        debug!(path = %path.display(), "stored renewed token");
        Ok(true)
    }
}
