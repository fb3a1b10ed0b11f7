use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::credentials::ListenerConfig;
use crate::error::AmoError;

/// How long an accepted connection may stay silent before it is dropped.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><body><h1>Authorization complete</h1>\
     <p>You can close this window and return to the application.</p></body></html>";

/// Receives the OAuth redirect and yields the authorization code once.
#[async_trait]
pub trait CallbackListener: Send {
    /// Start listening. The receiver resolves with the first valid code.
    async fn run(&mut self) -> Result<oneshot::Receiver<String>, AmoError>;

    /// Stop listening and release the socket.
    async fn stop(&mut self) -> Result<(), AmoError>;
}

/// Builds a listener for a listener config and the expected `state`.
pub type ListenerFactory =
    Arc<dyn Fn(&ListenerConfig, Option<&str>) -> Box<dyn CallbackListener> + Send + Sync>;

pub fn default_listener_factory() -> ListenerFactory {
    Arc::new(build_callback_server)
}

fn build_callback_server(config: &ListenerConfig, state: Option<&str>) -> Box<dyn CallbackListener> {
    Box::new(CallbackServer::new(config.clone(), state.map(str::to_string)))
}

/// Minimal HTTP listener for the OAuth redirect.
#[derive(Debug)]
pub struct CallbackServer {
    config: ListenerConfig,
    state: Option<String>,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    pub fn new(config: ListenerConfig, state: Option<String>) -> Self {
        Self {
            config,
            state,
            local_addr: None,
            task: None,
        }
    }

    /// Bound address, available once running. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl CallbackListener for CallbackServer {
    async fn run(&mut self) -> Result<oneshot::Receiver<String>, AmoError> {
        if self.task.is_some() {
            return Err(AmoError::OAuthError("Callback listener is already running".into()));
        }
        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        self.local_addr = Some(addr);
        info!(%addr, "waiting for OAuth callback");

        let (tx, rx) = oneshot::channel();
        let path = self.config.path.clone();
        let state = self.state.clone();
        self.task = Some(tokio::spawn(accept_loop(listener, path, state, tx)));
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AmoError> {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(addr = ?self.local_addr, "callback listener stopped");
        }
        Ok(())
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Serves each connection on its own task so an idle client cannot hold up
/// the redirect. Remaining connections are aborted once a code arrives.
async fn accept_loop(
    listener: TcpListener,
    path: String,
    state: Option<String>,
    tx: oneshot::Sender<String>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let path = path.clone();
                    let state = state.clone();
                    connections.spawn(async move {
                        (peer, handle_connection(stream, &path, state.as_deref()).await)
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept callback connection"),
            },
            Some(joined) = connections.join_next() => match joined {
                Ok((_, Ok(Some(code)))) => {
                    if tx.send(code).is_err() {
                        debug!("callback receiver dropped before the code arrived");
                    }
                    return;
                }
                Ok((peer, Ok(None))) => debug!(%peer, "ignored callback request"),
                Ok((peer, Err(e))) => warn!(%peer, error = %e, "callback connection failed"),
                Err(e) => warn!(error = %e, "callback connection task failed"),
            },
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    path: &str,
    state: Option<&str>,
) -> Result<Option<String>, AmoError> {
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| {
            AmoError::OAuthError(format!(
                "Callback connection sent no request within {}s",
                READ_TIMEOUT.as_secs()
            ))
        })??;
    let request = String::from_utf8_lossy(&buf[..n]);

    let (status, body, code) = match parse_callback(&request, path, state) {
        CallbackOutcome::Code(code) => ("200 OK", SUCCESS_PAGE.to_string(), Some(code)),
        CallbackOutcome::Rejected { status, reason } => (status, reason.to_string(), None),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len(),
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(code)
}

#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Rejected {
        status: &'static str,
        reason: &'static str,
    },
}

fn parse_callback(request: &str, expected_path: &str, expected_state: Option<&str>) -> CallbackOutcome {
    let target = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1));
    let Some(target) = target else {
        return CallbackOutcome::Rejected {
            status: "400 Bad Request",
            reason: "Malformed request",
        };
    };
    let Ok(url) = url::Url::parse(&format!("http://localhost{target}")) else {
        return CallbackOutcome::Rejected {
            status: "400 Bad Request",
            reason: "Malformed request target",
        };
    };
    if url.path() != expected_path {
        return CallbackOutcome::Rejected {
            status: "404 Not Found",
            reason: "Not found",
        };
    }

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(expected) = expected_state {
        if state.as_deref() != Some(expected) {
            return CallbackOutcome::Rejected {
                status: "400 Bad Request",
                reason: "State mismatch",
            };
        }
    }

    match code {
        Some(code) => CallbackOutcome::Code(code),
        None => CallbackOutcome::Rejected {
            status: "400 Bad Request",
            reason: "No authorization code in callback",
        },
    }
}
