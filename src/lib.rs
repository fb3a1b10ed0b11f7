pub mod args;
pub mod cli;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod encoding;
pub mod error;
pub mod events;
pub mod oauth;
pub mod queue;
pub mod request;
pub mod response;
pub mod token;
pub mod transport;
pub mod transports;

pub use config::{load_config, ClientConfig};
pub use connection::{AuthMode, Connection, ConnectionState};
pub use credentials::{Credentials, ListenerConfig};
pub use error::AmoError;
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use request::{DomainRequest, RequestOptions};
pub use response::{DomainResponse, RawResponse, ResponseInfo, ResponseOptions};
pub use token::{Token, TokenStore};
pub use transport::{Transport, TransportRequest};
pub use transports::HttpTransport;

/// One-shot convenience: load config, connect if needed, GET `path`.
pub async fn get_once(
    config_path: Option<&str>,
    path: &str,
    query: serde_json::Value,
) -> Result<DomainResponse, AmoError> {
    let config = load_config(config_path)?;
    let transport = std::sync::Arc::new(HttpTransport::new(false)?);
    let connection = Connection::from_config(&config, transport)?;
    connection.get(path, &query).await
}
