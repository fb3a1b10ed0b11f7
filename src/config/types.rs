use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;

/// On-disk client configuration: the account domain plus OAuth credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub domain: String,
    pub auth: Credentials,
}
