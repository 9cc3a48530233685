/*
JSON bodies exchanged during the handshake:

    server -> client   INFO {ServerInfo}\r\n
    client -> server   CONNECT {ConnectInfo}\r\n
*/

use serde::{Deserialize, Serialize};

/// Protocol revision spoken by this workspace.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default payload limit advertised by a broker (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_id: String,
    pub server_name: String,
    pub version: String,
    pub proto: u8,
    pub host: String,
    pub port: u16,
    pub max_payload: usize,
    #[serde(default)]
    pub headers: bool,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectInfo {
    /// Ask the server to acknowledge every operation with `+OK`.
    pub verbose: bool,
    pub pedantic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lang: String,
    pub version: String,
    pub protocol: u8,
    /// Deliver this connection's own publishes back to its subscriptions.
    pub echo: bool,
}

impl Default for ConnectInfo {
    fn default() -> Self {
        Self {
            verbose: false,
            pedantic: false,
            name: None,
            lang: "rust".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol: PROTOCOL_VERSION,
            echo: true,
        }
    }
}
