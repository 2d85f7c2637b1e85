//! The `hello` / `hello_ack` / `handshake_fail` exchange that precedes any
//! `rpc_call` on a connection.

use sha2::{Digest, Sha256};

use crate::frame::{ClientInfo, ServerFrame, PROTOCOL_VERSION};

pub const SERVER_FEATURES: [&str; 3] = ["rpc", "emit", "watch"];

/// SHA-256 of the sorted, newline-joined method-id list, first 10 hex
/// characters. A client compares this against its own compiled API surface
/// to detect a server/mod version mismatch before issuing calls.
pub fn api_hash(method_ids: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    let mut ids: Vec<String> = method_ids.into_iter().map(|s| s.as_ref().to_string()).collect();
    ids.sort();
    let joined = ids.join("\n");
    let digest = Sha256::digest(joined.as_bytes());
    hex::encode(digest)[..10].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    UnsupportedProtocol { client_protocol: u32 },
    MissingRequiredMod { mod_id: String },
}

impl std::fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeFailure::UnsupportedProtocol { client_protocol } => {
                write!(f, "client protocol {client_protocol} is not supported (server supports {PROTOCOL_VERSION})")
            }
            HandshakeFailure::MissingRequiredMod { mod_id } => {
                write!(f, "client is missing required mod '{mod_id}'")
            }
        }
    }
}

/// Validates a `hello` against the server's protocol version and required
/// mod list, returning either a ready `hello_ack` payload or the reason the
/// connection was rejected. Does not itself track connection state — the
/// caller (the dispatcher) marks the connection ready on `Ok`.
pub fn handle_hello(
    client: &ClientInfo,
    client_protocol: u32,
    server_version: &str,
    method_ids: impl IntoIterator<Item = impl AsRef<str>>,
    required_mods: &[String],
) -> Result<ServerFrame, HandshakeFailure> {
    if client_protocol != PROTOCOL_VERSION {
        return Err(HandshakeFailure::UnsupportedProtocol { client_protocol });
    }
    for required in required_mods {
        if !client.mods.iter().any(|m| m == required) {
            return Err(HandshakeFailure::MissingRequiredMod { mod_id: required.clone() });
        }
    }
    let hash = api_hash(method_ids);
    Ok(ServerFrame::HelloAck {
        protocol: PROTOCOL_VERSION,
        server: crate::frame::ServerInfo {
            version: server_version.to_string(),
            api_hash: hash,
            features: SERVER_FEATURES.iter().map(|s| s.to_string()).collect(),
        },
    })
}
