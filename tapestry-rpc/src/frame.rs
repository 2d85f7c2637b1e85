//! Wire frames exchanged between client and server, one JSON object per
//! packet. Every frame carries `protocol` and is tagged by `type`, following
//! this codebase's usual internally-tagged `serde(tag = "...")` enums for
//! wire payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only protocol version this crate understands.
pub const PROTOCOL_VERSION: u32 = 1;

/// Packets larger than this many encoded bytes are rejected before parsing.
pub const MAX_BYTES: usize = 65536;
/// Packets with more characters than this are rejected before parsing.
pub const MAX_CHARS: usize = 16384;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub version: String,
    #[serde(default)]
    pub mods: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    #[serde(rename = "apiHash")]
    pub api_hash: String,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello { protocol: u32, client: ClientInfo },
    RpcCall { protocol: u32, id: String, method: String, args: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    HelloAck { protocol: u32, server: ServerInfo },
    HandshakeFail { protocol: u32, reason: String },
    RpcResponse {
        protocol: u32,
        id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<RpcErrorBody>,
    },
    ServerEvent { protocol: u32, event: String, payload: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
}

impl ServerFrame {
    pub fn response_ok(id: impl Into<String>, result: Value) -> Self {
        ServerFrame::RpcResponse {
            protocol: PROTOCOL_VERSION,
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn response_err(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerFrame::RpcResponse {
            protocol: PROTOCOL_VERSION,
            id: id.into(),
            success: false,
            result: None,
            error: Some(RpcErrorBody { code: code.into(), message: message.into() }),
        }
    }

    pub fn server_event(event: impl Into<String>, payload: Value) -> Self {
        ServerFrame::ServerEvent { protocol: PROTOCOL_VERSION, event: event.into(), payload }
    }

    pub fn handshake_fail(reason: impl Into<String>) -> Self {
        ServerFrame::HandshakeFail { protocol: PROTOCOL_VERSION, reason: reason.into() }
    }
}
