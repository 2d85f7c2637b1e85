//! The central RPC dispatcher: ties the allowlist, sanitizer, rate limiter,
//! watch registry, and engine task together into the single entry point an
//! I/O layer calls for every inbound packet.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

use crate::allowlist::MethodAllowlist;
use crate::codes::RpcErrorCode;
use crate::config::RpcConfig;
use crate::connection::{ConnectionId, ConnectionState};
use crate::engine_task::EngineTask;
use crate::error_sanitize::scrub_message;
use crate::frame::{ClientFrame, ClientInfo, ServerFrame, MAX_BYTES, MAX_CHARS, PROTOCOL_VERSION};
use crate::handshake::{handle_hello, HandshakeFailure};
use crate::metrics::RpcMetrics;
use crate::rate_limit::ConnectionRateLimiter;
use crate::sanitizer::sanitize;
use crate::watch::WatchRegistry;

/// A packet rejected before it could even be parsed into a [`ClientFrame`]:
/// too large, or not valid JSON.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    TooManyBytes { bytes: usize },
    TooManyChars { chars: usize },
    Malformed { detail: String },
    UnsupportedProtocol { protocol: u32 },
}

impl IngestError {
    pub fn into_frame(self) -> ServerFrame {
        let (code, detail) = match self {
            IngestError::TooManyBytes { bytes } => {
                (RpcErrorCode::MaxPayloadSize, format!("packet is {bytes} bytes, exceeds {MAX_BYTES}"))
            }
            IngestError::TooManyChars { chars } => {
                (RpcErrorCode::MaxPayloadSize, format!("packet is {chars} characters, exceeds {MAX_CHARS}"))
            }
            IngestError::Malformed { detail } => (RpcErrorCode::InvalidArgument, detail),
            IngestError::UnsupportedProtocol { protocol } => (
                RpcErrorCode::InvalidArgument,
                format!("packet protocol {protocol} unsupported; server requires {PROTOCOL_VERSION}"),
            ),
        };
        ServerFrame::response_err("", code.as_str(), detail)
    }
}

fn protocol_of(frame: &ClientFrame) -> u32 {
    match frame {
        ClientFrame::Hello { protocol, .. } => *protocol,
        ClientFrame::RpcCall { protocol, .. } => *protocol,
    }
}

/// Parse a raw packet into a [`ClientFrame`], enforcing size bounds before
/// attempting to parse JSON at all, and the declared protocol version
/// afterward.
pub fn ingest_packet(raw: &str) -> Result<ClientFrame, IngestError> {
    if raw.len() > MAX_BYTES {
        return Err(IngestError::TooManyBytes { bytes: raw.len() });
    }
    let chars = raw.chars().count();
    if chars > MAX_CHARS {
        return Err(IngestError::TooManyChars { chars });
    }
    let frame: ClientFrame = serde_json::from_str(raw).map_err(|e| IngestError::Malformed { detail: e.to_string() })?;
    let protocol = protocol_of(&frame);
    if protocol != PROTOCOL_VERSION {
        return Err(IngestError::UnsupportedProtocol { protocol });
    }
    Ok(frame)
}

struct RejectedCall {
    code: RpcErrorCode,
    message: String,
}

impl RejectedCall {
    fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

pub struct RpcDispatcher {
    allowlist: MethodAllowlist,
    rate_limiter: ConnectionRateLimiter,
    watches: WatchRegistry,
    engine: EngineTask,
    metrics: Arc<RpcMetrics>,
    config: RpcConfig,
    strict_mod_isolation: bool,
    server_version: String,
    required_mods: Vec<String>,
    connections: DashMap<ConnectionId, ConnectionState>,
}

impl RpcDispatcher {
    pub fn new(
        allowlist: MethodAllowlist,
        config: RpcConfig,
        strict_mod_isolation: bool,
        server_version: impl Into<String>,
        required_mods: Vec<String>,
    ) -> Self {
        let engine = EngineTask::spawn(config.engine_task_capacity.unwrap_or(256));
        Self {
            allowlist,
            rate_limiter: ConnectionRateLimiter::new(),
            watches: WatchRegistry::new(),
            engine,
            metrics: Arc::new(RpcMetrics::new()),
            config,
            strict_mod_isolation,
            server_version: server_version.into(),
            required_mods,
            connections: DashMap::new(),
        }
    }

    pub fn metrics(&self) -> &RpcMetrics {
        &self.metrics
    }

    pub fn watches(&self) -> &WatchRegistry {
        &self.watches
    }

    /// Register a freshly accepted, not-yet-handshaken connection.
    pub fn register_connection(&self) -> ConnectionId {
        let conn = ConnectionId::next();
        self.connections.insert(conn, ConnectionState::default());
        conn
    }

    /// Handle a `hello` frame: on success, marks the connection ready and
    /// returns the `hello_ack` frame; on failure returns `handshake_fail`
    /// without mutating connection state.
    pub fn handle_hello(&self, conn: ConnectionId, client: &ClientInfo, client_protocol: u32) -> ServerFrame {
        match handle_hello(client, client_protocol, &self.server_version, self.allowlist.method_ids(), &self.required_mods) {
            Ok(frame) => {
                if let Some(mut state) = self.connections.get_mut(&conn) {
                    state.mark_ready(client.mods.iter().cloned().collect());
                }
                frame
            }
            Err(failure) => ServerFrame::handshake_fail(describe_handshake_failure(&failure)),
        }
    }

    /// Dispatch an `rpc_call`, returning the `rpc_response` frame to send
    /// back. Always releases whatever rate-limit slot it acquired, on every
    /// exit path.
    pub async fn dispatch_call(&self, conn: ConnectionId, id: String, method: String, args: Value) -> ServerFrame {
        let start = Instant::now();
        self.metrics.call_started();
        let outcome = self.dispatch_call_inner(conn, &method, args).await;
        self.metrics.call_finished(start.elapsed());

        match outcome {
            Ok(value) => ServerFrame::response_ok(id, value),
            Err(rejected) => {
                self.metrics.call_rejected();
                ServerFrame::response_err(id, rejected.code.as_str(), rejected.message)
            }
        }
    }

    async fn dispatch_call_inner(&self, conn: ConnectionId, method: &str, args: Value) -> Result<Value, RejectedCall> {
        let ready = self.connections.get(&conn).map(|s| s.ready).unwrap_or(false);
        if !ready {
            return Err(RejectedCall::new(RpcErrorCode::InternalError, "connection has not completed handshake"));
        }

        let entry = self
            .allowlist
            .lookup(method)
            .ok_or_else(|| RejectedCall::new(RpcErrorCode::MethodNotFound, format!("no such method '{method}'")))?
            .clone();

        if self.strict_mod_isolation {
            let installed = self.connections.get(&conn).map(|s| s.installed_mods.contains(&entry.mod_id)).unwrap_or(false);
            if !installed {
                return Err(RejectedCall::new(
                    RpcErrorCode::NamespaceAccessDenied,
                    format!("mod '{}' was not reported as installed during handshake", entry.mod_id),
                ));
            }
        }

        let sanitized_args = sanitize(&args).map_err(|e| RejectedCall::new(e.code, e.detail))?;
        let call_args = match sanitized_args {
            Value::Array(items) => items,
            other => vec![other],
        };

        self.rate_limiter
            .try_acquire(conn, Instant::now())
            .map_err(|reason| RejectedCall::new(RpcErrorCode::RateLimit, reason.to_string()))?;

        let result = self.invoke_with_timeout(entry.callable.clone(), call_args, entry.timeout).await;
        self.rate_limiter.release(conn);

        match result {
            Err(_elapsed) => Err(RejectedCall::new(RpcErrorCode::Timeout, format!("method '{method}' timed out"))),
            Ok(Err(user_error)) => Err(RejectedCall::new(RpcErrorCode::UserError, scrub_message(&user_error))),
            Ok(Ok(value)) => sanitize(&value)
                .map_err(|e| RejectedCall::new(RpcErrorCode::InvalidReturn, format!("{}: {}", e.code, e.detail))),
        }
    }

    async fn invoke_with_timeout(
        &self,
        callable: tapestry_core::Callable,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Result<Value, tapestry_core::CallableError>, tokio::time::error::Elapsed> {
        tokio::time::timeout(timeout, self.engine.invoke(callable, args)).await
    }

    /// Clean up every trace of a disconnected connection.
    pub fn disconnect(&self, conn: ConnectionId) {
        self.connections.remove(&conn);
        self.rate_limiter.remove_connection(conn);
        self.watches.remove_connection(conn);
    }

    /// Publish `payload` under `watch_key`; returns the connections to send
    /// the resulting `server_event` frame to. The caller owns the actual
    /// transport write.
    pub fn publish(&self, watch_key: &str, payload: Value) -> (ServerFrame, Vec<ConnectionId>) {
        let frame = ServerFrame::server_event(format!("watch:{watch_key}"), payload);
        (frame, self.watches.watchers(watch_key))
    }

    pub fn subscribe(&self, conn: ConnectionId, watch_key: &str) -> Result<(), crate::watch::InvalidNamespace> {
        self.watches.subscribe(watch_key, conn)
    }

    pub fn unsubscribe(&self, conn: ConnectionId, watch_key: &str) {
        self.watches.unsubscribe(watch_key, conn);
    }
}

fn describe_handshake_failure(failure: &HandshakeFailure) -> String {
    match failure {
        HandshakeFailure::UnsupportedProtocol { client_protocol } => {
            format!("client protocol {client_protocol} unsupported; server requires {PROTOCOL_VERSION}")
        }
        HandshakeFailure::MissingRequiredMod { mod_id } => format!("missing required mod '{mod_id}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tapestry_core::{CapabilityDecl, CapabilityKind, CapabilityRegistry, Callable, DeclarationTable, DescriptorBuilder};

    fn desc_with_api(id: &str, method: &str) -> tapestry_core::ExtensionDescriptor {
        DescriptorBuilder {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec![CapabilityDecl {
                name: method.to_string(),
                kind: CapabilityKind::Api,
                exclusive: false,
                config: Default::default(),
                path: None,
            }],
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    fn dispatcher_with(method: &str, callable: Callable, strict: bool) -> RpcDispatcher {
        let descs = vec![desc_with_api("alpha", method)];
        let (table, _) = DeclarationTable::build(&descs);
        let registry: CapabilityRegistry<Callable> = CapabilityRegistry::new(CapabilityKind::Api);
        registry.register(&table, "alpha", method, callable).unwrap();
        registry.freeze();
        let allowlist = MethodAllowlist::from_registry(&registry, crate::allowlist::DEFAULT_METHOD_TIMEOUT);
        RpcDispatcher::new(allowlist, RpcConfig::default(), strict, "1.0.0", vec![])
    }

    #[tokio::test]
    async fn call_before_handshake_is_rejected() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), false);
        let conn = dispatcher.register_connection();
        let frame = dispatcher.dispatch_call(conn, "r1".into(), "alpha.ping".into(), json!([])).await;
        match frame {
            ServerFrame::RpcResponse { success, error, .. } => {
                assert!(!success);
                assert_eq!(error.unwrap().code, "INTERNAL_ERROR");
            }
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn successful_call_after_handshake() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), false);
        let conn = dispatcher.register_connection();
        let client = ClientInfo { version: "1.0.0".into(), mods: vec!["alpha".into()] };
        dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);

        let frame = dispatcher.dispatch_call(conn, "r1".into(), "alpha.ping".into(), json!([])).await;
        match frame {
            ServerFrame::RpcResponse { success, result, .. } => {
                assert!(success);
                assert_eq!(result.unwrap(), json!("pong"));
            }
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), false);
        let conn = dispatcher.register_connection();
        let client = ClientInfo { version: "1.0.0".into(), mods: vec![] };
        dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);

        let frame = dispatcher.dispatch_call(conn, "r1".into(), "ghost.method".into(), json!([])).await;
        match frame {
            ServerFrame::RpcResponse { error, .. } => assert_eq!(error.unwrap().code, "METHOD_NOT_FOUND"),
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn strict_isolation_blocks_uninstalled_mod() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), true);
        let conn = dispatcher.register_connection();
        let client = ClientInfo { version: "1.0.0".into(), mods: vec![] };
        dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);

        let frame = dispatcher.dispatch_call(conn, "r1".into(), "alpha.ping".into(), json!([])).await;
        match frame {
            ServerFrame::RpcResponse { error, .. } => assert_eq!(error.unwrap().code, "NAMESPACE_ACCESS_DENIED"),
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn forbidden_key_in_args_is_rejected_by_sanitizer() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), false);
        let conn = dispatcher.register_connection();
        let client = ClientInfo { version: "1.0.0".into(), mods: vec![] };
        dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);

        let frame = dispatcher
            .dispatch_call(conn, "r1".into(), "alpha.ping".into(), json!({"__proto": 1}))
            .await;
        match frame {
            ServerFrame::RpcResponse { error, .. } => assert_eq!(error.unwrap().code, "FORBIDDEN_KEY"),
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn user_error_is_scrubbed_and_reported() {
        let dispatcher = dispatcher_with(
            "alpha.ping",
            Callable::new(|_| Err("failed talking to 10.0.0.5".to_string())),
            false,
        );
        let conn = dispatcher.register_connection();
        let client = ClientInfo { version: "1.0.0".into(), mods: vec![] };
        dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);

        let frame = dispatcher.dispatch_call(conn, "r1".into(), "alpha.ping".into(), json!([])).await;
        match frame {
            ServerFrame::RpcResponse { error, .. } => {
                let error = error.unwrap();
                assert_eq!(error.code, "USER_ERROR");
                assert_eq!(error.message, "failed talking to [IP]");
            }
            _ => panic!("expected RpcResponse"),
        }
    }

    #[tokio::test]
    async fn disconnect_clears_rate_limit_and_watch_state() {
        let dispatcher = dispatcher_with("alpha.ping", Callable::new(|_| Ok(json!("pong"))), false);
        let conn = dispatcher.register_connection();
        dispatcher.subscribe(conn, "alpha:hp").unwrap();
        dispatcher.disconnect(conn);
        assert!(dispatcher.watches.watchers("alpha:hp").is_empty());
    }

    #[test]
    fn ingest_rejects_oversized_packet() {
        let raw = "x".repeat(MAX_BYTES + 1);
        assert!(matches!(ingest_packet(&raw), Err(IngestError::TooManyBytes { .. })));
    }

    #[test]
    fn ingest_rejects_malformed_json() {
        assert!(matches!(ingest_packet("not json"), Err(IngestError::Malformed { .. })));
    }

    #[test]
    fn ingest_parses_valid_hello() {
        let raw = r#"{"type":"hello","protocol":1,"client":{"version":"1.0.0","mods":[]}}"#;
        assert!(matches!(ingest_packet(raw), Ok(ClientFrame::Hello { .. })));
    }

    #[test]
    fn ingest_rejects_rpc_call_with_wrong_protocol() {
        let raw = r#"{"type":"rpc_call","protocol":2,"id":"r1","method":"m","args":[]}"#;
        assert!(matches!(
            ingest_packet(raw),
            Err(IngestError::UnsupportedProtocol { protocol: 2 })
        ));
    }
}
