//! The RPC wire protocol: JSON frames over a connection-oriented transport,
//! the handshake that gates every subsequent call, and the dispatcher that
//! enforces the allowlist, namespace isolation, sanitization, and rate
//! limits around each invocation. Transport-agnostic — this crate knows
//! nothing about WebSockets, TCP, or any specific I/O runtime beyond Tokio's
//! channel and timer primitives.

pub mod allowlist;
pub mod codes;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod engine_task;
pub mod error_sanitize;
pub mod frame;
pub mod handshake;
pub mod metrics;
pub mod rate_limit;
pub mod sanitizer;
pub mod watch;

pub use allowlist::{MethodAllowlist, MethodEntry, DEFAULT_METHOD_TIMEOUT};
pub use codes::RpcErrorCode;
pub use config::RpcConfig;
pub use connection::{ConnectionId, ConnectionState};
pub use dispatcher::{ingest_packet, IngestError, RpcDispatcher};
pub use engine_task::{EngineTask, EngineTaskStopped};
pub use error_sanitize::scrub_message;
pub use frame::{ClientFrame, ClientInfo, RpcErrorBody, ServerFrame, ServerInfo, PROTOCOL_VERSION};
pub use handshake::{api_hash, handle_hello, HandshakeFailure, SERVER_FEATURES};
pub use metrics::RpcMetrics;
pub use rate_limit::{ConnectionRateLimiter, RateLimitReason};
pub use sanitizer::{sanitize, SanitizeError};
pub use watch::{InvalidNamespace, WatchRegistry};
