//! Wire error codes. Each is a fixed `SCREAMING_SNAKE_CASE` string sent
//! verbatim in `rpc_response.error.code`.
//!
//! Sanitizer violations are sent with their own granular code
//! (`FORBIDDEN_KEY`, `MAX_ARRAY_LENGTH`, etc.) as `error.code`, rather
//! than a generic `INVALID_ARGUMENT` with the detail buried in `message`.
//! See DESIGN.md for the rationale. This keeps every code in the wire
//! error-code list independently matchable by a client.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    MethodNotFound,
    NamespaceAccessDenied,
    InvalidArgument,
    UserError,
    InvalidReturn,
    InternalError,
    Timeout,
    RateLimit,
    MaxPayloadSize,
    MaxNestingDepth,
    MaxArrayLength,
    MaxObjectKeys,
    ForbiddenKey,
    KeyTooLong,
    UnsupportedType,
}

impl RpcErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcErrorCode::MethodNotFound => "METHOD_NOT_FOUND",
            RpcErrorCode::NamespaceAccessDenied => "NAMESPACE_ACCESS_DENIED",
            RpcErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcErrorCode::UserError => "USER_ERROR",
            RpcErrorCode::InvalidReturn => "INVALID_RETURN",
            RpcErrorCode::InternalError => "INTERNAL_ERROR",
            RpcErrorCode::Timeout => "TIMEOUT",
            RpcErrorCode::RateLimit => "RATE_LIMIT",
            RpcErrorCode::MaxPayloadSize => "MAX_PAYLOAD_SIZE",
            RpcErrorCode::MaxNestingDepth => "MAX_NESTING_DEPTH",
            RpcErrorCode::MaxArrayLength => "MAX_ARRAY_LENGTH",
            RpcErrorCode::MaxObjectKeys => "MAX_OBJECT_KEYS",
            RpcErrorCode::ForbiddenKey => "FORBIDDEN_KEY",
            RpcErrorCode::KeyTooLong => "KEY_TOO_LONG",
            RpcErrorCode::UnsupportedType => "UNSUPPORTED_TYPE",
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_format_as_screaming_snake_case() {
        assert_eq!(RpcErrorCode::MethodNotFound.as_str(), "METHOD_NOT_FOUND");
        assert_eq!(RpcErrorCode::ForbiddenKey.to_string(), "FORBIDDEN_KEY");
    }
}
