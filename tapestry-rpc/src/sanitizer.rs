//! Recursive, depth-bounded sanitizer applied to every packet's whole
//! payload and to every RPC method's return value.
//!
//! Grounded on `r2e_security`'s claims-validation shape (decode, then walk
//! and reject anything outside an explicit allowlist of shapes) but
//! generalized from JWT claims to arbitrary JSON: this sanitizer has no
//! notion of a schema, only bounds. Numbers are normalized to `f64` so
//! guest-language numeric semantics stay uniform regardless of how the
//! client encoded them (integer literal vs. float).

use serde_json::{Map, Value};

use crate::codes::RpcErrorCode;

pub const MAX_DEPTH: usize = 16;
pub const MAX_STRING_LEN: usize = 32768;
pub const MAX_LIST_LEN: usize = 1024;
pub const MAX_MAP_LEN: usize = 1024;
pub const MAX_KEY_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizeError {
    pub code: RpcErrorCode,
    pub detail: String,
}

impl SanitizeError {
    fn new(code: RpcErrorCode, detail: impl Into<String>) -> Self {
        Self { code, detail: detail.into() }
    }
}

impl std::fmt::Display for SanitizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for SanitizeError {}

/// Recursively validate and normalize `value`. Returns a new `Value` with
/// every number re-wrapped as an `f64`; the input is otherwise unchanged in
/// shape. Fails closed: any unrecognized type or bound violation anywhere in
/// the tree rejects the whole payload.
pub fn sanitize(value: &Value) -> Result<Value, SanitizeError> {
    sanitize_at_depth(value, 0)
}

fn sanitize_at_depth(value: &Value, depth: usize) -> Result<Value, SanitizeError> {
    if depth > MAX_DEPTH {
        return Err(SanitizeError::new(RpcErrorCode::MaxNestingDepth, format!("depth {depth} exceeds {MAX_DEPTH}")));
    }
    match value {
        Value::Null => Ok(Value::Null),
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::Number(n) => {
            let f = n.as_f64().ok_or_else(|| {
                SanitizeError::new(RpcErrorCode::UnsupportedType, "number cannot be represented as f64")
            })?;
            Ok(serde_json::json!(f))
        }
        Value::String(s) => {
            if s.chars().count() > MAX_STRING_LEN {
                return Err(SanitizeError::new(
                    RpcErrorCode::UnsupportedType,
                    format!("string length {} exceeds {MAX_STRING_LEN}", s.chars().count()),
                ));
            }
            Ok(Value::String(s.clone()))
        }
        Value::Array(items) => {
            if items.len() > MAX_LIST_LEN {
                return Err(SanitizeError::new(
                    RpcErrorCode::MaxArrayLength,
                    format!("list length {} exceeds {MAX_LIST_LEN}", items.len()),
                ));
            }
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(sanitize_at_depth(item, depth + 1)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => sanitize_map(map, depth).map(Value::Object),
    }
}

fn sanitize_map(map: &Map<String, Value>, depth: usize) -> Result<Map<String, Value>, SanitizeError> {
    if map.len() > MAX_MAP_LEN {
        return Err(SanitizeError::new(
            RpcErrorCode::MaxObjectKeys,
            format!("map size {} exceeds {MAX_MAP_LEN}", map.len()),
        ));
    }
    let mut out = Map::new();
    for (key, value) in map {
        if key.starts_with("__") || key.starts_with('$') {
            return Err(SanitizeError::new(RpcErrorCode::ForbiddenKey, format!("key '{key}' uses a reserved prefix")));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(SanitizeError::new(RpcErrorCode::KeyTooLong, format!("key length {} exceeds {MAX_KEY_LEN}", key.len())));
        }
        out.insert(key.clone(), sanitize_at_depth(value, depth + 1)?);
    }
    Ok(out)
}
