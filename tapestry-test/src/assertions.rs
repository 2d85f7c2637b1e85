//! Assertion helpers for `rpc_response` frames.
//!
//! Grounded on `r2e_test::app::TestResponse`'s `assert_ok`/`assert_status`
//! chaining, retargeted from HTTP status codes to the wire's
//! `success`/`error.code` fields.

use serde::de::DeserializeOwned;
use serde_json::Value;

use tapestry_rpc::ServerFrame;

pub trait RpcResponseAssertions {
    /// Assert the call succeeded, returning the raw `result` value.
    fn assert_ok(self) -> Value;

    /// Assert the call failed with the given `error.code`, returning the
    /// error message.
    fn assert_err_code(self, code: &str) -> String;

    /// Assert the call succeeded and deserialize `result` as `T`.
    fn assert_ok_as<T: DeserializeOwned>(self) -> T;
}

impl RpcResponseAssertions for ServerFrame {
    fn assert_ok(self) -> Value {
        match self {
            ServerFrame::RpcResponse { success: true, result, .. } => {
                result.expect("successful rpc_response always carries a result")
            }
            other => panic!("expected a successful rpc_response, got {other:?}"),
        }
    }

    fn assert_err_code(self, code: &str) -> String {
        match self {
            ServerFrame::RpcResponse { success: false, error: Some(error), .. } => {
                assert_eq!(error.code, code, "unexpected error code");
                error.message
            }
            other => panic!("expected a failed rpc_response with code '{code}', got {other:?}"),
        }
    }

    fn assert_ok_as<T: DeserializeOwned>(self) -> T {
        let value = self.assert_ok();
        serde_json::from_value(value.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize rpc_response result: {e}\nvalue: {value:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_ok_extracts_result() {
        let frame = ServerFrame::response_ok("r1", serde_json::json!({"hp": 10}));
        assert_eq!(frame.assert_ok(), serde_json::json!({"hp": 10}));
    }

    #[test]
    fn assert_err_code_extracts_message() {
        let frame = ServerFrame::response_err("r1", "METHOD_NOT_FOUND", "no such method 'x'");
        assert_eq!(frame.assert_err_code("METHOD_NOT_FOUND"), "no such method 'x'");
    }

    #[test]
    #[should_panic(expected = "expected a successful rpc_response")]
    fn assert_ok_panics_on_error_frame() {
        let frame = ServerFrame::response_err("r1", "INTERNAL_ERROR", "boom");
        frame.assert_ok();
    }
}
