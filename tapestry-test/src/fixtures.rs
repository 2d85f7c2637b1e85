//! Fixture builders for descriptors, registries, and dispatchers.
//!
//! Grounded on `r2e_test::app::TestApp::from_builder`: just as that wraps an
//! `AppBuilder` into an in-process HTTP client without binding a port, these
//! helpers wrap descriptor/registry/dispatcher construction so a test can
//! get a ready-to-call fixture in one line instead of repeating the
//! declare-freeze-handshake boilerplate every test module otherwise needs.

use std::time::Duration;

use serde_json::Value;

use tapestry_core::{
    CapabilityDecl, CapabilityKind, CapabilityRegistry, Callable, CallableError, DeclarationTable, DescriptorBuilder,
    ExtensionDescriptor,
};
use tapestry_rpc::{ClientInfo, ConnectionId, MethodAllowlist, RpcConfig, RpcDispatcher, PROTOCOL_VERSION};

/// A minimal valid descriptor declaring a single capability, for tests that
/// only care about one method.
pub fn descriptor_with_capability(id: &str, kind: CapabilityKind, cap_name: &str) -> ExtensionDescriptor {
    DescriptorBuilder {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0.0".to_string(),
        capabilities: vec![CapabilityDecl {
            name: cap_name.to_string(),
            kind,
            exclusive: false,
            config: Default::default(),
            path: None,
        }],
        ..Default::default()
    }
    .build()
    .expect("fixture descriptor is always valid")
}

/// A bare descriptor with no capabilities, for tests exercising lifecycle or
/// discovery machinery that doesn't care about capability wiring.
pub fn bare_descriptor(id: &str) -> ExtensionDescriptor {
    DescriptorBuilder { id: id.to_string(), name: id.to_string(), version: "1.0.0".to_string(), ..Default::default() }
        .build()
        .expect("fixture descriptor is always valid")
}

/// A trivial callable that always returns `Ok(result)`.
pub fn ok_callable(result: Value) -> Callable {
    Callable::new(move |_args: Vec<Value>| Ok(result.clone()))
}

/// A trivial callable that always fails with `message`.
pub fn err_callable(message: impl Into<String>) -> Callable {
    let message = message.into();
    Callable::new(move |_args: Vec<Value>| Err(message.clone()))
}

/// A callable that echoes back whatever argument vector it was called with.
pub fn echo_callable() -> Callable {
    Callable::new(|args: Vec<Value>| Ok(Value::Array(args)))
}

/// Build a frozen API registry with one capability, `callable` behind
/// `"<owner_id>.<method>"`-style `cap_name`.
pub fn frozen_api_registry(owner_id: &str, cap_name: &str, callable: Callable) -> CapabilityRegistry<Callable> {
    let descs = vec![descriptor_with_capability(owner_id, CapabilityKind::Api, cap_name)];
    let (table, conflicts) = DeclarationTable::build(&descs);
    assert!(conflicts.is_empty(), "fixture descriptor produced unexpected exclusivity conflicts");
    let registry: CapabilityRegistry<Callable> = CapabilityRegistry::new(CapabilityKind::Api);
    registry.register(&table, owner_id, cap_name, callable).expect("fixture registration cannot fail");
    registry.freeze();
    registry
}

/// An `RpcDispatcher` exposing exactly one method, owned by `owner_id`.
pub fn single_method_dispatcher(owner_id: &str, method: &str, callable: Callable, strict_mod_isolation: bool) -> RpcDispatcher {
    let registry = frozen_api_registry(owner_id, method, callable);
    let allowlist = MethodAllowlist::from_registry(&registry, Duration::from_secs(5));
    RpcDispatcher::new(allowlist, RpcConfig::default(), strict_mod_isolation, "0.0.0-test", vec![])
}

/// Register a connection and immediately complete its handshake as if
/// `mods` were reported installed. Panics if the handshake fails — fixtures
/// are meant to always produce a ready connection.
pub fn ready_connection(dispatcher: &RpcDispatcher, mods: &[&str]) -> ConnectionId {
    let conn = dispatcher.register_connection();
    let client = ClientInfo { version: "0.0.0-test".to_string(), mods: mods.iter().map(|m| m.to_string()).collect() };
    let frame = dispatcher.handle_hello(conn, &client, PROTOCOL_VERSION);
    match frame {
        tapestry_rpc::ServerFrame::HelloAck { .. } => conn,
        other => panic!("fixture handshake was expected to succeed, got {other:?}"),
    }
}

pub type FixtureCallableError = CallableError;
