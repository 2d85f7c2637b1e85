mod assertions;
mod fixtures;

pub use assertions::RpcResponseAssertions;
pub use fixtures::{
    bare_descriptor, descriptor_with_capability, echo_callable, err_callable, frozen_api_registry, ok_callable,
    ready_connection, single_method_dispatcher, FixtureCallableError,
};
