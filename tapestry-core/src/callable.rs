//! The opaque "callable from guest code" handle.
//!
//! The host embeds a polyglot scripting engine; this crate never depends on
//! which one. Every capability the guest registers into (an API function, a
//! hook, a service method, an overlay render callback) is modeled the same
//! way here: an `execute(args) -> value` handle with identity equality, so
//! registries can dedup and compare callables without caring what's behind
//! them. Any suspension is the guest's concern — the host always calls
//! `execute` expecting a synchronous result.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

pub type CallableError = String;

pub trait CallableFn: Send + Sync {
    fn execute(&self, args: Vec<Value>) -> Result<Value, CallableError>;
}

impl<F> CallableFn for F
where
    F: Fn(Vec<Value>) -> Result<Value, CallableError> + Send + Sync,
{
    fn execute(&self, args: Vec<Value>) -> Result<Value, CallableError> {
        self(args)
    }
}

/// A clonable, identity-comparable handle to guest-callable code.
#[derive(Clone)]
pub struct Callable(Arc<dyn CallableFn>);

impl Callable {
    pub fn new(f: impl CallableFn + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn execute(&self, args: Vec<Value>) -> Result<Value, CallableError> {
        self.0.execute(args)
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Callable {}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable(<opaque>)")
    }
}
