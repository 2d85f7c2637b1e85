//! The RPC method allowlist: which registered API capabilities a client may
//! invoke, and which extension owns each for namespace isolation.
//!
//! Built from a frozen `tapestry_core::CapabilityRegistry<Callable>` snapshot
//! rather than a second bespoke registry — an RPC-callable method is exactly
//! an API capability a mod registered during REGISTRATION, so this crate
//! reuses that registry's freeze discipline and declaration-ordering instead
//! of re-implementing it.

use std::collections::HashMap;
use std::time::Duration;

use tapestry_core::{CapabilityRegistry, Callable};

pub const DEFAULT_METHOD_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub mod_id: String,
    pub callable: Callable,
    pub timeout: Duration,
}

/// A read-only, declaration-ordered view of every RPC-callable method.
/// Constructed once the API registry freezes; immutable thereafter, so
/// lookups from RPC I/O threads never contend with a write lock.
pub struct MethodAllowlist {
    methods: HashMap<String, MethodEntry>,
}

impl MethodAllowlist {
    /// Snapshot `registry` into an allowlist. Every entry gets
    /// `default_timeout` unless overridden via [`Self::with_timeout`].
    pub fn from_registry(registry: &CapabilityRegistry<Callable>, default_timeout: Duration) -> Self {
        let methods = registry
            .snapshot()
            .into_iter()
            .map(|view| {
                (
                    view.name,
                    MethodEntry { mod_id: view.extension_id, callable: view.payload, timeout: default_timeout },
                )
            })
            .collect();
        Self { methods }
    }

    pub fn with_timeout(mut self, method: &str, timeout: Duration) -> Self {
        if let Some(entry) = self.methods.get_mut(method) {
            entry.timeout = timeout;
        }
        self
    }

    pub fn lookup(&self, method: &str) -> Option<&MethodEntry> {
        self.methods.get(method)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
