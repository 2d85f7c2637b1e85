//! Capability registries: mutable mappings that accept writes during
//! REGISTRATION and seal forever at `freeze()`.
//!
//! Grounded on `r2e_core::beans::BeanRegistry`: the declare-then-validate
//! shape (collect declarations, check them against a snapshot, then allow
//! construction) is lifted directly from `BeanRegistry::resolve`'s
//! duplicate/missing-dependency checks, generalized from "one-shot dependency
//! graph resolution" to "freeze-once registry with an open write window."

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use crate::descriptor::{CapabilityDecl, CapabilityKind, ExtensionDescriptor};

/// `(extension_id, capability_name)` pairs declared during VALIDATION.
///
/// Built once, before any registry opens, from the full set of validated
/// descriptors. Also where exclusivity conflicts are detected.
pub struct DeclarationTable {
    declared: HashSet<(String, String)>,
    by_name: HashMap<(CapabilityKind, String), Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusiveCapabilityConflict {
    pub kind: CapabilityKind,
    pub name: String,
    pub claimants: Vec<String>,
}

impl fmt::Display for ExclusiveCapabilityConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "exclusive capability '{}' ({:?}) declared by more than one extension: {:?}",
            self.name, self.kind, self.claimants
        )
    }
}

impl std::error::Error for ExclusiveCapabilityConflict {}

impl DeclarationTable {
    /// Build the table from validated descriptors, returning every
    /// exclusivity conflict found. Callers fail the involved extensions
    /// before opening any registry.
    pub fn build(descriptors: &[ExtensionDescriptor]) -> (Self, Vec<ExclusiveCapabilityConflict>) {
        let mut declared = HashSet::new();
        let mut by_name: HashMap<(CapabilityKind, String), Vec<String>> = HashMap::new();
        let mut exclusive_names: HashMap<(CapabilityKind, String), bool> = HashMap::new();

        for desc in descriptors {
            for cap in &desc.capabilities {
                declared.insert((desc.id.clone(), cap.name.clone()));
                let key = (cap.kind, cap.name.clone());
                by_name.entry(key.clone()).or_default().push(desc.id.clone());
                let is_exclusive = exclusive_names.entry(key).or_insert(false);
                *is_exclusive = *is_exclusive || cap.exclusive;
            }
        }

        let mut conflicts = Vec::new();
        for (key, claimants) in &by_name {
            let exclusive = *exclusive_names.get(key).unwrap_or(&false);
            if exclusive && claimants.len() > 1 {
                conflicts.push(ExclusiveCapabilityConflict {
                    kind: key.0,
                    name: key.1.clone(),
                    claimants: claimants.clone(),
                });
            }
        }
        conflicts.sort_by(|a, b| a.name.cmp(&b.name));

        (Self { declared, by_name }, conflicts)
    }

    pub fn is_declared(&self, extension_id: &str, cap_name: &str) -> bool {
        self.declared.contains(&(extension_id.to_string(), cap_name.to_string()))
    }

    pub fn providers_of(&self, kind: CapabilityKind, name: &str) -> &[String] {
        self.by_name
            .get(&(kind, name.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Frozen { capability: String },
    UndeclaredCapability { extension_id: String, capability: String },
    DuplicateRegistration { capability: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Frozen { capability } => write!(f, "registry is frozen, cannot register '{capability}'"),
            RegistryError::UndeclaredCapability { extension_id, capability } => write!(
                f,
                "extension '{extension_id}' did not declare capability '{capability}' during validation"
            ),
            RegistryError::DuplicateRegistration { capability } => {
                write!(f, "capability '{capability}' is already registered")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

struct Entry<P> {
    extension_id: String,
    declaration_order: u64,
    payload: P,
}

/// A read-only snapshot entry, safe to hand out to callers regardless of
/// freeze state.
#[derive(Debug, Clone)]
pub struct RegistryView<P: Clone> {
    pub name: String,
    pub extension_id: String,
    pub declaration_order: u64,
    pub payload: P,
}

/// A generic capability registry. `P` is the payload type: a callable
/// reference for API/HOOK/SERVICE capabilities, or a `.d.ts`-style text blob
/// for TYPE capabilities (see [`crate::type_resolver`]).
pub struct CapabilityRegistry<P> {
    kind: CapabilityKind,
    entries: RwLock<HashMap<String, Entry<P>>>,
    frozen: RwLock<bool>,
    next_order: std::sync::atomic::AtomicU64,
}

impl<P: Clone> CapabilityRegistry<P> {
    pub fn new(kind: CapabilityKind) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
            frozen: RwLock::new(false),
            next_order: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    pub fn is_frozen(&self) -> bool {
        *self.frozen.read().expect("registry lock poisoned")
    }

    /// Register `payload` under `cap_name`, owned by `extension_id`.
    ///
    /// Succeeds iff: not frozen, `(extension_id, cap_name)` was declared
    /// during validation, and no prior entry exists for `cap_name`.
    pub fn register(
        &self,
        declarations: &DeclarationTable,
        extension_id: &str,
        cap_name: &str,
        payload: P,
    ) -> Result<(), RegistryError> {
        if self.is_frozen() {
            return Err(RegistryError::Frozen {
                capability: cap_name.to_string(),
            });
        }
        if !declarations.is_declared(extension_id, cap_name) {
            return Err(RegistryError::UndeclaredCapability {
                extension_id: extension_id.to_string(),
                capability: cap_name.to_string(),
            });
        }
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(cap_name) {
            return Err(RegistryError::DuplicateRegistration {
                capability: cap_name.to_string(),
            });
        }
        let order = self.next_order.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        entries.insert(
            cap_name.to_string(),
            Entry {
                extension_id: extension_id.to_string(),
                declaration_order: order,
                payload,
            },
        );
        Ok(())
    }

    /// Permanently seal the registry. Idempotent.
    pub fn freeze(&self) {
        let mut frozen = self.frozen.write().expect("registry lock poisoned");
        if !*frozen {
            tracing::info!(kind = ?self.kind, "capability registry frozen");
        }
        *frozen = true;
    }

    pub fn get(&self, cap_name: &str) -> Option<P> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(cap_name)
            .map(|e| e.payload.clone())
    }

    /// A read-only, declaration-ordered snapshot of every registered entry.
    /// Always permitted, before or after freeze.
    pub fn snapshot(&self) -> Vec<RegistryView<P>> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut views: Vec<_> = entries
            .iter()
            .map(|(name, e)| RegistryView {
                name: name.clone(),
                extension_id: e.extension_id.clone(),
                declaration_order: e.declaration_order,
                payload: e.payload.clone(),
            })
            .collect();
        views.sort_by_key(|v| v.declaration_order);
        views
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Callback(pub usize);
