//! The virtual `@tapestry/<extId>` type-contract namespace.
//!
//! Mirrors the freeze-on-a-phase-boundary discipline of [`crate::registry`]
//! (a `TypeRegistry` is writable until it freezes, reads are always
//! permitted) but adds the two things unique to type resolution: a
//! thread-local "current extension" context the caller must set before
//! resolving, and file-level validation of the published `.d.ts` source
//! itself rather than of a callable payload.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

use crate::descriptor::{is_valid_id, ExtensionDescriptor};

pub const MAX_DTS_SIZE_BYTES: usize = 1024 * 1024;
pub const SYNTHETIC_STUB: &str = "export {};";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    TypeOnly,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    Frozen,
    FileTooLarge { bytes: usize },
    AmbientDeclarationForbidden { construct: &'static str },
    NoExportStatement,
    InvalidNamespace { path: String },
    NoCurrentExtension,
    RuntimeImportForbidden,
    UndeclaredTypeImport { caller: String, target: String },
    TargetDoesNotExportTypes { target: String },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::Frozen => write!(f, "type registry is frozen"),
            TypeError::FileTooLarge { bytes } => {
                write!(f, "type export file is {bytes} bytes, exceeds the {MAX_DTS_SIZE_BYTES}-byte limit")
            }
            TypeError::AmbientDeclarationForbidden { construct } => {
                write!(f, "type export file contains forbidden ambient declaration '{construct}'")
            }
            TypeError::NoExportStatement => write!(f, "type export file contains no export statement"),
            TypeError::InvalidNamespace { path } => write!(f, "invalid tapestry type namespace: '{path}'"),
            TypeError::NoCurrentExtension => write!(f, "no current extension set for type resolution"),
            TypeError::RuntimeImportForbidden => write!(f, "only type-only imports may resolve through @tapestry/*"),
            TypeError::UndeclaredTypeImport { caller, target } => write!(
                f,
                "extension '{caller}' did not declare a typeImport on '{target}'"
            ),
            TypeError::TargetDoesNotExportTypes { target } => {
                write!(f, "extension '{target}' does not publish a type module")
            }
        }
    }
}

impl std::error::Error for TypeError {}

fn validate_dts_source(source: &str) -> Result<(), TypeError> {
    if source.len() > MAX_DTS_SIZE_BYTES {
        return Err(TypeError::FileTooLarge { bytes: source.len() });
    }
    if source.contains("declare global") {
        return Err(TypeError::AmbientDeclarationForbidden { construct: "declare global" });
    }
    if source.contains("declare module") {
        return Err(TypeError::AmbientDeclarationForbidden { construct: "declare module" });
    }
    if !source.contains("export") {
        return Err(TypeError::NoExportStatement);
    }
    Ok(())
}

/// `@tapestry/<extId>` with no subpath, case-sensitive.
fn parse_namespace(path: &str) -> Result<String, TypeError> {
    let rest = path
        .strip_prefix("@tapestry/")
        .ok_or_else(|| TypeError::InvalidNamespace { path: path.to_string() })?;
    if rest.is_empty() || rest.contains('/') {
        return Err(TypeError::InvalidNamespace { path: path.to_string() });
    }
    Ok(rest.to_string())
}

thread_local! {
    static CURRENT_EXTENSION: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Set the "current extension" context for the calling thread. The guest
/// toolchain's module loader calls this before resolving any import.
pub fn set_current_extension(extension_id: &str) {
    CURRENT_EXTENSION.with(|c| *c.borrow_mut() = Some(extension_id.to_string()));
}

pub fn clear_current_extension() {
    CURRENT_EXTENSION.with(|c| *c.borrow_mut() = None);
}

pub fn current_extension() -> Option<String> {
    CURRENT_EXTENSION.with(|c| c.borrow().clone())
}

/// Stores published `.d.ts` sources and each extension's declared
/// `typeImports`, and resolves `@tapestry/*` imports against both.
pub struct TypeRegistry {
    frozen: RwLock<bool>,
    modules: RwLock<HashMap<String, String>>,
    declared_type_imports: HashMap<String, HashSet<String>>,
}

impl TypeRegistry {
    pub fn new(descriptors: &[ExtensionDescriptor]) -> Self {
        let declared_type_imports = descriptors
            .iter()
            .map(|d| (d.id.clone(), d.type_imports.iter().cloned().collect()))
            .collect();
        Self {
            frozen: RwLock::new(false),
            modules: RwLock::new(HashMap::new()),
            declared_type_imports,
        }
    }

    pub fn is_frozen(&self) -> bool {
        *self.frozen.read().expect("type registry lock poisoned")
    }

    pub fn freeze(&self) {
        *self.frozen.write().expect("type registry lock poisoned") = true;
    }

    /// Publish `dts_source` as `extension_id`'s type module. Validated
    /// before the write: size, no ambient declarations, at least one
    /// export statement.
    pub fn publish(&self, extension_id: &str, dts_source: &str) -> Result<(), TypeError> {
        if self.is_frozen() {
            return Err(TypeError::Frozen);
        }
        validate_dts_source(dts_source)?;
        self.modules
            .write()
            .expect("type registry lock poisoned")
            .insert(extension_id.to_string(), dts_source.to_string());
        Ok(())
    }

    pub fn exports_types(&self, extension_id: &str) -> bool {
        self.modules.read().expect("type registry lock poisoned").contains_key(extension_id)
    }

    /// Resolve `path` on behalf of whichever extension is set via
    /// [`set_current_extension`] for the calling thread.
    pub fn resolve_module(&self, path: &str, kind: ImportKind) -> Result<String, TypeError> {
        if kind == ImportKind::Value {
            return Err(TypeError::RuntimeImportForbidden);
        }
        let caller = current_extension().ok_or(TypeError::NoCurrentExtension)?;
        let target = parse_namespace(path)?;
        if !is_valid_id(&target) {
            return Err(TypeError::InvalidNamespace { path: path.to_string() });
        }
        let declared = self
            .declared_type_imports
            .get(&caller)
            .map(|set| set.contains(&target))
            .unwrap_or(false);
        if !declared {
            return Err(TypeError::UndeclaredTypeImport { caller, target });
        }
        if !self.exports_types(&target) {
            return Err(TypeError::TargetDoesNotExportTypes { target });
        }
        Ok(SYNTHETIC_STUB.to_string())
    }
}
