//! Extension descriptors: the immutable record produced during DISCOVERY.
//!
//! Follows the "parse, don't validate" discipline this codebase applies to
//! config loading (`r2e_core::config::R2eConfig`): a [`ExtensionDescriptor`]
//! can only be constructed through [`DescriptorBuilder::build`], which runs
//! every structural invariant up front. An invalid descriptor never exists as
//! a live value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Matches `^[a-z][a-z0-9_]*$`.
pub(crate) fn is_valid_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// A `MAJOR.MINOR.PATCH` version triple with numeric (not lexicographic) comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SemverTriple {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemverTriple {
    pub fn parse(s: &str) -> Result<Self, DescriptorError> {
        let parts: Vec<&str> = s.split('.').collect();
        let [maj, min, pat] = parts.as_slice() else {
            return Err(DescriptorError::InvalidVersion(s.to_string()));
        };
        let parse_part = |p: &str| p.parse::<u32>().map_err(|_| DescriptorError::InvalidVersion(s.to_string()));
        Ok(SemverTriple {
            major: parse_part(maj)?,
            minor: parse_part(min)?,
            patch: parse_part(pat)?,
        })
    }
}

impl fmt::Display for SemverTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CapabilityKind {
    Api,
    Hook,
    Service,
    #[serde(rename = "TYPE")]
    Type,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDecl {
    pub name: String,
    pub kind: CapabilityKind,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Raw, unvalidated descriptor fields as read from an extension's descriptor file.
///
/// This is the serde-facing shape; [`DescriptorBuilder::build`] turns it into
/// a validated [`ExtensionDescriptor`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescriptorBuilder {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "minFrameworkVersion", default)]
    pub min_framework_version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDecl>,
    #[serde(rename = "dependsOn", default)]
    pub required_dependencies: Vec<String>,
    #[serde(rename = "typeImports", default)]
    pub type_imports: Vec<String>,
    #[serde(rename = "typeExportEntry", default)]
    pub type_export_entry: Option<String>,
    #[serde(default = "default_entry")]
    pub entry: String,
}

fn default_entry() -> String {
    "dist/index.js".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    InvalidId(String),
    InvalidVersion(String),
    SelfDependency(String),
    TypeImportsNotSubsetOfDependencies { extension_id: String, offending: String },
    DuplicateCapabilityName { extension_id: String, name: String },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::InvalidId(id) => write!(f, "invalid extension id: '{id}'"),
            DescriptorError::InvalidVersion(v) => write!(f, "invalid version string: '{v}'"),
            DescriptorError::SelfDependency(id) => write!(f, "extension '{id}' declares a dependency on itself"),
            DescriptorError::TypeImportsNotSubsetOfDependencies { extension_id, offending } => write!(
                f,
                "extension '{extension_id}' declares typeImport '{offending}' which is not in its requiredDependencies"
            ),
            DescriptorError::DuplicateCapabilityName { extension_id, name } => write!(
                f,
                "extension '{extension_id}' declares capability '{name}' more than once"
            ),
        }
    }
}

impl std::error::Error for DescriptorError {}

/// Immutable, validated extension descriptor. Lives from DISCOVERY to process exit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    pub version: SemverTriple,
    pub min_framework_version: Option<SemverTriple>,
    pub capabilities: Vec<CapabilityDecl>,
    pub required_dependencies: Vec<String>,
    pub type_imports: Vec<String>,
    pub type_export_entry: Option<String>,
    pub entry: String,
}

impl DescriptorBuilder {
    pub fn build(self) -> Result<ExtensionDescriptor, DescriptorError> {
        if !is_valid_id(&self.id) {
            return Err(DescriptorError::InvalidId(self.id));
        }
        if self.required_dependencies.iter().any(|d| d == &self.id) {
            return Err(DescriptorError::SelfDependency(self.id));
        }
        let deps: BTreeSet<&str> = self.required_dependencies.iter().map(String::as_str).collect();
        for ti in &self.type_imports {
            if !deps.contains(ti.as_str()) {
                return Err(DescriptorError::TypeImportsNotSubsetOfDependencies {
                    extension_id: self.id,
                    offending: ti.clone(),
                });
            }
        }
        let mut seen_caps = BTreeSet::new();
        for cap in &self.capabilities {
            if !seen_caps.insert(cap.name.clone()) {
                return Err(DescriptorError::DuplicateCapabilityName {
                    extension_id: self.id,
                    name: cap.name.clone(),
                });
            }
        }
        let version = SemverTriple::parse(&self.version)?;
        let min_framework_version = self
            .min_framework_version
            .as_deref()
            .map(SemverTriple::parse)
            .transpose()?;

        Ok(ExtensionDescriptor {
            id: self.id,
            name: self.name,
            version,
            min_framework_version,
            capabilities: self.capabilities,
            required_dependencies: self.required_dependencies,
            type_imports: self.type_imports,
            type_export_entry: self.type_export_entry,
            entry: self.entry,
        })
    }
}
