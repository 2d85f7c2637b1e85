//! Per-extension persistent state: one JSON file per extension, gated on
//! `PhaseController::requireAtLeast(PERSISTENCE_READY)`.
//!
//! Writes go through a write-to-temp-then-rename, so a crash mid-write
//! never leaves a half-written file where a reader expects a complete one —
//! the same durability shape this codebase applies to config and registry
//! file writes elsewhere, generalized to per-extension save files.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::{Map, Value};

use tapestry_core::{Phase, PhaseController, PhaseError};

pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug)]
pub enum PersistenceError {
    NotReady(PhaseError),
    Io(std::io::Error),
    Serde(serde_json::Error),
    SchemaVersionMismatch { found: Option<u64>, expected: u64 },
    CorruptFile { extension_id: String },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::NotReady(e) => write!(f, "{e}"),
            PersistenceError::Io(e) => write!(f, "persistence I/O error: {e}"),
            PersistenceError::Serde(e) => write!(f, "persistence JSON error: {e}"),
            PersistenceError::SchemaVersionMismatch { found, expected } => write!(
                f,
                "persistence file schema version {found:?} does not match expected {expected}"
            ),
            PersistenceError::CorruptFile { extension_id } => {
                write!(f, "persistence file for '{extension_id}' is not a JSON object")
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<PhaseError> for PersistenceError {
    fn from(e: PhaseError) -> Self {
        PersistenceError::NotReady(e)
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        PersistenceError::Io(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serde(e)
    }
}

struct Store {
    data: Map<String, Value>,
    dirty: bool,
}

/// Per-extension namespaced JSON store.
pub struct PersistenceService {
    phase: std::sync::Arc<PhaseController>,
    root: PathBuf,
    stores: RwLock<HashMap<String, Store>>,
}

impl PersistenceService {
    pub fn new(phase: std::sync::Arc<PhaseController>, root: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            root: root.into(),
            stores: RwLock::new(HashMap::new()),
        }
    }

    fn file_path(&self, extension_id: &str) -> PathBuf {
        self.root.join(format!("{extension_id}.json"))
    }

    fn ensure_loaded(&self, extension_id: &str) -> Result<(), PersistenceError> {
        if self.stores.read().expect("persistence lock poisoned").contains_key(extension_id) {
            return Ok(());
        }
        let data = load_from_disk(&self.file_path(extension_id), extension_id)?;
        self.stores
            .write()
            .expect("persistence lock poisoned")
            .entry(extension_id.to_string())
            .or_insert(Store { data, dirty: false });
        Ok(())
    }

    pub fn set(&self, extension_id: &str, key: &str, value: Value) -> Result<(), PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        let mut stores = self.stores.write().expect("persistence lock poisoned");
        let store = stores.get_mut(extension_id).expect("just ensured loaded");
        store.data.insert(key.to_string(), value);
        store.dirty = true;
        Ok(())
    }

    pub fn get(&self, extension_id: &str, key: &str) -> Result<Option<Value>, PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        Ok(self
            .stores
            .read()
            .expect("persistence lock poisoned")
            .get(extension_id)
            .and_then(|s| s.data.get(key))
            .cloned())
    }

    pub fn has(&self, extension_id: &str, key: &str) -> Result<bool, PersistenceError> {
        Ok(self.get(extension_id, key)?.is_some())
    }

    pub fn delete(&self, extension_id: &str, key: &str) -> Result<bool, PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        let mut stores = self.stores.write().expect("persistence lock poisoned");
        let store = stores.get_mut(extension_id).expect("just ensured loaded");
        let removed = store.data.remove(key).is_some();
        if removed {
            store.dirty = true;
        }
        Ok(removed)
    }

    pub fn keys(&self, extension_id: &str) -> Result<Vec<String>, PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        Ok(self
            .stores
            .read()
            .expect("persistence lock poisoned")
            .get(extension_id)
            .map(|s| s.data.keys().cloned().collect())
            .unwrap_or_default())
    }

    pub fn get_all(&self, extension_id: &str) -> Result<Map<String, Value>, PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        Ok(self
            .stores
            .read()
            .expect("persistence lock poisoned")
            .get(extension_id)
            .map(|s| s.data.clone())
            .unwrap_or_default())
    }

    pub fn clear(&self, extension_id: &str) -> Result<(), PersistenceError> {
        self.phase.require_at_least(Phase::PersistenceReady)?;
        self.ensure_loaded(extension_id)?;
        let mut stores = self.stores.write().expect("persistence lock poisoned");
        let store = stores.get_mut(extension_id).expect("just ensured loaded");
        store.data.clear();
        store.dirty = true;
        Ok(())
    }

    /// Flush `extension_id`'s in-memory store to disk, unconditionally.
    pub fn save(&self, extension_id: &str) -> Result<(), PersistenceError> {
        self.ensure_loaded(extension_id)?;
        let mut stores = self.stores.write().expect("persistence lock poisoned");
        let store = stores.get_mut(extension_id).expect("just ensured loaded");
        write_to_disk(&self.root, &self.file_path(extension_id), &store.data)?;
        store.dirty = false;
        Ok(())
    }

    /// Flush every extension store that has unsaved changes. Called on
    /// shutdown.
    pub fn save_all(&self) -> Result<(), PersistenceError> {
        let ids: Vec<String> = {
            let stores = self.stores.read().expect("persistence lock poisoned");
            stores.iter().filter(|(_, s)| s.dirty).map(|(id, _)| id.clone()).collect()
        };
        for id in ids {
            self.save(&id)?;
        }
        Ok(())
    }
}

fn load_from_disk(path: &Path, extension_id: &str) -> Result<Map<String, Value>, PersistenceError> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let contents = fs::read_to_string(path)?;
    let raw: Value = serde_json::from_str(&contents)?;
    let mut obj = match raw {
        Value::Object(obj) => obj,
        _ => return Err(PersistenceError::CorruptFile { extension_id: extension_id.to_string() }),
    };

    match obj.remove("schemaVersion") {
        None => {
            tracing::warn!(extension = extension_id, "migrating legacy persistence file with no schemaVersion");
            Ok(obj)
        }
        Some(version) => {
            let version = version
                .as_u64()
                .ok_or(PersistenceError::SchemaVersionMismatch { found: None, expected: SCHEMA_VERSION })?;
            if version != SCHEMA_VERSION {
                return Err(PersistenceError::SchemaVersionMismatch {
                    found: Some(version),
                    expected: SCHEMA_VERSION,
                });
            }
            match obj.remove("data") {
                Some(Value::Object(data)) => Ok(data),
                Some(_) | None => Ok(Map::new()),
            }
        }
    }
}

fn write_to_disk(root: &Path, path: &Path, data: &Map<String, Value>) -> Result<(), PersistenceError> {
    fs::create_dir_all(root)?;
    let body = serde_json::json!({
        "schemaVersion": SCHEMA_VERSION,
        "data": data,
    });
    let serialized = serde_json::to_string_pretty(&body)?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, serialized)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
