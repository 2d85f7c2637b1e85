//! Engine configuration: a YAML file with environment-variable overrides,
//! following this codebase's usual `serde_yaml` + `dotenvy` layering.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_extensions_root")]
    pub extensions_root: PathBuf,
    #[serde(default = "default_persistence_root")]
    pub persistence_root: PathBuf,
    /// Whether the RPC layer rejects calls into a mod's namespace from a
    /// client that did not report that mod as installed during handshake.
    #[serde(default)]
    pub strict_mod_isolation: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_extensions_root() -> PathBuf {
    PathBuf::from("extensions")
}

fn default_persistence_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extensions_root: default_extensions_root(),
            persistence_root: default_persistence_root(),
            strict_mod_isolation: false,
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_yaml::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read config file: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl EngineConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(s)?)
    }

    /// Load `.env` into the process environment (if present), parse `path`
    /// as YAML, then apply any `TAPESTRY_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if let Err(err) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {err}");
        }
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TAPESTRY_STRICT_MOD_ISOLATION") {
            self.strict_mod_isolation = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Ok(v) = std::env::var("TAPESTRY_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("TAPESTRY_EXTENSIONS_ROOT") {
            self.extensions_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TAPESTRY_PERSISTENCE_ROOT") {
            self.persistence_root = PathBuf::from(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_when_fields_omitted() {
        let cfg = EngineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn parses_explicit_fields() {
        let yaml = "extensionsRoot: ./exts\npersistenceRoot: ./save\nstrictModIsolation: true\nlogLevel: debug\n";
        let err = EngineConfig::from_yaml_str(yaml);
        // Field names are plain Rust identifiers (no renames), so camelCase
        // keys are rejected rather than silently ignored.
        assert!(err.is_err());
    }

    #[test]
    fn parses_snake_case_fields() {
        let yaml = "extensions_root: ./exts\npersistence_root: ./save\nstrict_mod_isolation: true\nlog_level: debug\n";
        let cfg = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.extensions_root, PathBuf::from("./exts"));
        assert!(cfg.strict_mod_isolation);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn load_reads_file_and_applies_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tapestry.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "log_level: warn").unwrap();

        std::env::set_var("TAPESTRY_LOG_LEVEL", "trace");
        let cfg = EngineConfig::load(&path).unwrap();
        std::env::remove_var("TAPESTRY_LOG_LEVEL");

        assert_eq!(cfg.log_level, "trace");
    }
}
