//! RPC-layer configuration, layered the same way as
//! [`tapestry_core::EngineConfig`]: serde defaults plus `TAPESTRY_RPC_*`
//! environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::allowlist::DEFAULT_METHOD_TIMEOUT;
use crate::rate_limit::{MAX_CALLS_PER_MINUTE, MAX_CALLS_PER_SECOND, MAX_CONCURRENT_IN_FLIGHT};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcConfig {
    #[serde(default = "default_method_timeout_secs")]
    pub method_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_in_flight")]
    pub max_concurrent_in_flight: i64,
    #[serde(default = "default_max_calls_per_second")]
    pub max_calls_per_second: usize,
    #[serde(default = "default_max_calls_per_minute")]
    pub max_calls_per_minute: usize,
    #[serde(default)]
    pub engine_task_capacity: Option<usize>,
}

fn default_method_timeout_secs() -> u64 {
    DEFAULT_METHOD_TIMEOUT.as_secs()
}

fn default_max_concurrent_in_flight() -> i64 {
    MAX_CONCURRENT_IN_FLIGHT
}

fn default_max_calls_per_second() -> usize {
    MAX_CALLS_PER_SECOND
}

fn default_max_calls_per_minute() -> usize {
    MAX_CALLS_PER_MINUTE
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            method_timeout_secs: default_method_timeout_secs(),
            max_concurrent_in_flight: default_max_concurrent_in_flight(),
            max_calls_per_second: default_max_calls_per_second(),
            max_calls_per_minute: default_max_calls_per_minute(),
            engine_task_capacity: None,
        }
    }
}

impl RpcConfig {
    pub fn method_timeout(&self) -> Duration {
        Duration::from_secs(self.method_timeout_secs)
    }

    /// Apply `TAPESTRY_RPC_*` environment overrides, mirroring
    /// `EngineConfig::apply_env_overrides`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TAPESTRY_RPC_METHOD_TIMEOUT_SECS") {
            if let Ok(parsed) = v.parse() {
                self.method_timeout_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("TAPESTRY_RPC_ENGINE_TASK_CAPACITY") {
            if let Ok(parsed) = v.parse() {
                self.engine_task_capacity = Some(parsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_module_constants() {
        let cfg = RpcConfig::default();
        assert_eq!(cfg.method_timeout(), DEFAULT_METHOD_TIMEOUT);
        assert_eq!(cfg.max_concurrent_in_flight, MAX_CONCURRENT_IN_FLIGHT);
    }

    #[test]
    fn env_override_changes_method_timeout() {
        std::env::set_var("TAPESTRY_RPC_METHOD_TIMEOUT_SECS", "42");
        let mut cfg = RpcConfig::default();
        cfg.apply_env_overrides();
        std::env::remove_var("TAPESTRY_RPC_METHOD_TIMEOUT_SECS");
        assert_eq!(cfg.method_timeout_secs, 42);
    }
}
