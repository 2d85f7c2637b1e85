//! Server push: a `watch_key → set<ConnectionId>` registry. Emitting a
//! watched value publishes a `server_event {event: "watch:" + watch_key,
//! payload}` to every watcher.
//!
//! Generalized from `r2e_core::ws::WsRooms` (`DashMap<String,
//! WsBroadcaster>`, a named room per topic) to a connection-id set per
//! topic: the core stays transport-agnostic, so fan-out here returns the
//! list of watching connections for the caller to actually send to, rather
//! than owning a broadcast channel tied to a specific transport.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::connection::ConnectionId;

static MOD_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_-]+$").expect("valid regex"));
static EVENT_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidNamespace {
    pub watch_key: String,
}

impl std::fmt::Display for InvalidNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}' is not a valid 'mod_id:event_name' watch key", self.watch_key)
    }
}

impl std::error::Error for InvalidNamespace {}

/// Validate `mod_id:event_name` shape: `mod_id` in `[a-z0-9_-]+`,
/// `event_name` in `[A-Za-z0-9_-]+`.
pub fn validate_watch_key(watch_key: &str) -> Result<(), InvalidNamespace> {
    match watch_key.split_once(':') {
        Some((mod_id, event_name)) if MOD_ID_RE.is_match(mod_id) && EVENT_NAME_RE.is_match(event_name) => Ok(()),
        _ => Err(InvalidNamespace { watch_key: watch_key.to_string() }),
    }
}

#[derive(Clone)]
pub struct WatchRegistry {
    watches: Arc<DashMap<String, HashSet<ConnectionId>>>,
}

impl Default for WatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self { watches: Arc::new(DashMap::new()) }
    }

    pub fn subscribe(&self, watch_key: &str, conn: ConnectionId) -> Result<(), InvalidNamespace> {
        validate_watch_key(watch_key)?;
        self.watches.entry(watch_key.to_string()).or_default().insert(conn);
        Ok(())
    }

    pub fn unsubscribe(&self, watch_key: &str, conn: ConnectionId) {
        if let Some(mut watchers) = self.watches.get_mut(watch_key) {
            watchers.remove(&conn);
        }
    }

    /// The connections currently watching `watch_key`, in no particular
    /// order (the caller fans out the `server_event` independently to each).
    pub fn watchers(&self, watch_key: &str) -> Vec<ConnectionId> {
        self.watches.get(watch_key).map(|w| w.iter().copied().collect()).unwrap_or_default()
    }

    /// Remove a disconnected connection from every watch it held.
    pub fn remove_connection(&self, conn: ConnectionId) {
        for mut entry in self.watches.iter_mut() {
            entry.value_mut().remove(&conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_watch_key_shapes_accepted() {
        assert!(validate_watch_key("alpha:hp_changed").is_ok());
        assert!(validate_watch_key("alpha-mod:HpChanged").is_ok());
    }

    #[test]
    fn watch_key_without_colon_is_invalid() {
        assert!(validate_watch_key("nocolon").is_err());
    }

    #[test]
    fn watch_key_with_uppercase_mod_id_is_invalid() {
        assert!(validate_watch_key("Alpha:hp").is_err());
    }

    #[test]
    fn subscribe_then_publish_reaches_watcher() {
        let registry = WatchRegistry::new();
        let conn = ConnectionId(1);
        registry.subscribe("alpha:hp", conn).unwrap();
        assert_eq!(registry.watchers("alpha:hp"), vec![conn]);
    }

    #[test]
    fn unsubscribe_removes_watcher() {
        let registry = WatchRegistry::new();
        let conn = ConnectionId(1);
        registry.subscribe("alpha:hp", conn).unwrap();
        registry.unsubscribe("alpha:hp", conn);
        assert!(registry.watchers("alpha:hp").is_empty());
    }

    #[test]
    fn disconnect_removes_connection_from_all_watches() {
        let registry = WatchRegistry::new();
        let conn = ConnectionId(1);
        registry.subscribe("alpha:hp", conn).unwrap();
        registry.subscribe("alpha:mp", conn).unwrap();
        registry.remove_connection(conn);
        assert!(registry.watchers("alpha:hp").is_empty());
        assert!(registry.watchers("alpha:mp").is_empty());
    }

    #[test]
    fn multiple_watchers_on_same_key() {
        let registry = WatchRegistry::new();
        registry.subscribe("alpha:hp", ConnectionId(1)).unwrap();
        registry.subscribe("alpha:hp", ConnectionId(2)).unwrap();
        let mut watchers = registry.watchers("alpha:hp");
        watchers.sort();
        assert_eq!(watchers, vec![ConnectionId(1), ConnectionId(2)]);
    }
}
