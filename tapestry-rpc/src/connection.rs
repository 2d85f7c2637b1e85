//! Connection identity and per-connection handshake state.
//!
//! Connection ids are a process-local counter rather than a UUID — nothing
//! here crosses a process boundary, and this mirrors `r2e_core::ws`'s
//! `WsBroadcastReceiver` client-id counter more directly than pulling in a
//! new dependency would.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-connection state tracked after a successful handshake.
#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub ready: bool,
    pub installed_mods: HashSet<String>,
}

impl ConnectionState {
    pub fn mark_ready(&mut self, installed_mods: HashSet<String>) {
        self.ready = true;
        self.installed_mods = installed_mods;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_increasing() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn fresh_state_is_not_ready() {
        let state = ConnectionState::default();
        assert!(!state.ready);
        assert!(state.installed_mods.is_empty());
    }

    #[test]
    fn mark_ready_records_installed_mods() {
        let mut state = ConnectionState::default();
        state.mark_ready(["alpha".to_string()].into_iter().collect());
        assert!(state.ready);
        assert!(state.installed_mods.contains("alpha"));
    }
}
