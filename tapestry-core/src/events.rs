//! The synchronous, namespace-validated event bus.
//!
//! Carries over the handler-storage vocabulary of an async publish/subscribe
//! bus this codebase has elsewhere (type-keyed `HashMap` of `Arc<dyn Fn>`
//! handlers, `subscribe`/`emit` naming) but deliberately drops its
//! concurrency model: listeners here run synchronously, in registration
//! order, on the emitting thread, and `emit` does not return until every
//! listener has run. A thread-local depth counter tracks emit nesting (for
//! the warn threshold and for the State Coordinator's flush boundary);
//! `catch_unwind` isolates one listener's panic from the rest.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use serde_json::Value;

/// Above this many listeners on a single event name, `subscribe` logs a
/// warning but still registers the listener.
pub const MAX_PER_EVENT: usize = 500;
/// Above this many listeners across all event names, `subscribe` logs a
/// warning but still registers the listener.
pub const MAX_TOTAL: usize = 5000;
/// Dispatch depth at which `emit` logs a one-time warning about deep
/// recursive emission.
pub const DISPATCH_DEPTH_WARN: usize = 50;

/// One dispatched event. `timestamp` is host-supplied (never wall-clock, so
/// dispatch stays deterministic and replayable).
#[derive(Debug, Clone)]
pub struct TapestryEvent {
    pub name: String,
    pub namespace: String,
    pub payload: Value,
    pub emitter_extension_id: Option<String>,
    pub timestamp: u64,
}

pub type Handler = Arc<dyn Fn(&TapestryEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    InvalidEventName { name: String },
    EngineNamespaceReserved { name: String },
    ModNamespaceForbidden { name: String, emitter: Option<String> },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventError::InvalidEventName { name } => write!(f, "event name '{name}' has no namespace prefix"),
            EventError::EngineNamespaceReserved { name } => {
                write!(f, "emit of '{name}' is reserved to the host; extensions may not emit on 'engine:'")
            }
            EventError::ModNamespaceForbidden { name, emitter } => write!(
                f,
                "emit of '{name}' is forbidden for emitter {emitter:?}: 'mod:<id>:' events may only be emitted by their owning extension"
            ),
        }
    }
}

impl std::error::Error for EventError {}

/// The namespace is the prefix of an event name before its first `:`.
fn namespace_of(name: &str) -> Result<&str, EventError> {
    match name.split_once(':') {
        Some((ns, _)) if !ns.is_empty() => Ok(ns),
        _ => Err(EventError::InvalidEventName { name: name.to_string() }),
    }
}

fn validate_subscribe(name: &str) -> Result<String, EventError> {
    namespace_of(name).map(str::to_string)
}

fn validate_emit(name: &str, emitter: Option<&str>) -> Result<String, EventError> {
    let namespace = namespace_of(name)?;
    match namespace {
        "engine" => {
            if emitter.is_some() {
                return Err(EventError::EngineNamespaceReserved { name: name.to_string() });
            }
        }
        "ui" => {
            tracing::warn!(event = name, "emit on reserved-by-convention 'ui:' namespace");
        }
        "mod" => {
            let owner = name.splitn(3, ':').nth(1);
            let allowed = matches!((owner, emitter), (Some(owner), Some(emitter)) if owner == emitter);
            if !allowed {
                return Err(EventError::ModNamespaceForbidden {
                    name: name.to_string(),
                    emitter: emitter.map(str::to_string),
                });
            }
        }
        _ => {}
    }
    Ok(namespace.to_string())
}

thread_local! {
    static DISPATCH_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// The current thread's emit nesting depth. Exposed so the State Coordinator
/// can detect when an outer dispatch has fully unwound.
pub fn current_dispatch_depth() -> usize {
    DISPATCH_DEPTH.with(|d| d.get())
}

/// Hook invoked around every `emit`, used by the State Coordinator to know
/// when to flush its pending queue.
pub trait DispatchObserver: Send + Sync {
    fn on_dispatch_start(&self, depth: usize);
    fn on_dispatch_end(&self, depth: usize);
}

struct Registration {
    extension_id: String,
    handler: Handler,
}

pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Registration>>>,
    observer: RwLock<Option<Arc<dyn DispatchObserver>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            observer: RwLock::new(None),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn DispatchObserver>) {
        *self.observer.write().expect("event bus lock poisoned") = Some(observer);
    }

    /// Register `handler`, owned by `extension_id`, for `event_name`.
    /// Duplicate `(extension_id, handler-identity)` registrations are a
    /// silent no-op. Returns `true` if a new listener was inserted.
    pub fn subscribe(&self, extension_id: &str, event_name: &str, handler: Handler) -> Result<bool, EventError> {
        validate_subscribe(event_name)?;
        let mut listeners = self.listeners.write().expect("event bus lock poisoned");
        let bucket = listeners.entry(event_name.to_string()).or_default();
        if bucket
            .iter()
            .any(|r| r.extension_id == extension_id && Arc::ptr_eq(&r.handler, &handler))
        {
            return Ok(false);
        }
        if bucket.len() + 1 > MAX_PER_EVENT {
            tracing::warn!(event = event_name, count = bucket.len() + 1, "MAX_PER_EVENT listener cap exceeded");
        }
        let total: usize = listeners.values().map(Vec::len).sum::<usize>() + 1;
        if total > MAX_TOTAL {
            tracing::warn!(total, "MAX_TOTAL listener cap exceeded");
        }
        listeners
            .entry(event_name.to_string())
            .or_default()
            .push(Registration {
                extension_id: extension_id.to_string(),
                handler,
            });
        Ok(true)
    }

    pub fn unsubscribe(&self, extension_id: &str, event_name: &str, handler: &Handler) -> bool {
        let mut listeners = self.listeners.write().expect("event bus lock poisoned");
        if let Some(bucket) = listeners.get_mut(event_name) {
            let before = bucket.len();
            bucket.retain(|r| !(r.extension_id == extension_id && Arc::ptr_eq(&r.handler, handler)));
            return bucket.len() != before;
        }
        false
    }

    /// Lifecycle cleanup: remove every listener owned by `extension_id`,
    /// across all event names.
    pub fn remove_all_listeners_for_mod(&self, extension_id: &str) {
        let mut listeners = self.listeners.write().expect("event bus lock poisoned");
        for bucket in listeners.values_mut() {
            bucket.retain(|r| r.extension_id != extension_id);
        }
    }

    /// Dispatch `event_name` to every listener, synchronously, in
    /// registration order, on the calling thread. Snapshots the listener
    /// list before dispatch: a listener that subscribes or unsubscribes
    /// during dispatch affects only the *next* emit of this event name.
    pub fn emit(
        &self,
        emitter_extension_id: Option<&str>,
        event_name: &str,
        payload: Value,
        timestamp: u64,
    ) -> Result<(), EventError> {
        let namespace = validate_emit(event_name, emitter_extension_id)?;
        let event = TapestryEvent {
            name: event_name.to_string(),
            namespace,
            payload,
            emitter_extension_id: emitter_extension_id.map(str::to_string),
            timestamp,
        };

        let depth = DISPATCH_DEPTH.with(|d| {
            d.set(d.get() + 1);
            d.get()
        });
        if depth == DISPATCH_DEPTH_WARN {
            tracing::warn!(event = event_name, depth, "event dispatch depth crossed warn threshold");
        }
        if let Some(observer) = self.observer.read().expect("event bus lock poisoned").as_ref() {
            observer.on_dispatch_start(depth);
        }

        let snapshot: Vec<(String, Handler)> = {
            let listeners = self.listeners.read().expect("event bus lock poisoned");
            listeners
                .get(event_name)
                .map(|b| b.iter().map(|r| (r.extension_id.clone(), r.handler.clone())).collect())
                .unwrap_or_default()
        };

        for (owner, handler) in &snapshot {
            let event_ref = &event;
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event_ref)));
            if let Err(panic) = outcome {
                tracing::error!(
                    event = event_name,
                    extension = owner.as_str(),
                    "event listener panicked and was isolated: {}",
                    panic_message(&panic)
                );
            }
        }

        if let Some(observer) = self.observer.read().expect("event bus lock poisoned").as_ref() {
            observer.on_dispatch_end(depth);
        }
        DISPATCH_DEPTH.with(|d| d.set(d.get() - 1));

        Ok(())
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners
            .read()
            .expect("event bus lock poisoned")
            .get(event_name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn handler(f: impl Fn(&TapestryEvent) + Send + Sync + 'static) -> Handler {
        Arc::new(f)
    }

    #[test]
    fn engine_namespace_rejects_extension_emitter() {
        let bus = EventBus::new();
        let err = bus.emit(Some("alpha"), "engine:tick", Value::Null, 1).unwrap_err();
        assert!(matches!(err, EventError::EngineNamespaceReserved { .. }));
    }

    #[test]
    fn engine_namespace_allows_host_emitter() {
        let bus = EventBus::new();
        assert!(bus.emit(None, "engine:tick", Value::Null, 1).is_ok());
    }

    #[test]
    fn ui_namespace_emit_is_not_forbidden() {
        let bus = EventBus::new();
        assert!(bus.emit(Some("alpha"), "ui:open_menu", Value::Null, 1).is_ok());
    }

    #[test]
    fn mod_namespace_requires_owner_to_match_emitter() {
        let bus = EventBus::new();
        assert!(bus.emit(Some("alpha"), "mod:alpha:tick", Value::Null, 1).is_ok());
        let err = bus.emit(Some("beta"), "mod:alpha:tick", Value::Null, 1).unwrap_err();
        assert!(matches!(err, EventError::ModNamespaceForbidden { .. }));
    }

    #[test]
    fn subscribe_open_for_all_known_namespaces() {
        let bus = EventBus::new();
        for name in ["engine:tick", "ui:open_menu", "mod:alpha:tick"] {
            assert!(bus.subscribe("whoever", name, handler(|_| {})).unwrap());
        }
    }

    #[test]
    fn emit_runs_all_listeners_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe("ext", "mod:ext:tick", handler(move |_| order.lock().unwrap().push(i)))
                .unwrap();
        }
        bus.emit(Some("ext"), "mod:ext:tick", Value::Null, 1).unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_listener_is_noop() {
        let bus = EventBus::new();
        let h = handler(|_| {});
        assert!(bus.subscribe("ext", "ui:x", h.clone()).unwrap());
        assert!(!bus.subscribe("ext", "ui:x", h).unwrap());
        assert_eq!(bus.listener_count("ui:x"), 1);
    }

    #[test]
    fn panicking_listener_does_not_stop_later_listeners() {
        let bus = EventBus::new();
        bus.subscribe("a", "ui:x", handler(|_| panic!("boom"))).unwrap();
        let hit = Arc::new(AtomicUsize::new(0));
        let h2 = hit.clone();
        bus.subscribe("b", "ui:x", handler(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        bus.emit(Some("a"), "ui:x", Value::Null, 1).unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let h = handler(|_| {});
        bus.subscribe("ext", "ui:x", h.clone()).unwrap();
        assert!(bus.unsubscribe("ext", "ui:x", &h));
        assert_eq!(bus.listener_count("ui:x"), 0);
    }

    #[test]
    fn remove_all_listeners_for_mod_scopes_to_owner() {
        let bus = EventBus::new();
        bus.subscribe("dying", "ui:x", handler(|_| {})).unwrap();
        bus.subscribe("dying", "ui:y", handler(|_| {})).unwrap();
        bus.subscribe("other", "ui:x", handler(|_| {})).unwrap();
        bus.remove_all_listeners_for_mod("dying");
        assert_eq!(bus.listener_count("ui:x"), 1);
        assert_eq!(bus.listener_count("ui:y"), 0);
    }

    #[test]
    fn listener_added_during_dispatch_does_not_run_until_next_emit() {
        let bus = Arc::new(EventBus::new());
        let hit = Arc::new(AtomicUsize::new(0));
        let bus2 = bus.clone();
        let h = hit.clone();
        bus.subscribe(
            "ext",
            "ui:x",
            handler(move |_| {
                let h = h.clone();
                bus2.subscribe("late-ext", "ui:x", handler(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            }),
        )
        .unwrap();
        bus.emit(Some("ext"), "ui:x", Value::Null, 1).unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 0);
        bus.emit(Some("ext"), "ui:x", Value::Null, 2).unwrap();
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_event_name_without_namespace_rejected() {
        let bus = EventBus::new();
        let err = bus.emit(None, "no_colon_here", Value::Null, 1).unwrap_err();
        assert!(matches!(err, EventError::InvalidEventName { .. }));
    }

    #[test]
    fn dispatch_depth_tracks_reentrant_emits() {
        let bus = Arc::new(EventBus::new());
        let observed = Arc::new(Mutex::new(Vec::new()));
        let bus2 = bus.clone();
        let o = observed.clone();
        bus.subscribe(
            "ext",
            "ui:x",
            handler(move |_| {
                o.lock().unwrap().push(current_dispatch_depth());
                if current_dispatch_depth() < 3 {
                    let _ = bus2.emit(Some("ext"), "ui:x", Value::Null, 1);
                }
            }),
        )
        .unwrap();
        bus.emit(Some("ext"), "ui:x", Value::Null, 1).unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(current_dispatch_depth(), 0);
    }
}
