//! The explicit context object that owns every core component.
//!
//! The source this crate generalizes from used per-process singletons for
//! phase, lifecycle, registries, and performance. Here they're fields of one
//! constructed `EngineContext`, threaded by reference through the startup
//! graph instead. There is deliberately no process-wide `reset()`: the
//! "reset seam" tests need is simply constructing a fresh `EngineContext` —
//! since nothing here is a singleton, a new instance *is* a clean slate.

use std::sync::{Arc, RwLock};

use crate::callable::Callable;
use crate::config::EngineConfig;
use crate::descriptor::{CapabilityKind, ExtensionDescriptor};
use crate::events::EventBus;
use crate::lifecycle::LifecycleManager;
use crate::overlay::OverlayRegistry;
use crate::perf::PerformanceMonitor;
use crate::phase::PhaseController;
use crate::registry::{CapabilityRegistry, DeclarationTable, ExclusiveCapabilityConflict};
use crate::state::StateCoordinator;
use crate::type_resolver::TypeRegistry;

/// Everything discovery produces that later phases need: the validated
/// descriptors themselves plus the structures derived from them.
pub struct DiscoveryResult {
    pub descriptors: Vec<ExtensionDescriptor>,
    pub declarations: DeclarationTable,
    pub exclusivity_conflicts: Vec<ExclusiveCapabilityConflict>,
}

pub struct EngineContext {
    pub config: EngineConfig,
    pub phase: Arc<PhaseController>,
    pub api_registry: Arc<CapabilityRegistry<Callable>>,
    pub hook_registry: Arc<CapabilityRegistry<Callable>>,
    pub service_registry: Arc<CapabilityRegistry<Callable>>,
    pub events: Arc<EventBus>,
    pub state: Arc<StateCoordinator>,
    pub overlays: Arc<OverlayRegistry>,
    pub perf: Arc<PerformanceMonitor>,
    discovery: RwLock<Option<Arc<DiscoveryResult>>>,
    lifecycle: RwLock<Option<Arc<LifecycleManager>>>,
    types: RwLock<Option<Arc<TypeRegistry>>>,
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        let phase = Arc::new(PhaseController::new());
        let events = Arc::new(EventBus::new());
        let state = Arc::new(StateCoordinator::new(events.clone()));
        events.set_observer(state.clone());

        Self {
            config,
            phase,
            api_registry: Arc::new(CapabilityRegistry::new(CapabilityKind::Api)),
            hook_registry: Arc::new(CapabilityRegistry::new(CapabilityKind::Hook)),
            service_registry: Arc::new(CapabilityRegistry::new(CapabilityKind::Service)),
            events,
            state,
            overlays: Arc::new(OverlayRegistry::new()),
            perf: Arc::new(PerformanceMonitor::new()),
            discovery: RwLock::new(None),
            lifecycle: RwLock::new(None),
            types: RwLock::new(None),
        }
    }

    /// Record the outcome of DISCOVERY/VALIDATION: the validated
    /// descriptors, their declaration table, and any exclusivity conflicts.
    /// Also (re)builds the lifecycle manager and type registry, since both
    /// are fully determined by the descriptor set.
    pub fn install_discovery_result(&self, descriptors: Vec<ExtensionDescriptor>) {
        let (declarations, exclusivity_conflicts) = DeclarationTable::build(&descriptors);
        let lifecycle = LifecycleManager::new(&descriptors);
        let types = TypeRegistry::new(&descriptors);

        *self.lifecycle.write().expect("context lock poisoned") = Some(Arc::new(lifecycle));
        *self.types.write().expect("context lock poisoned") = Some(Arc::new(types));
        *self.discovery.write().expect("context lock poisoned") = Some(Arc::new(DiscoveryResult {
            descriptors,
            declarations,
            exclusivity_conflicts,
        }));
    }

    pub fn discovery(&self) -> Option<Arc<DiscoveryResult>> {
        self.discovery.read().expect("context lock poisoned").clone()
    }

    pub fn lifecycle(&self) -> Option<Arc<LifecycleManager>> {
        self.lifecycle.read().expect("context lock poisoned").clone()
    }

    pub fn types(&self) -> Option<Arc<TypeRegistry>> {
        self.types.read().expect("context lock poisoned").clone()
    }
}
