//! Lifecycle-coordination engine for Tapestry.
//!
//! Owns the parts of an extension-hosting host that must be deterministic:
//! the phase clock, capability registries and their freeze discipline, the
//! per-extension lifecycle state machine and cascade failure, the
//! synchronous event bus, transactional state batching, and the
//! `@tapestry/*` type-contract namespace. Concrete persistence, the RPC wire
//! protocol, and guest-language plumbing live in sibling crates and consume
//! these types through their public interfaces.

pub mod callable;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod events;
pub mod lifecycle;
pub mod orchestrator;
pub mod overlay;
pub mod perf;
pub mod phase;
pub mod registry;
pub mod state;
pub mod type_resolver;

pub use callable::{Callable, CallableError, CallableFn};
pub use config::{ConfigError, EngineConfig};
pub use context::{DiscoveryResult, EngineContext};
pub use descriptor::{
    CapabilityDecl, CapabilityKind, DescriptorBuilder, DescriptorError, ExtensionDescriptor, SemverTriple,
};
pub use events::{DispatchObserver, EventBus, EventError, TapestryEvent};
pub use lifecycle::{activation_order, Diagnostics, ExtensionState, LifecycleError, LifecycleManager};
pub use orchestrator::run_registration;
pub use overlay::{Anchor, OverlayError, OverlayRegistry, OverlayView};
pub use perf::{PerformanceLimitError, PerformanceMonitor};
pub use phase::{Phase, PhaseController, PhaseError};
pub use registry::{CapabilityRegistry, DeclarationTable, ExclusiveCapabilityConflict, RegistryError, RegistryView};
pub use state::{StateChangeEvent, StateCoordinator};
pub use type_resolver::{ImportKind, TypeError, TypeRegistry};
