//! Extension lifecycle: per-extension state, dependency-ordered activation,
//! and cascade failure propagation.
//!
//! The activation ordering reuses the topological-sort-over-declared-
//! dependencies shape this codebase already applies to capability
//! registration: build an in-degree map from `required_dependencies`, run
//! Kahn's algorithm, and surface the first remaining cycle as an error
//! instead of a generic "stuck" state. Cascade failure is new: a BFS over a
//! precomputed reverse-dependency index marks every transitive dependent of
//! a failed extension as failed too, visiting each node at most once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::RwLock;

use serde::Serialize;

use crate::descriptor::ExtensionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionState {
    Discovered,
    Validated,
    TypeInitialized,
    Frozen,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for ExtensionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    CyclicDependency { cycle: Vec<String> },
    UnknownDependency { extension_id: String, dependency: String },
    InvalidTransition { extension_id: String, from: ExtensionState, to: ExtensionState },
    UnknownExtension { extension_id: String },
    DependencyNotReady { extension_id: String, dependency: String, state: ExtensionState },
}

impl fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleError::CyclicDependency { cycle } => {
                write!(f, "cyclic extension dependency: {}", cycle.join(" -> "))
            }
            LifecycleError::UnknownDependency { extension_id, dependency } => write!(
                f,
                "extension '{extension_id}' depends on unknown extension '{dependency}'"
            ),
            LifecycleError::InvalidTransition { extension_id, from, to } => write!(
                f,
                "extension '{extension_id}' cannot transition from {from} to {to}"
            ),
            LifecycleError::UnknownExtension { extension_id } => {
                write!(f, "unknown extension '{extension_id}'")
            }
            LifecycleError::DependencyNotReady { extension_id, dependency, state } => write!(
                f,
                "extension '{extension_id}' cannot load: dependency '{dependency}' is {state}, not Ready"
            ),
        }
    }
}

impl std::error::Error for LifecycleError {}

/// Compute a dependency-respecting activation order via Kahn's algorithm.
///
/// Ties (nodes with equal in-degree becoming ready in the same round) break
/// by descriptor order, so the result is deterministic given a fixed input
/// order.
pub fn activation_order(descriptors: &[ExtensionDescriptor]) -> Result<Vec<String>, LifecycleError> {
    let ids: HashSet<&str> = descriptors.iter().map(|d| d.id.as_str()).collect();
    for d in descriptors {
        for dep in &d.required_dependencies {
            if !ids.contains(dep.as_str()) {
                return Err(LifecycleError::UnknownDependency {
                    extension_id: d.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = descriptors.iter().map(|d| (d.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = descriptors.iter().map(|d| (d.id.as_str(), Vec::new())).collect();
    for d in descriptors {
        for dep in &d.required_dependencies {
            *in_degree.get_mut(d.id.as_str()).unwrap() += 1;
            dependents.get_mut(dep.as_str()).unwrap().push(d.id.as_str());
        }
    }

    let mut ready: VecDeque<&str> = descriptors
        .iter()
        .map(|d| d.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(id) = ready.pop_front() {
        order.push(id.to_string());
        for dependent in dependents.get(id).into_iter().flatten() {
            let deg = in_degree.get_mut(dependent).unwrap();
            *deg -= 1;
            if *deg == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() != descriptors.len() {
        let remaining: Vec<String> = descriptors
            .iter()
            .map(|d| d.id.clone())
            .filter(|id| !order.contains(id))
            .collect();
        return Err(LifecycleError::CyclicDependency { cycle: remaining });
    }

    Ok(order)
}

struct Node {
    state: ExtensionState,
    required_dependencies: Vec<String>,
    failure_reason: Option<String>,
}

/// Per-state extension counts plus every recorded failure reason, suitable
/// for a host to expose over whatever transport it likes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub counts: HashMap<ExtensionState, usize>,
    pub failure_reasons: HashMap<String, String>,
}

/// Tracks per-extension lifecycle state and propagates cascade failures.
pub struct LifecycleManager {
    nodes: RwLock<HashMap<String, Node>>,
    reverse_deps: HashMap<String, Vec<String>>,
}

impl LifecycleManager {
    pub fn new(descriptors: &[ExtensionDescriptor]) -> Self {
        let mut reverse_deps: HashMap<String, Vec<String>> =
            descriptors.iter().map(|d| (d.id.clone(), Vec::new())).collect();
        for d in descriptors {
            for dep in &d.required_dependencies {
                reverse_deps.entry(dep.clone()).or_default().push(d.id.clone());
            }
        }
        let manager = Self {
            nodes: RwLock::new(HashMap::new()),
            reverse_deps,
        };
        manager.initialize_discovered_extensions(descriptors);
        manager
    }

    /// Seed every descriptor into `Discovered`, the first lifecycle state.
    fn initialize_discovered_extensions(&self, descriptors: &[ExtensionDescriptor]) {
        let mut nodes = self.nodes.write().expect("lifecycle lock poisoned");
        for d in descriptors {
            nodes.insert(
                d.id.clone(),
                Node {
                    state: ExtensionState::Discovered,
                    required_dependencies: d.required_dependencies.clone(),
                    failure_reason: None,
                },
            );
        }
    }

    pub fn state_of(&self, extension_id: &str) -> Option<ExtensionState> {
        self.nodes.read().expect("lifecycle lock poisoned").get(extension_id).map(|n| n.state)
    }

    fn allowed(from: ExtensionState, to: ExtensionState) -> bool {
        if to == ExtensionState::Failed {
            return true; // Any -> Failed; Failed -> Failed is special-cased as a no-op in `transition`
        }
        matches!(
            (from, to),
            (ExtensionState::Discovered, ExtensionState::Validated)
                | (ExtensionState::Validated, ExtensionState::TypeInitialized)
                | (ExtensionState::TypeInitialized, ExtensionState::Frozen)
                | (ExtensionState::Frozen, ExtensionState::Loading)
                | (ExtensionState::Loading, ExtensionState::Ready)
        )
    }

    /// Advance a single extension's state. Transitioning to `Failed` from
    /// `Ready` (or any other non-terminal state) triggers an immediate,
    /// synchronous cascade: every transitive dependent is also marked
    /// `Failed` before this call returns (resolves the open question on
    /// cascade timing in favor of immediate over deferred propagation, so no
    /// caller ever observes a dependent in `Ready` state whose dependency
    /// has already failed).
    ///
    /// `Failed -> Failed` is an idempotent no-op. `-> Loading` additionally
    /// requires every `required_dependency` to already be `Ready`, else
    /// fails with `DependencyNotReady` and leaves state untouched.
    pub fn transition(&self, extension_id: &str, to: ExtensionState) -> Result<(), LifecycleError> {
        if to == ExtensionState::Loading {
            let deps = self.dependencies_of(extension_id);
            for dep in &deps {
                let dep_state = self.state_of(dep);
                if dep_state != Some(ExtensionState::Ready) {
                    return Err(LifecycleError::DependencyNotReady {
                        extension_id: extension_id.to_string(),
                        dependency: dep.clone(),
                        state: dep_state.unwrap_or(ExtensionState::Discovered),
                    });
                }
            }
        }

        let from = {
            let mut nodes = self.nodes.write().expect("lifecycle lock poisoned");
            let node = nodes
                .get_mut(extension_id)
                .ok_or_else(|| LifecycleError::UnknownExtension {
                    extension_id: extension_id.to_string(),
                })?;
            let from = node.state;
            if from == to && to == ExtensionState::Failed {
                return Ok(()); // idempotent Failed -> Failed
            }
            if !Self::allowed(from, to) {
                return Err(LifecycleError::InvalidTransition {
                    extension_id: extension_id.to_string(),
                    from,
                    to,
                });
            }
            node.state = to;
            from
        };

        tracing::info!(extension = %extension_id, from = %from, to = %to, "extension lifecycle transition");

        if to == ExtensionState::Failed {
            self.cascade_failure(extension_id);
        }
        Ok(())
    }

    /// Record a human-readable failure reason. Never overrides a reason
    /// already attached to an extension that is `Failed` (whether from a
    /// direct transition or a cascade) — among non-terminal writes this is
    /// last-writer-wins, so a reason set before failure is simply staged for
    /// whenever the extension does fail.
    pub fn set_failure_reason(&self, extension_id: &str, reason: impl Into<String>) {
        let mut nodes = self.nodes.write().expect("lifecycle lock poisoned");
        if let Some(node) = nodes.get_mut(extension_id) {
            if node.state != ExtensionState::Failed {
                node.failure_reason = Some(reason.into());
            }
        }
    }

    pub fn failure_reason(&self, extension_id: &str) -> Option<String> {
        self.nodes.read().expect("lifecycle lock poisoned").get(extension_id)?.failure_reason.clone()
    }

    fn cascade_failure(&self, root: &str) {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        let mut queue: VecDeque<(String, String)> = self
            .reverse_deps
            .get(root)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|dependent| (dependent, root.to_string()))
            .collect();

        while let Some((id, cause)) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let already_failed = {
                let mut nodes = self.nodes.write().expect("lifecycle lock poisoned");
                if let Some(node) = nodes.get_mut(&id) {
                    let was_failed = node.state == ExtensionState::Failed;
                    node.state = ExtensionState::Failed;
                    if !was_failed {
                        node.failure_reason = Some(format!("Dependency '{cause}' failed"));
                    }
                    was_failed
                } else {
                    true
                }
            };
            if !already_failed {
                tracing::warn!(extension = %id, cause = %cause, "extension failed via cascade");
            }
            for dependent in self.reverse_deps.get(&id).into_iter().flatten() {
                if !visited.contains(dependent) {
                    queue.push_back((dependent.clone(), id.clone()));
                }
            }
        }
    }

    pub fn dependencies_of(&self, extension_id: &str) -> Vec<String> {
        self.nodes
            .read()
            .expect("lifecycle lock poisoned")
            .get(extension_id)
            .map(|n| n.required_dependencies.clone())
            .unwrap_or_default()
    }

    pub fn all_in_state(&self, state: ExtensionState) -> Vec<String> {
        self.nodes
            .read()
            .expect("lifecycle lock poisoned")
            .iter()
            .filter(|(_, n)| n.state == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Alias matching SPEC_FULL.md's `get_extensions_in_state` naming.
    pub fn get_extensions_in_state(&self, state: ExtensionState) -> Vec<String> {
        self.all_in_state(state)
    }

    pub fn get_diagnostics(&self) -> Diagnostics {
        let nodes = self.nodes.read().expect("lifecycle lock poisoned");
        let mut counts: HashMap<ExtensionState, usize> = HashMap::new();
        let mut failure_reasons = HashMap::new();
        for (id, node) in nodes.iter() {
            *counts.entry(node.state).or_insert(0) += 1;
            if let Some(reason) = &node.failure_reason {
                failure_reasons.insert(id.clone(), reason.clone());
            }
        }
        Diagnostics { counts, failure_reasons }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorBuilder;

    fn desc(id: &str, deps: &[&str]) -> ExtensionDescriptor {
        DescriptorBuilder {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            required_dependencies: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    fn advance_to_ready(mgr: &LifecycleManager, id: &str) {
        mgr.transition(id, ExtensionState::Validated).unwrap();
        mgr.transition(id, ExtensionState::TypeInitialized).unwrap();
        mgr.transition(id, ExtensionState::Frozen).unwrap();
        mgr.transition(id, ExtensionState::Loading).unwrap();
        mgr.transition(id, ExtensionState::Ready).unwrap();
    }

    #[test]
    fn activation_order_respects_dependencies() {
        let descs = vec![desc("a", &[]), desc("b", &["a"]), desc("c", &["a", "b"])];
        let order = activation_order(&descs).unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn activation_order_detects_cycle() {
        let descs = vec![desc("a", &["b"]), desc("b", &["a"])];
        let err = activation_order(&descs).unwrap_err();
        assert!(matches!(err, LifecycleError::CyclicDependency { .. }));
    }

    #[test]
    fn activation_order_detects_unknown_dependency() {
        let descs = vec![desc("a", &["ghost"])];
        let err = activation_order(&descs).unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownDependency { .. }));
    }

    #[test]
    fn new_extensions_start_discovered() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        assert_eq!(mgr.state_of("a"), Some(ExtensionState::Discovered));
    }

    #[test]
    fn valid_transitions_succeed_in_sequence() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        advance_to_ready(&mgr, "a");
        assert_eq!(mgr.state_of("a"), Some(ExtensionState::Ready));
    }

    #[test]
    fn invalid_transition_rejected() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        let err = mgr.transition("a", ExtensionState::Ready).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn loading_requires_every_dependency_ready() {
        let descs = vec![desc("a", &[]), desc("b", &["a"])];
        let mgr = LifecycleManager::new(&descs);
        mgr.transition("b", ExtensionState::Validated).unwrap();
        mgr.transition("b", ExtensionState::TypeInitialized).unwrap();
        mgr.transition("b", ExtensionState::Frozen).unwrap();

        let err = mgr.transition("b", ExtensionState::Loading).unwrap_err();
        assert!(matches!(err, LifecycleError::DependencyNotReady { .. }));

        advance_to_ready(&mgr, "a");
        mgr.transition("b", ExtensionState::Loading).unwrap();
        assert_eq!(mgr.state_of("b"), Some(ExtensionState::Loading));
    }

    #[test]
    fn ready_to_failed_is_the_only_legal_exit_from_ready() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        advance_to_ready(&mgr, "a");
        assert!(mgr.transition("a", ExtensionState::Discovered).is_err());
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.state_of("a"), Some(ExtensionState::Failed));
    }

    #[test]
    fn failed_to_failed_is_idempotent() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        mgr.transition("a", ExtensionState::Failed).unwrap();
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.state_of("a"), Some(ExtensionState::Failed));
    }

    #[test]
    fn cascade_failure_propagates_to_all_transitive_dependents() {
        let descs = vec![desc("a", &[]), desc("b", &["a"]), desc("c", &["b"]), desc("d", &[])];
        let mgr = LifecycleManager::new(&descs);
        for id in ["a", "b", "c", "d"] {
            advance_to_ready(&mgr, id);
        }
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.state_of("a"), Some(ExtensionState::Failed));
        assert_eq!(mgr.state_of("b"), Some(ExtensionState::Failed));
        assert_eq!(mgr.state_of("c"), Some(ExtensionState::Failed));
        assert_eq!(mgr.state_of("d"), Some(ExtensionState::Ready));
        assert_eq!(mgr.failure_reason("b").as_deref(), Some("Dependency 'a' failed"));
        assert_eq!(mgr.failure_reason("c").as_deref(), Some("Dependency 'b' failed"));
    }

    #[test]
    fn cascade_failure_visits_diamond_dependency_once() {
        let descs = vec![
            desc("a", &[]),
            desc("b", &["a"]),
            desc("c", &["a"]),
            desc("d", &["b", "c"]),
        ];
        let mgr = LifecycleManager::new(&descs);
        for id in ["a", "b", "c", "d"] {
            advance_to_ready(&mgr, id);
        }
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.state_of("d"), Some(ExtensionState::Failed));
    }

    #[test]
    fn set_failure_reason_does_not_override_an_existing_cascade_reason() {
        let descs = vec![desc("a", &[]), desc("b", &["a"])];
        let mgr = LifecycleManager::new(&descs);
        for id in ["a", "b"] {
            advance_to_ready(&mgr, id);
        }
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.failure_reason("b").as_deref(), Some("Dependency 'a' failed"));
        mgr.set_failure_reason("b", "operator override");
        assert_eq!(mgr.failure_reason("b").as_deref(), Some("Dependency 'a' failed"));
    }

    #[test]
    fn set_failure_reason_stages_a_reason_before_failure() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        mgr.set_failure_reason("a", "operator requested shutdown");
        mgr.transition("a", ExtensionState::Failed).unwrap();
        assert_eq!(mgr.failure_reason("a").as_deref(), Some("operator requested shutdown"));
    }

    #[test]
    fn diagnostics_report_counts_and_failure_reasons() {
        let descs = vec![desc("a", &[]), desc("b", &[])];
        let mgr = LifecycleManager::new(&descs);
        mgr.transition("a", ExtensionState::Failed).unwrap();
        let diag = mgr.get_diagnostics();
        assert_eq!(diag.counts.get(&ExtensionState::Failed), Some(&1));
        assert_eq!(diag.counts.get(&ExtensionState::Discovered), Some(&1));
        assert!(diag.failure_reasons.is_empty()); // direct Failed with no staged reason
    }

    #[test]
    fn unknown_extension_id_is_an_error() {
        let descs = vec![desc("a", &[])];
        let mgr = LifecycleManager::new(&descs);
        let err = mgr.transition("ghost", ExtensionState::Validated).unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownExtension { .. }));
    }
}
