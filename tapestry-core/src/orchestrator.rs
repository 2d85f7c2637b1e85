//! The registration orchestrator: drives extensions through their
//! registration entry points in a stable topological order over
//! `requiredDependencies`.
//!
//! Reuses [`crate::lifecycle::activation_order`]'s Kahn's-algorithm sort for
//! the ordering itself; this module's job is just what happens around it —
//! failing every extension a cycle or missing dependency touches *before*
//! any registration entry point runs, and cascading an entry point's own
//! failure the same way a runtime `FAILED` transition would.
//!
//! Every extension entering this orchestrator has already passed VALIDATION
//! (state `Validated`); a successful entry point moves it to
//! `TypeInitialized`, the next state in the lifecycle — the registration
//! pipeline and the per-extension type-module load are treated as one step
//! here since the core doesn't separately model "capabilities declared, type
//! module not yet loaded" as an observable extension state.

use crate::descriptor::ExtensionDescriptor;
use crate::lifecycle::{activation_order, ExtensionState, LifecycleError, LifecycleManager};

/// Runs `register_entry_point` for each extension in dependency order.
/// Returns the ids that registered successfully, in the order they ran.
///
/// If the dependency graph itself is invalid (a cycle, or a reference to an
/// unknown extension), every extension named in the error is transitioned
/// to `Failed` and none of them have their entry point invoked; this
/// function returns the same error after doing so.
pub fn run_registration<F>(
    descriptors: &[ExtensionDescriptor],
    lifecycle: &LifecycleManager,
    mut register_entry_point: F,
) -> Result<Vec<String>, LifecycleError>
where
    F: FnMut(&str) -> Result<(), String>,
{
    let order = match activation_order(descriptors) {
        Ok(order) => order,
        Err(LifecycleError::CyclicDependency { cycle }) => {
            for id in &cycle {
                let _ = lifecycle.transition(id, ExtensionState::Failed);
            }
            return Err(LifecycleError::CyclicDependency { cycle });
        }
        Err(LifecycleError::UnknownDependency { extension_id, dependency }) => {
            let _ = lifecycle.transition(&extension_id, ExtensionState::Failed);
            return Err(LifecycleError::UnknownDependency { extension_id, dependency });
        }
        Err(other) => return Err(other),
    };

    let mut registered = Vec::with_capacity(order.len());
    for extension_id in order {
        if lifecycle.state_of(&extension_id) == Some(ExtensionState::Failed) {
            tracing::warn!(extension = %extension_id, "skipping registration of already-failed extension");
            continue;
        }
        if lifecycle.state_of(&extension_id) == Some(ExtensionState::Discovered) {
            if let Err(err) = lifecycle.transition(&extension_id, ExtensionState::Validated) {
                tracing::error!(extension = %extension_id, "failed to enter Validated state: {err}");
                let _ = lifecycle.transition(&extension_id, ExtensionState::Failed);
                continue;
            }
        }
        match register_entry_point(&extension_id) {
            Ok(()) => {
                if let Err(err) = lifecycle.transition(&extension_id, ExtensionState::TypeInitialized) {
                    tracing::error!(extension = %extension_id, "failed to enter TypeInitialized state: {err}");
                    let _ = lifecycle.transition(&extension_id, ExtensionState::Failed);
                    continue;
                }
                registered.push(extension_id);
            }
            Err(reason) => {
                tracing::error!(extension = %extension_id, "registration entry point failed: {reason}");
                lifecycle.set_failure_reason(&extension_id, format!("registration entry point failed: {reason}"));
                let _ = lifecycle.transition(&extension_id, ExtensionState::Failed);
            }
        }
    }

    Ok(registered)
}
