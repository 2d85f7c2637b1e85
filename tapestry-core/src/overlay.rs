//! Client overlay registry: per-extension, z-ordered UI entries gated to
//! the final startup phase.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::callable::Callable;
use crate::phase::{Phase, PhaseController, PhaseError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    Center,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayError {
    Phase(PhaseError),
    NotOwner { caller: String, owner: String, overlay_id: String },
    UnknownOverlay { extension_id: String, overlay_id: String },
    DuplicateOverlayId { extension_id: String, overlay_id: String },
}

impl fmt::Display for OverlayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::Phase(e) => write!(f, "{e}"),
            OverlayError::NotOwner { caller, owner, overlay_id } => write!(
                f,
                "'{caller}' does not own overlay '{overlay_id}' (owned by '{owner}')"
            ),
            OverlayError::UnknownOverlay { extension_id, overlay_id } => {
                write!(f, "unknown overlay '{overlay_id}' for extension '{extension_id}'")
            }
            OverlayError::DuplicateOverlayId { extension_id, overlay_id } => {
                write!(f, "extension '{extension_id}' already registered overlay '{overlay_id}'")
            }
        }
    }
}

impl std::error::Error for OverlayError {}

impl From<PhaseError> for OverlayError {
    fn from(e: PhaseError) -> Self {
        OverlayError::Phase(e)
    }
}

struct Entry {
    anchor: Anchor,
    z_index: u32,
    visible: bool,
    render: Callable,
    insertion_order: u64,
    render_failed_logged: bool,
}

/// A read-only snapshot of one overlay, safe to hand to a renderer.
#[derive(Debug, Clone)]
pub struct OverlayView {
    pub extension_id: String,
    pub overlay_id: String,
    pub anchor: Anchor,
    pub z_index: u32,
    pub visible: bool,
}

pub struct OverlayRegistry {
    entries: RwLock<HashMap<(String, String), Entry>>,
    next_order: AtomicU64,
}

impl Default for OverlayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    pub fn register_overlay(
        &self,
        phase: &PhaseController,
        extension_id: &str,
        overlay_id: &str,
        anchor: Anchor,
        z_index: u32,
        render: Callable,
    ) -> Result<(), OverlayError> {
        phase.require_at_least(Phase::ClientPresentationReady)?;
        let mut entries = self.entries.write().expect("overlay registry lock poisoned");
        let key = (extension_id.to_string(), overlay_id.to_string());
        if entries.contains_key(&key) {
            return Err(OverlayError::DuplicateOverlayId {
                extension_id: extension_id.to_string(),
                overlay_id: overlay_id.to_string(),
            });
        }
        let insertion_order = self.next_order.fetch_add(1, Ordering::SeqCst);
        entries.insert(
            key,
            Entry {
                anchor,
                z_index,
                visible: true,
                render,
                insertion_order,
                render_failed_logged: false,
            },
        );
        Ok(())
    }

    /// Requires the caller to own the overlay it's toggling.
    pub fn set_overlay_visibility(
        &self,
        phase: &PhaseController,
        caller_extension_id: &str,
        extension_id: &str,
        overlay_id: &str,
        visible: bool,
    ) -> Result<(), OverlayError> {
        phase.require_at_least(Phase::ClientPresentationReady)?;
        if caller_extension_id != extension_id {
            return Err(OverlayError::NotOwner {
                caller: caller_extension_id.to_string(),
                owner: extension_id.to_string(),
                overlay_id: overlay_id.to_string(),
            });
        }
        let key = (extension_id.to_string(), overlay_id.to_string());
        let mut entries = self.entries.write().expect("overlay registry lock poisoned");
        let entry = entries.get_mut(&key).ok_or_else(|| OverlayError::UnknownOverlay {
            extension_id: extension_id.to_string(),
            overlay_id: overlay_id.to_string(),
        })?;
        entry.visible = visible;
        Ok(())
    }

    /// Visible overlays, ordered ascending by `z_index` with ties broken by
    /// insertion order — the order a renderer should draw them in.
    pub fn render_order(&self) -> Vec<OverlayView> {
        let entries = self.entries.read().expect("overlay registry lock poisoned");
        let mut views: Vec<_> = entries
            .iter()
            .filter(|(_, e)| e.visible)
            .map(|((ext, overlay), e)| {
                (
                    e.z_index,
                    e.insertion_order,
                    OverlayView {
                        extension_id: ext.clone(),
                        overlay_id: overlay.clone(),
                        anchor: e.anchor,
                        z_index: e.z_index,
                        visible: e.visible,
                    },
                )
            })
            .collect();
        views.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        views.into_iter().map(|(_, _, v)| v).collect()
    }

    /// Invoke each visible overlay's render callback in render order. A
    /// callback that errors flips `visible` to `false` permanently and logs
    /// once; later render passes simply skip it.
    pub fn render_all(&self) {
        let order = self.render_order();
        for view in order {
            let key = (view.extension_id.clone(), view.overlay_id.clone());
            let outcome = {
                let entries = self.entries.read().expect("overlay registry lock poisoned");
                entries.get(&key).map(|e| e.render.execute(Vec::new()))
            };
            if let Some(Err(err)) = outcome {
                let mut entries = self.entries.write().expect("overlay registry lock poisoned");
                if let Some(entry) = entries.get_mut(&key) {
                    entry.visible = false;
                    if !entry.render_failed_logged {
                        entry.render_failed_logged = true;
                        tracing::error!(
                            extension = %view.extension_id,
                            overlay = %view.overlay_id,
                            "overlay render failed, disabling permanently: {err}"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn ready_phase() -> PhaseController {
        let pc = PhaseController::new();
        let chain = [
            Phase::Discovery,
            Phase::Validation,
            Phase::Registration,
            Phase::Freeze,
            Phase::TsLoad,
            Phase::TsRegister,
            Phase::TsActivate,
            Phase::TsReady,
            Phase::PersistenceReady,
            Phase::Runtime,
            Phase::ClientPresentationReady,
        ];
        let mut tick = 0;
        for p in chain {
            tick += 1;
            pc.advance_to(p, tick).unwrap();
        }
        pc
    }

    #[test]
    fn register_before_presentation_ready_fails() {
        let pc = PhaseController::new();
        let registry = OverlayRegistry::new();
        let err = registry
            .register_overlay(&pc, "alpha", "hud", Anchor::TopLeft, 0, Callable::new(|_| Ok(Value::Null)))
            .unwrap_err();
        assert!(matches!(err, OverlayError::Phase(_)));
    }

    #[test]
    fn render_order_sorts_by_z_index_then_insertion() {
        let pc = ready_phase();
        let registry = OverlayRegistry::new();
        registry
            .register_overlay(&pc, "alpha", "b", Anchor::TopLeft, 5, Callable::new(|_| Ok(Value::Null)))
            .unwrap();
        registry
            .register_overlay(&pc, "alpha", "a", Anchor::TopLeft, 1, Callable::new(|_| Ok(Value::Null)))
            .unwrap();
        registry
            .register_overlay(&pc, "beta", "c", Anchor::TopLeft, 1, Callable::new(|_| Ok(Value::Null)))
            .unwrap();
        let order = registry.render_order();
        let ids: Vec<_> = order.iter().map(|v| v.overlay_id.clone()).collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn set_visibility_requires_ownership() {
        let pc = ready_phase();
        let registry = OverlayRegistry::new();
        registry
            .register_overlay(&pc, "alpha", "hud", Anchor::Center, 0, Callable::new(|_| Ok(Value::Null)))
            .unwrap();
        let err = registry
            .set_overlay_visibility(&pc, "beta", "alpha", "hud", false)
            .unwrap_err();
        assert!(matches!(err, OverlayError::NotOwner { .. }));
        registry.set_overlay_visibility(&pc, "alpha", "alpha", "hud", false).unwrap();
        assert!(registry.render_order().is_empty());
    }

    #[test]
    fn render_failure_disables_overlay_permanently() {
        let pc = ready_phase();
        let registry = OverlayRegistry::new();
        registry
            .register_overlay(
                &pc,
                "alpha",
                "hud",
                Anchor::Center,
                0,
                Callable::new(|_| Err("render blew up".to_string())),
            )
            .unwrap();
        assert_eq!(registry.render_order().len(), 1);
        registry.render_all();
        assert!(registry.render_order().is_empty());
    }
}
