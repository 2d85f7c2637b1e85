//! The monotonic phase clock that gates every other component.
//!
//! Grounded on `r2e_core`'s singleton-to-context-object pattern (see
//! `r2e_core::builder::AppBuilder`'s pre-state/post-state split): rather than
//! a process-wide singleton, `PhaseController` is an explicit object owned by
//! [`crate::context::EngineContext`] and threaded by reference into every
//! other gated component.

use std::fmt;
use std::sync::Mutex;

/// A totally ordered phase in the startup/runtime timeline.
///
/// The ordering given by `#[derive(PartialOrd, Ord)]` (declaration order)
/// backs `require_at_least`/`require_at_most`; `successor()` separately
/// encodes the fixed adjacency relation used by `advance_to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Bootstrap,
    Discovery,
    Validation,
    Registration,
    Freeze,
    TsLoad,
    TsRegister,
    TsActivate,
    TsReady,
    PersistenceReady,
    Runtime,
    ClientPresentationReady,
}

impl Phase {
    const ORDER: [Phase; 12] = [
        Phase::Bootstrap,
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

    /// The immediate successor of this phase, or `None` if this is the last phase.
    pub fn successor(self) -> Option<Phase> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Errors raised by [`PhaseController`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseError {
    /// `advance_to` was called with a phase that is neither the current phase
    /// nor its immediate successor.
    Ordering { from: Phase, to: Phase },
    /// Two threads raced to advance the phase; this caller lost the race.
    Concurrency { expected: Phase, observed: Phase },
    /// A `require_phase` check failed.
    WrongPhase { required: Phase, current: Phase },
    /// A `require_at_least` check failed.
    TooEarly { required: Phase, current: Phase },
    /// A `require_at_most` check failed.
    TooLate { required: Phase, current: Phase },
}

impl fmt::Display for PhaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseError::Ordering { from, to } => {
                write!(f, "cannot advance from {from} to {to}: not the immediate successor")
            }
            PhaseError::Concurrency { expected, observed } => {
                write!(f, "phase advance lost a race: expected current {expected}, observed {observed}")
            }
            PhaseError::WrongPhase { required, current } => {
                write!(f, "operation requires phase {required}, current phase is {current}")
            }
            PhaseError::TooEarly { required, current } => {
                write!(f, "operation requires at least phase {required}, current phase is {current}")
            }
            PhaseError::TooLate { required, current } => {
                write!(f, "operation requires at most phase {required}, current phase is {current}")
            }
        }
    }
}

impl std::error::Error for PhaseError {}

/// The process-wide monotonic phase clock.
///
/// `advance_to` is linearizable: the critical section both checks and
/// performs the compare-and-set, so a thread that observes a stale
/// `current_phase` and loses the race gets [`PhaseError::Concurrency`]
/// rather than silently clobbering a newer phase.
pub struct PhaseController {
    inner: Mutex<Inner>,
}

struct Inner {
    current: Phase,
    last_transition_at: u64,
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseController {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: Phase::Bootstrap,
                last_transition_at: 0,
            }),
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.inner.lock().expect("phase mutex poisoned").current
    }

    pub fn last_transition_at(&self) -> u64 {
        self.inner.lock().expect("phase mutex poisoned").last_transition_at
    }

    /// Advance to `target`. `tick` is a host-supplied monotonic counter
    /// (never wall-clock time, so dispatch stays deterministic and testable).
    ///
    /// Succeeds iff `target == current.successor()`. `target == current` is a
    /// no-op that logs a warning rather than failing. Anything else
    /// (including moving backwards or skipping a phase) fails with
    /// [`PhaseError::Ordering`].
    pub fn advance_to(&self, target: Phase, tick: u64) -> Result<(), PhaseError> {
        let mut guard = self.inner.lock().expect("phase mutex poisoned");
        if target == guard.current {
            tracing::warn!(phase = %target, "advance_to called with the current phase; no-op");
            return Ok(());
        }
        match guard.current.successor() {
            Some(next) if next == target => {
                tracing::info!(from = %guard.current, to = %target, "phase advanced");
                guard.current = target;
                guard.last_transition_at = tick;
                Ok(())
            }
            Some(_) | None => Err(PhaseError::Ordering {
                from: guard.current,
                to: target,
            }),
        }
    }

    pub fn require_phase(&self, required: Phase) -> Result<(), PhaseError> {
        let current = self.current_phase();
        if current == required {
            Ok(())
        } else {
            Err(PhaseError::WrongPhase { required, current })
        }
    }

    pub fn require_at_least(&self, required: Phase) -> Result<(), PhaseError> {
        let current = self.current_phase();
        if current >= required {
            Ok(())
        } else {
            Err(PhaseError::TooEarly { required, current })
        }
    }

    pub fn require_at_most(&self, required: Phase) -> Result<(), PhaseError> {
        let current = self.current_phase();
        if current <= required {
            Ok(())
        } else {
            Err(PhaseError::TooLate { required, current })
        }
    }

    pub fn is_phase(&self, phase: Phase) -> bool {
        self.current_phase() == phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_chain_is_total() {
        let mut p = Phase::Bootstrap;
        let mut count = 1;
        while let Some(next) = p.successor() {
            p = next;
            count += 1;
        }
        assert_eq!(p, Phase::ClientPresentationReady);
        assert_eq!(count, 12);
    }

    #[test]
    fn advance_to_successor_succeeds() {
        let pc = PhaseController::new();
        pc.advance_to(Phase::Discovery, 1).unwrap();
        assert_eq!(pc.current_phase(), Phase::Discovery);
    }

    #[test]
    fn advance_to_same_phase_is_noop() {
        let pc = PhaseController::new();
        pc.advance_to(Phase::Bootstrap, 1).unwrap();
        assert_eq!(pc.current_phase(), Phase::Bootstrap);
    }

    #[test]
    fn advance_to_skip_fails() {
        let pc = PhaseController::new();
        let err = pc.advance_to(Phase::Validation, 1).unwrap_err();
        assert_eq!(
            err,
            PhaseError::Ordering {
                from: Phase::Bootstrap,
                to: Phase::Validation
            }
        );
    }

    #[test]
    fn advance_to_backwards_fails() {
        let pc = PhaseController::new();
        pc.advance_to(Phase::Discovery, 1).unwrap();
        let err = pc.advance_to(Phase::Bootstrap, 2).unwrap_err();
        assert!(matches!(err, PhaseError::Ordering { .. }));
    }

    #[test]
    fn require_at_least_and_at_most() {
        let pc = PhaseController::new();
        pc.advance_to(Phase::Discovery, 1).unwrap();
        assert!(pc.require_at_least(Phase::Bootstrap).is_ok());
        assert!(pc.require_at_least(Phase::Validation).is_err());
        assert!(pc.require_at_most(Phase::Validation).is_ok());
        assert!(pc.require_at_most(Phase::Bootstrap).is_err());
    }

    #[test]
    fn monotonic_for_all_pairs_of_transitions() {
        let pc = PhaseController::new();
        let mut seen = vec![pc.current_phase()];
        let mut tick = 0u64;
        loop {
            let current = pc.current_phase();
            let Some(next) = current.successor() else { break };
            tick += 1;
            pc.advance_to(next, tick).unwrap();
            seen.push(pc.current_phase());
        }
        for w in seen.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }
}
