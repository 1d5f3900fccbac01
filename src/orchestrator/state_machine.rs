//! Boundary state machine: a single function gates every transition,
//! rejecting illegal edges by forcing `FAILED_TERMINAL` rather than
//! returning an error to a caller that might retry. The DAG-plus-one-back-edge
//! shape (`LIVE -> PLANNED` restarts the cycle for the next boundary) is
//! modeled as a plain enum rather than a parameterized per-boundary type —
//! boundary identity is tracked alongside the state in [`plan_boundary_ms`]
//! and checked explicitly at the one place (`SwitchToLive`) that must refuse
//! a stale boundary.

use chrono::{DateTime, Utc};

use crate::errors::SchedulingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryState {
    None,
    Planned,
    PreloadIssued,
    SwitchScheduled,
    SwitchIssued,
    Live,
    FailedTerminal,
}

impl BoundaryState {
    /// STABLE = {NONE, LIVE, FAILED_TERMINAL}; everything else is transient.
    pub fn is_stable(self) -> bool {
        matches!(self, BoundaryState::None | BoundaryState::Live | BoundaryState::FailedTerminal)
    }

    fn label(self) -> &'static str {
        match self {
            BoundaryState::None => "NONE",
            BoundaryState::Planned => "PLANNED",
            BoundaryState::PreloadIssued => "PRELOAD_ISSUED",
            BoundaryState::SwitchScheduled => "SWITCH_SCHEDULED",
            BoundaryState::SwitchIssued => "SWITCH_ISSUED",
            BoundaryState::Live => "LIVE",
            BoundaryState::FailedTerminal => "FAILED_TERMINAL",
        }
    }

    /// The legal edge set. `Live` may go to either
    /// `Planned` (another boundary exists) or `None` (schedule exhausted);
    /// both are modeled here, the caller picks which on each tick.
    fn allows(self, to: BoundaryState) -> bool {
        use BoundaryState::*;
        matches!(
            (self, to),
            (None, Planned)
                | (Planned, PreloadIssued)
                | (PreloadIssued, SwitchScheduled)
                | (SwitchScheduled, SwitchIssued)
                | (SwitchIssued, Live)
                | (Live, Planned)
                | (Live, None)
        )
    }
}

/// Finer-grained sub-state tracked while the outer state is anywhere in
/// `PreloadIssued..=SwitchIssued`. Exists only to forbid `LoadPreview` while
/// a switch is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    Idle,
    PreviewLoaded,
    SwitchArmed,
}

/// Per-boundary machine state plus the session-scoped bookkeeping the tick
/// and teardown path need: convergence, deferred-teardown, and the one-slot
/// pending fatal raised from a timer callback running off the tick's own
/// call stack.
pub struct BoundaryStateMachine {
    state: BoundaryState,
    sub_state: SubState,
    /// Millisecond-precision `end_time_utc` of the boundary this machine is
    /// currently tracking. `None` only in the `None` state before a plan has
    /// been computed.
    plan_boundary_ms: Option<i64>,
    converged: bool,
    convergence_deadline: Option<DateTime<Utc>>,
    teardown_pending: bool,
    teardown_deadline: Option<DateTime<Utc>>,
    pending_fatal: Option<SchedulingError>,
}

impl BoundaryStateMachine {
    pub fn new(convergence_deadline: DateTime<Utc>) -> Self {
        Self {
            state: BoundaryState::None,
            sub_state: SubState::Idle,
            plan_boundary_ms: None,
            converged: false,
            convergence_deadline: Some(convergence_deadline),
            teardown_pending: false,
            teardown_deadline: None,
            pending_fatal: None,
        }
    }

    pub fn state(&self) -> BoundaryState {
        self.state
    }

    pub fn sub_state(&self) -> SubState {
        self.sub_state
    }

    pub fn plan_boundary_ms(&self) -> Option<i64> {
        self.plan_boundary_ms
    }

    pub fn is_converged(&self) -> bool {
        self.converged
    }

    pub fn teardown_pending(&self) -> bool {
        self.teardown_pending
    }

    pub fn take_pending_fatal(&mut self) -> Option<SchedulingError> {
        self.pending_fatal.take()
    }

    /// Any attempt to re-enter `SwitchIssued`/`Live` from themselves, or any
    /// edge not in [`BoundaryState::allows`], forces `FAILED_TERMINAL`.
    /// Issuing from `FAILED_TERMINAL` itself is always fatal (the terminal
    /// is absorbing, never silently ignored).
    pub fn transition(&mut self, to: BoundaryState) -> Result<(), SchedulingError> {
        if self.state == BoundaryState::FailedTerminal {
            let err = SchedulingError::IllegalTransition {
                from: self.state.label().to_string(),
                to: to.label().to_string(),
            };
            self.pending_fatal = Some(err.clone());
            return Err(err);
        }

        if !self.state.allows(to) {
            let err = SchedulingError::IllegalTransition {
                from: self.state.label().to_string(),
                to: to.label().to_string(),
            };
            self.force_terminal(err.clone());
            return Err(err);
        }

        self.state = to;
        if to == BoundaryState::Live {
            self.converged = true;
            self.convergence_deadline = None;
        }
        if matches!(to, BoundaryState::Live | BoundaryState::None | BoundaryState::Planned) {
            self.sub_state = SubState::Idle;
        }
        Ok(())
    }

    pub fn set_plan_boundary_ms(&mut self, boundary_ms: i64) {
        self.plan_boundary_ms = Some(boundary_ms);
    }

    pub fn set_sub_state(&mut self, sub_state: SubState) {
        self.sub_state = sub_state;
    }

    /// Idempotent — callers (the orchestrator) are responsible for actually
    /// cancelling timer handles; this only records the terminal state and
    /// the fatal reason.
    pub fn force_terminal(&mut self, err: SchedulingError) {
        if self.state == BoundaryState::FailedTerminal {
            return;
        }
        self.state = BoundaryState::FailedTerminal;
        self.sub_state = SubState::Idle;
        self.pending_fatal = Some(err);
    }

    /// Expiry of the convergence window without ever reaching LIVE is fatal.
    pub fn check_convergence_timeout(&mut self, now: DateTime<Utc>, max_s: i64) -> Result<(), SchedulingError> {
        if self.converged {
            return Ok(());
        }
        if let Some(deadline) = self.convergence_deadline {
            if now >= deadline {
                let err = SchedulingError::ConvergenceTimeout {
                    elapsed_s: (now - (deadline - chrono::Duration::seconds(max_s))).num_seconds(),
                    max_s,
                };
                self.force_terminal(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Requesting teardown while one is already pending does not extend
    /// the deadline.
    pub fn request_teardown(&mut self, now: DateTime<Utc>, grace: chrono::Duration) -> bool {
        if self.state.is_stable() {
            return true;
        }
        if !self.teardown_pending {
            self.teardown_pending = true;
            self.teardown_deadline = Some(now + grace);
        }
        false
    }

    pub fn clear_teardown(&mut self) {
        self.teardown_pending = false;
        self.teardown_deadline = None;
    }

    /// Called from the tick's grace-check step. Returns `Err` (and forces
    /// terminal) if the grace deadline has passed while still transient.
    pub fn check_teardown_grace(&mut self, now: DateTime<Utc>) -> Result<(), SchedulingError> {
        if !self.teardown_pending || self.state.is_stable() {
            return Ok(());
        }
        if let Some(deadline) = self.teardown_deadline {
            if now >= deadline {
                let pending_ms = (now - deadline).num_milliseconds().max(0);
                let err = SchedulingError::TeardownGraceTimeout {
                    pending_ms,
                    grace_ms: (deadline - now).num_milliseconds().abs(),
                };
                self.force_terminal(err.clone());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Returns true exactly once teardown should now execute: state has
    /// just become stable while a teardown was pending.
    pub fn deferred_teardown_due(&self) -> bool {
        self.teardown_pending && self.state.is_stable()
    }
}
