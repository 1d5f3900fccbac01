//! Subsystem-specific error enums.
//!
//! Kept separate from [`super::RuntimeError`] so each subsystem's module can
//! depend only on its own error type, the way the rest of the runtime's
//! layering works (schedule provider doesn't need to know about producer
//! failure modes, and vice versa).

use thiserror::Error;

/// Errors raised by the boundary state machine / clock-driven tick.
///
/// Every variant here is terminal for the session it occurs in: scheduling
/// violations transition the boundary state machine to `FAILED_TERMINAL`
/// (see `orchestrator::state_machine`), they are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("no schedule data for channel {channel_id} at {at}")]
    NoScheduleData { channel_id: String, at: String },

    #[error(
        "boundary infeasible post-convergence: lead {lead_ms}ms < minimum {min_lead_ms}ms (boundary {boundary_ms})"
    )]
    InfeasibleBoundary {
        boundary_ms: i64,
        lead_ms: i64,
        min_lead_ms: i64,
    },

    #[error("late issuance: fired {lateness_ms}ms after issue_at (tolerance {tolerance_ms}ms)")]
    LateIssuance {
        lateness_ms: i64,
        tolerance_ms: i64,
    },

    #[error("boundary mismatch: declared {declared_ms} does not match planned {planned_ms}")]
    BoundaryMismatch { declared_ms: i64, planned_ms: i64 },

    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition { from: String, to: String },

    #[error("teardown grace timeout: pending for {pending_ms}ms (grace {grace_ms}ms)")]
    TeardownGraceTimeout { pending_ms: i64, grace_ms: i64 },

    #[error("startup convergence timeout after {elapsed_s}s (max {max_s}s)")]
    ConvergenceTimeout { elapsed_s: i64, max_s: i64 },

    #[error("segment rejected: {reason}")]
    InvalidSegment { reason: String },
}

/// Errors surfaced by a [`crate::producer::Producer`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProducerError {
    #[error("producer startup failed: {message}")]
    Startup { message: String },

    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    #[error("timing violation: {message}")]
    Timing { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

/// Errors surfaced by the fan-out router. Never terminal at the session
/// level — logged and counted, not propagated as a fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("upstream closed")]
    UpstreamClosed,

    #[error("subscriber queue full, dropping chunk for {subscriber}")]
    QueueFull { subscriber: String },
}
