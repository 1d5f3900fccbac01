//! Producer adapter contract.
//!
//! An opaque handle over an external playout engine. The core never
//! implements media decode/encode itself — these adapters either drive a
//! deterministic in-memory double ([`mock::MockProducer`], used by tests and
//! as the default runtime producer) or shell out to a real engine
//! ([`ffmpeg::FfmpegProducer`]).
//!
//! Modeled as an `async_trait` object-safe trait following the usual
//! `Box<dyn Trait + Send + Sync>` trait-object pattern.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::errors::ProducerError;
use crate::schedule::{FrameRate, Segment};

pub mod ffmpeg;
pub mod mock;

pub use ffmpeg::FfmpegProducer;
pub use mock::MockProducer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerHealth {
    Running,
    Degraded,
    Stopped,
}

/// The initial plan handed to `Start`: the first segment (possibly joined
/// mid-way) plus whatever lookahead the schedule provider returned.
#[derive(Debug, Clone)]
pub struct InitialPlan {
    pub segments: Vec<Segment>,
}

/// Result of `SwitchToLive`: whether the promotion has completed yet.
/// `SwitchToLive` is idempotent-until-success — callers (the orchestrator's
/// tick) may invoke it repeatedly from the `SWITCH_ARMED` sub-state to
/// detect completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    Completed,
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    NotReady,
}

/// Opaque handle over an external playout engine.
///
/// `LoadPreview` must never be called by a well-behaved caller while a
/// switch is armed — the orchestrator enforces this at the boundary state
/// machine, not here, but implementations may additionally return
/// `ProtocolViolation` defensively if they detect mis-sequenced calls.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn start(&self, plan: InitialPlan, start_at: chrono::DateTime<chrono::Utc>) -> Result<(), ProducerError>;

    /// Hands the caller the receiving half of this producer's TS byte
    /// output, once, for the session to pipe into its fan-out router. `None`
    /// if called before `start` or a second time after the first take.
    async fn take_output(&self) -> Option<mpsc::Receiver<Bytes>>;

    async fn load_preview(
        &self,
        asset_path: &str,
        start_frame: i64,
        frame_count: i64,
        fps: FrameRate,
    ) -> Result<LoadOutcome, ProducerError>;

    async fn switch_to_live(&self, target_boundary_ms: i64) -> Result<SwitchOutcome, ProducerError>;

    async fn stop(&self) -> Result<(), ProducerError>;

    async fn health(&self) -> ProducerHealth;
}
