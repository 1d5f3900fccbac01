//! Deterministic in-memory producer double: the tick-driven tests exercise
//! the boundary state machine against this, not a real media pipeline.
//!
//! Enforces the producer contract's invariants even though the boundary
//! state machine is supposed to prevent the caller ever violating them:
//! `LoadPreview` is rejected while a switch is armed, and
//! `SwitchToLive` is idempotent-until-success — the first call arms the
//! switch and returns `NotReady`; the caller must poll again to observe
//! `Completed`.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex, RwLock};

use super::{InitialPlan, LoadOutcome, Producer, ProducerHealth, SwitchOutcome};
use crate::errors::ProducerError;
use crate::schedule::FrameRate;

/// A single MPEG-TS packet's worth of filler bytes, stood in for real
/// encoder output.
const SYNTHETIC_CHUNK_LEN: usize = 188;

#[derive(Debug, Clone)]
struct PreviewSlot {
    asset_path: String,
    start_frame: i64,
    frame_count: i64,
    fps: FrameRate,
}

pub struct MockProducer {
    started: AtomicBool,
    stopped: AtomicBool,
    switch_armed: AtomicBool,
    armed_boundary_ms: AtomicI64,
    poll_count: AtomicI64,
    preview: RwLock<Option<PreviewSlot>>,
    output_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    emitter: Mutex<Option<tokio::task::JoinHandle<()>>>,
    emit_stop: Arc<AtomicBool>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            switch_armed: AtomicBool::new(false),
            armed_boundary_ms: AtomicI64::new(-1),
            poll_count: AtomicI64::new(0),
            preview: RwLock::new(None),
            output_rx: Mutex::new(None),
            emitter: Mutex::new(None),
            emit_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for MockProducer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Producer for MockProducer {
    async fn start(&self, plan: InitialPlan, _start_at: DateTime<Utc>) -> Result<(), ProducerError> {
        if plan.segments.is_empty() {
            return Err(ProducerError::Startup {
                message: "initial plan has no segments".to_string(),
            });
        }
        self.started.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(32);
        *self.output_rx.lock().await = Some(rx);

        self.emit_stop.store(false, Ordering::SeqCst);
        let emit_stop = Arc::clone(&self.emit_stop);
        let handle = tokio::spawn(async move {
            let chunk = Bytes::from(vec![0u8; SYNTHETIC_CHUNK_LEN]);
            while !emit_stop.load(Ordering::SeqCst) {
                if tx.send(chunk.clone()).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });
        *self.emitter.lock().await = Some(handle);
        Ok(())
    }

    async fn take_output(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.output_rx.lock().await.take()
    }

    async fn load_preview(
        &self,
        asset_path: &str,
        start_frame: i64,
        frame_count: i64,
        fps: FrameRate,
    ) -> Result<LoadOutcome, ProducerError> {
        if self.switch_armed.load(Ordering::SeqCst) {
            return Err(ProducerError::ProtocolViolation {
                message: "load_preview called while a switch is armed".to_string(),
            });
        }
        *self.preview.write().await = Some(PreviewSlot {
            asset_path: asset_path.to_string(),
            start_frame,
            frame_count,
            fps,
        });
        Ok(LoadOutcome::Loaded)
    }

    async fn switch_to_live(&self, target_boundary_ms: i64) -> Result<SwitchOutcome, ProducerError> {
        if self.preview.read().await.is_none() {
            return Err(ProducerError::ProtocolViolation {
                message: "switch_to_live called with no preview loaded".to_string(),
            });
        }

        let already_armed = self.switch_armed.swap(true, Ordering::SeqCst);
        if !already_armed {
            self.armed_boundary_ms.store(target_boundary_ms, Ordering::SeqCst);
            self.poll_count.store(0, Ordering::SeqCst);
            return Ok(SwitchOutcome::NotReady);
        }

        if self.armed_boundary_ms.load(Ordering::SeqCst) != target_boundary_ms {
            return Err(ProducerError::ProtocolViolation {
                message: "switch_to_live called with a different boundary than the armed one".to_string(),
            });
        }

        // Completes on the second poll: enough to exercise the orchestrator's
        // re-poll loop without needing a timer.
        let polls = self.poll_count.fetch_add(1, Ordering::SeqCst) + 1;
        if polls >= 1 {
            self.switch_armed.store(false, Ordering::SeqCst);
            *self.preview.write().await = None;
            Ok(SwitchOutcome::Completed)
        } else {
            Ok(SwitchOutcome::NotReady)
        }
    }

    async fn stop(&self) -> Result<(), ProducerError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.emit_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.emitter.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn health(&self) -> ProducerHealth {
        if self.stopped.load(Ordering::SeqCst) {
            ProducerHealth::Stopped
        } else if self.started.load(Ordering::SeqCst) {
            ProducerHealth::Running
        } else {
            ProducerHealth::Degraded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{Segment, SegmentType};

    fn sample_plan() -> InitialPlan {
        InitialPlan {
            segments: vec![Segment {
                asset_path: "program.mov".to_string(),
                segment_type: SegmentType::Content,
                start_time_utc: Utc::now(),
                end_time_utc: Utc::now(),
                duration_s: 60.0,
                frame_count: Some(1800),
                start_pts_ms: 0,
                fps: FrameRate {
                    numerator: 30,
                    denominator: 1,
                },
            }],
        }
    }

    #[tokio::test]
    async fn rejects_preview_while_switch_armed() {
        let producer = MockProducer::new();
        producer.start(sample_plan(), Utc::now()).await.unwrap();
        producer
            .load_preview("filler.mov", 0, 100, FrameRate { numerator: 30, denominator: 1 })
            .await
            .unwrap();
        producer.switch_to_live(1000).await.unwrap();

        let result = producer
            .load_preview("other.mov", 0, 100, FrameRate { numerator: 30, denominator: 1 })
            .await;
        assert!(matches!(result, Err(ProducerError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn switch_to_live_is_idempotent_until_success() {
        let producer = MockProducer::new();
        producer.start(sample_plan(), Utc::now()).await.unwrap();
        producer
            .load_preview("filler.mov", 0, 100, FrameRate { numerator: 30, denominator: 1 })
            .await
            .unwrap();

        let first = producer.switch_to_live(1000).await.unwrap();
        assert_eq!(first, SwitchOutcome::NotReady);
        let second = producer.switch_to_live(1000).await.unwrap();
        assert_eq!(second, SwitchOutcome::Completed);
    }

    #[tokio::test]
    async fn switch_to_live_rejects_boundary_change_mid_arm() {
        let producer = MockProducer::new();
        producer.start(sample_plan(), Utc::now()).await.unwrap();
        producer
            .load_preview("filler.mov", 0, 100, FrameRate { numerator: 30, denominator: 1 })
            .await
            .unwrap();
        producer.switch_to_live(1000).await.unwrap();
        let result = producer.switch_to_live(2000).await;
        assert!(matches!(result, Err(ProducerError::ProtocolViolation { .. })));
    }

    #[tokio::test]
    async fn health_reflects_lifecycle() {
        let producer = MockProducer::new();
        assert_eq!(producer.health().await, ProducerHealth::Degraded);
        producer.start(sample_plan(), Utc::now()).await.unwrap();
        assert_eq!(producer.health().await, ProducerHealth::Running);
        producer.stop().await.unwrap();
        assert_eq!(producer.health().await, ProducerHealth::Stopped);
    }
}
