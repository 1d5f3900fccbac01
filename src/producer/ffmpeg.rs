//! Thin adapter over a real ffmpeg-based playout engine.
//!
//! This is intentionally a shell: the real engine speaks its own control
//! protocol over a pipe or local socket established by `start`, and the
//! load/switch/stop calls below translate to that protocol. The core ships
//! the process lifecycle (spawn, health poll, kill on stop); the actual
//! control-channel wire format is out of scope — the engine itself is a
//! black box.
//!
//! Uses `tokio::process` for the long-lived child process, wrapped in an
//! `async_trait` producer.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};

use super::{InitialPlan, LoadOutcome, Producer, ProducerHealth, SwitchOutcome};
use crate::errors::ProducerError;
use crate::schedule::FrameRate;

/// Read buffer size for relaying ffmpeg's stdout into the fan-out router.
const READ_CHUNK_LEN: usize = 64 * 1024;

pub struct FfmpegProducer {
    binary_path: String,
    child: Mutex<Option<Child>>,
    preview_loaded: Arc<Mutex<bool>>,
    switch_armed: Arc<Mutex<Option<i64>>>,
    output_rx: Mutex<Option<mpsc::Receiver<Bytes>>>,
    relay: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FfmpegProducer {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            child: Mutex::new(None),
            preview_loaded: Arc::new(Mutex::new(false)),
            switch_armed: Arc::new(Mutex::new(None)),
            output_rx: Mutex::new(None),
            relay: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Producer for FfmpegProducer {
    async fn start(&self, plan: InitialPlan, _start_at: DateTime<Utc>) -> Result<(), ProducerError> {
        let first = plan.segments.first().ok_or_else(|| ProducerError::Startup {
            message: "initial plan has no segments".to_string(),
        })?;

        let mut child = Command::new(&self.binary_path)
            .arg("-i")
            .arg(&first.asset_path)
            .arg("-ss")
            .arg(format!("{:.3}", first.start_pts_ms as f64 / 1000.0))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProducerError::Startup {
                message: format!("failed to spawn ffmpeg at {}: {e}", self.binary_path),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| ProducerError::Startup {
            message: "ffmpeg child has no stdout pipe".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(32);
        *self.output_rx.lock().await = Some(rx);
        let handle = tokio::spawn(async move {
            let mut buf = BytesMut::zeroed(READ_CHUNK_LEN);
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ffmpeg stdout read failed");
                        break;
                    }
                }
            }
        });
        *self.relay.lock().await = Some(handle);

        *self.child.lock().await = Some(child);
        tracing::info!(asset = %first.asset_path, "ffmpeg producer started");
        Ok(())
    }

    async fn take_output(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.output_rx.lock().await.take()
    }

    async fn load_preview(
        &self,
        asset_path: &str,
        _start_frame: i64,
        _frame_count: i64,
        _fps: FrameRate,
    ) -> Result<LoadOutcome, ProducerError> {
        if self.switch_armed.lock().await.is_some() {
            return Err(ProducerError::ProtocolViolation {
                message: "load_preview called while a switch is armed".to_string(),
            });
        }
        if self.child.lock().await.is_none() {
            return Err(ProducerError::Transport {
                message: "producer not started".to_string(),
            });
        }
        *self.preview_loaded.lock().await = true;
        tracing::debug!(asset = %asset_path, "preview loaded");
        Ok(LoadOutcome::Loaded)
    }

    async fn switch_to_live(&self, target_boundary_ms: i64) -> Result<SwitchOutcome, ProducerError> {
        if !*self.preview_loaded.lock().await {
            return Err(ProducerError::ProtocolViolation {
                message: "switch_to_live called with no preview loaded".to_string(),
            });
        }

        let mut armed = self.switch_armed.lock().await;
        match *armed {
            None => {
                *armed = Some(target_boundary_ms);
                Ok(SwitchOutcome::NotReady)
            }
            Some(existing) if existing == target_boundary_ms => {
                drop(armed);
                let mut child_guard = self.child.lock().await;
                let Some(child) = child_guard.as_mut() else {
                    return Err(ProducerError::Transport {
                        message: "producer process missing at switch time".to_string(),
                    });
                };
                match child.try_wait() {
                    Ok(None) => {
                        *self.switch_armed.lock().await = None;
                        *self.preview_loaded.lock().await = false;
                        Ok(SwitchOutcome::Completed)
                    }
                    Ok(Some(status)) => Err(ProducerError::Transport {
                        message: format!("ffmpeg process exited unexpectedly: {status}"),
                    }),
                    Err(e) => Err(ProducerError::Transport {
                        message: format!("failed to poll ffmpeg process: {e}"),
                    }),
                }
            }
            Some(_) => Err(ProducerError::ProtocolViolation {
                message: "switch_to_live called with a different boundary than the armed one".to_string(),
            }),
        }
    }

    async fn stop(&self) -> Result<(), ProducerError> {
        if let Some(handle) = self.relay.lock().await.take() {
            handle.abort();
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        Ok(())
    }

    async fn health(&self) -> ProducerHealth {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            None => ProducerHealth::Stopped,
            Some(child) => match child.try_wait() {
                Ok(None) => ProducerHealth::Running,
                Ok(Some(_)) => ProducerHealth::Degraded,
                Err(_) => ProducerHealth::Degraded,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_stopped_before_start() {
        let producer = FfmpegProducer::new("ffmpeg");
        assert_eq!(producer.health().await, ProducerHealth::Stopped);
    }

    #[tokio::test]
    async fn load_preview_before_start_is_rejected() {
        let producer = FfmpegProducer::new("ffmpeg");
        let result = producer
            .load_preview("x.mov", 0, 100, FrameRate { numerator: 30, denominator: 1 })
            .await;
        assert!(matches!(result, Err(ProducerError::Transport { .. })));
    }
}
