//! Process-wide session registry: the one global mutable singleton,
//! plus the fixed configuration it was constructed from. Every other piece
//! of state is session-scoped.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::director::Director;
use crate::errors::RuntimeError;
use crate::metrics::RuntimeMetrics;
use crate::orchestrator::{ChannelOrchestrator, ProducerFactory, TimerMode};
use crate::schedule::ScheduleProvider;

/// Owns the live `ChannelOrchestrator` for every channel that has had at
/// least one viewer since the runtime started, and reaps sessions whose
/// deferred teardown has executed.
pub struct SessionRegistry {
    clock: Arc<dyn Clock>,
    schedule_provider: Arc<dyn ScheduleProvider>,
    director: Arc<dyn Director>,
    config: SchedulingConfig,
    router_queue_depth: usize,
    timer_mode: TimerMode,
    metrics: Arc<RuntimeMetrics>,
    sessions: RwLock<HashMap<Uuid, Arc<ChannelOrchestrator>>>,
}

impl SessionRegistry {
    pub fn new(
        clock: Arc<dyn Clock>,
        schedule_provider: Arc<dyn ScheduleProvider>,
        director: Arc<dyn Director>,
        config: SchedulingConfig,
        router_queue_depth: usize,
        timer_mode: TimerMode,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            clock,
            schedule_provider,
            director,
            config,
            router_queue_depth,
            timer_mode,
            metrics,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the orchestrator for `channel_id`, creating one (with no
    /// viewers yet) if this is the first time the channel has been
    /// addressed since startup.
    pub async fn get_or_create(
        &self,
        channel_id: Uuid,
        producer_factory: ProducerFactory,
    ) -> Arc<ChannelOrchestrator> {
        if let Some(existing) = self.sessions.read().await.get(&channel_id) {
            return Arc::clone(existing);
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(channel_id)
            .or_insert_with(|| {
                Arc::new(ChannelOrchestrator::new(
                    channel_id,
                    Arc::clone(&self.clock),
                    Arc::clone(&self.schedule_provider),
                    Arc::clone(&self.director),
                    self.config.clone(),
                    self.router_queue_depth,
                    self.timer_mode,
                    producer_factory,
                    Arc::clone(&self.metrics),
                ))
            })
            .clone()
    }

    pub async fn get(&self, channel_id: Uuid) -> Option<Arc<ChannelOrchestrator>> {
        self.sessions.read().await.get(&channel_id).cloned()
    }

    pub async fn channel_ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Drives `tick()` across every registered session, then reaps any
    /// whose deferred teardown has just executed. Errors from individual
    /// sessions are logged, not propagated — one channel's fatal must
    /// never stall the tick driver for the others.
    pub async fn tick_all(&self) {
        let sessions: Vec<Arc<ChannelOrchestrator>> = self.sessions.read().await.values().cloned().collect();
        for session in &sessions {
            if let Err(e) = session.tick().await {
                tracing::warn!(channel_id = %session.channel_id(), error = %e, "session tick fatal");
            }
        }

        let reaped: Vec<Uuid> = sessions
            .iter()
            .filter(|s| s.deferred_teardown_triggered())
            .map(|s| s.channel_id())
            .collect();
        if !reaped.is_empty() {
            let mut map = self.sessions.write().await;
            for channel_id in reaped {
                map.remove(&channel_id);
                tracing::info!(%channel_id, "session removed from registry after deferred teardown");
            }
        }
    }

    pub async fn stop_all(&self) -> Result<(), RuntimeError> {
        let sessions: Vec<Arc<ChannelOrchestrator>> = self.sessions.write().await.drain().map(|(_, v)| v).collect();
        for session in sessions {
            session.stop_channel().await;
        }
        Ok(())
    }
}
