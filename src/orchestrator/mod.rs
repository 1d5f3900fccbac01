//! Channel orchestrator and its clock-driven tick. Owns one session per
//! channel: viewer fan-out (first-viewer-starts / last-viewer-stops),
//! producer supervision, and the boundary state machine's progression.

pub mod session;
pub mod state_machine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::SchedulingConfig;
use crate::director::{ChannelMode, Director};
use crate::errors::{ProducerError, RuntimeError, SchedulingError};
use crate::metrics::RuntimeMetrics;
use crate::producer::{InitialPlan, LoadOutcome, Producer, SwitchOutcome};
use crate::router::FanoutRouter;
use crate::schedule::{Segment, ScheduleProvider};

use session::{ChannelLifecycle, SessionData};
use state_machine::{BoundaryState, BoundaryStateMachine, SubState};

/// Builds a producer handle for a given mode. Production wiring selects
/// between `MockProducer`/`FfmpegProducer`; tests supply a closure that
/// always returns the same double.
pub type ProducerFactory = Box<dyn Fn(ChannelMode) -> Arc<dyn Producer> + Send + Sync>;

/// Which form the issuance timer takes; chosen by the caller at
/// construction. `Spawned` schedules a real
/// `tokio::time::sleep` task — production use. `Manual` records nothing and
/// relies on the caller invoking [`ChannelOrchestrator::fire_issuance_timer`]
/// directly at the intended instant — deterministic tests driving a
/// [`crate::clock::FrozenClock`], where a real sleep would race the
/// frozen clock's simulated timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Spawned,
    Manual,
}

fn producer_error_to_scheduling(err: &ProducerError) -> SchedulingError {
    SchedulingError::InvalidSegment {
        reason: format!("producer error: {err}"),
    }
}

pub struct ChannelOrchestrator {
    channel_id: Uuid,
    clock: Arc<dyn Clock>,
    schedule_provider: Arc<dyn ScheduleProvider>,
    director: Arc<dyn Director>,
    config: SchedulingConfig,
    timer_mode: TimerMode,
    producer_factory: ProducerFactory,
    metrics: Arc<RuntimeMetrics>,
    router: Arc<FanoutRouter>,
    producer: RwLock<Option<Arc<dyn Producer>>>,
    data: Mutex<SessionData>,
    machine: Mutex<Option<BoundaryStateMachine>>,
    issuance_timer: Mutex<Option<JoinHandle<()>>>,
    exhaustion_violation_logged: AtomicBool,
    deferred_teardown_executed: AtomicBool,
}

impl ChannelOrchestrator {
    pub fn new(
        channel_id: Uuid,
        clock: Arc<dyn Clock>,
        schedule_provider: Arc<dyn ScheduleProvider>,
        director: Arc<dyn Director>,
        config: SchedulingConfig,
        queue_depth: usize,
        timer_mode: TimerMode,
        producer_factory: ProducerFactory,
        metrics: Arc<RuntimeMetrics>,
    ) -> Self {
        Self {
            channel_id,
            clock,
            schedule_provider,
            director,
            config,
            timer_mode,
            producer_factory,
            router: Arc::new(FanoutRouter::new_with_metrics(queue_depth, channel_id, Arc::clone(&metrics))),
            metrics,
            producer: RwLock::new(None),
            data: Mutex::new(SessionData::new(channel_id)),
            machine: Mutex::new(None),
            issuance_timer: Mutex::new(None),
            exhaustion_violation_logged: AtomicBool::new(false),
            deferred_teardown_executed: AtomicBool::new(false),
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn router(&self) -> &Arc<FanoutRouter> {
        &self.router
    }

    /// True iff the boundary state is LIVE.
    pub async fn is_live(&self) -> bool {
        matches!(
            self.machine.lock().await.as_ref().map(|m| m.state()),
            Some(BoundaryState::Live)
        )
    }

    /// True once the session has reached LIVE at least once since startup.
    pub async fn is_converged(&self) -> bool {
        self.machine.lock().await.as_ref().map(|m| m.is_converged()).unwrap_or(false)
    }

    pub fn deferred_teardown_triggered(&self) -> bool {
        self.deferred_teardown_executed.load(Ordering::SeqCst)
    }

    /// Adds a viewer; on a 0->1 transition, starts the session.
    pub async fn tune_in(&self, viewer_id: Uuid) -> Result<(), RuntimeError> {
        let now = self.clock.now_utc();
        let became_active = {
            let mut data = self.data.lock().await;
            data.add_viewer(viewer_id, now)
        };
        if became_active {
            self.start_session(now).await?;
        }
        Ok(())
    }

    /// Removes a viewer; on a 1->0 transition, requests a (possibly
    /// deferred) teardown.
    pub async fn tune_out(&self, viewer_id: Uuid) -> Result<(), RuntimeError> {
        let became_empty = {
            let mut data = self.data.lock().await;
            data.remove_viewer(viewer_id)
        };
        if became_empty {
            self.request_teardown().await;
        }
        Ok(())
    }

    /// Explicit stop: moves the channel to STOPPED immediately, cancels
    /// timers, clears any pending teardown wait, and tears the producer
    /// down without waiting for EOF. Idempotent.
    pub async fn stop_channel(&self) {
        let mut data = self.data.lock().await;
        if data.lifecycle == ChannelLifecycle::Stopped {
            return;
        }
        data.lifecycle = ChannelLifecycle::Stopped;
        drop(data);

        self.cancel_issuance_timer().await;

        if let Some(mut machine) = self.machine.lock().await.take() {
            machine.clear_teardown();
        }

        if let Some(producer) = self.producer.write().await.take() {
            let _ = producer.stop().await;
        }
        self.deferred_teardown_executed.store(true, Ordering::SeqCst);
    }

    async fn cancel_issuance_timer(&self) {
        if let Some(handle) = self.issuance_timer.lock().await.take() {
            handle.abort();
        }
    }

    /// First-viewer startup: builds the producer for the director-supplied
    /// mode, asks the provider for the first plan, and
    /// starts it. The session is created here whether or not the resulting
    /// first boundary is immediately feasible — convergence resolves that.
    async fn start_session(&self, now: DateTime<Utc>) -> Result<(), RuntimeError> {
        let mode = self.director.mode_for(self.channel_id).await;
        {
            let mut data = self.data.lock().await;
            data.mode = mode;
        }

        let producer = (self.producer_factory)(mode);

        let segments = self
            .schedule_provider
            .playout_plan_now(self.channel_id, now)
            .await
            .map_err(RuntimeError::Scheduling)?;
        if segments.is_empty() {
            return Err(RuntimeError::Scheduling(SchedulingError::NoScheduleData {
                channel_id: self.channel_id.to_string(),
                at: now.to_rfc3339(),
            }));
        }

        producer
            .start(
                InitialPlan {
                    segments: segments.clone(),
                },
                now,
            )
            .await
            .map_err(RuntimeError::Producer)?;

        if let Some(output) = producer.take_output().await {
            let router = Arc::clone(&self.router);
            let channel_id = self.channel_id;
            tokio::spawn(async move {
                if let Err(e) = router.serve(output).await {
                    tracing::warn!(%channel_id, error = %e, "fan-out router stopped serving upstream");
                }
            });
        }

        *self.producer.write().await = Some(producer);
        {
            let mut data = self.data.lock().await;
            data.lifecycle = ChannelLifecycle::Running;
        }

        let convergence_deadline = now + ChronoDuration::seconds(self.config.max_startup_convergence_s);
        let mut machine = BoundaryStateMachine::new(convergence_deadline);

        let first = segments.into_iter().next().unwrap();
        self.plan_boundary(&mut machine, first).await?;

        *self.machine.lock().await = Some(machine);
        self.deferred_teardown_executed.store(false, Ordering::SeqCst);
        self.metrics.record_session_started(self.channel_id);
        Ok(())
    }

    /// Records `segment` as the current segment, stores its boundary, and
    /// transitions `None|Live -> Planned`.
    async fn plan_boundary(&self, machine: &mut BoundaryStateMachine, segment: Segment) -> Result<(), RuntimeError> {
        let boundary_ms = segment.end_time_utc.timestamp_millis();
        {
            let mut data = self.data.lock().await;
            data.current_segment = Some(segment);
        }
        machine.set_plan_boundary_ms(boundary_ms);
        machine.transition(BoundaryState::Planned).map_err(RuntimeError::Scheduling)?;
        self.exhaustion_violation_logged.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Last-viewer-leaves / director-initiated stop path with a grace
    /// window (deferred teardown) rather than the hard, immediate stop of
    /// [`Self::stop_channel`].
    async fn request_teardown(&self) {
        let now = self.clock.now_utc();
        let grace = ChronoDuration::milliseconds(self.config.teardown_grace_ms);
        let mut guard = self.machine.lock().await;
        let Some(machine) = guard.as_mut() else {
            self.stop_channel().await;
            return;
        };
        let execute_now = machine.request_teardown(now, grace);
        if execute_now {
            self.execute_deferred_teardown(machine).await;
        }
    }

    async fn execute_deferred_teardown(&self, machine: &mut BoundaryStateMachine) {
        machine.clear_teardown();
        self.cancel_issuance_timer().await;
        if let Some(producer) = self.producer.write().await.take() {
            let _ = producer.stop().await;
        }
        let mut data = self.data.lock().await;
        data.lifecycle = ChannelLifecycle::Stopped;
        self.deferred_teardown_executed.store(true, Ordering::SeqCst);
    }

    /// The clock-driven scheduler tick, called at `TICK_HZ`.
    pub async fn tick(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let now = self.clock.now_utc();
        let mut guard = self.machine.lock().await;
        let Some(machine) = guard.as_mut() else {
            return Ok(());
        };

        // Phase 1: grace/terminal checks.
        if let Err(e) = machine.check_teardown_grace(now) {
            self.metrics.record_session_terminal(self.channel_id, "teardown_grace_timeout");
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return Err(e.into());
        }
        if machine.teardown_pending() && !machine.state().is_stable() {
            return Ok(());
        }
        if machine.state() == BoundaryState::FailedTerminal {
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return Ok(());
        }
        if let Some(fatal) = machine.take_pending_fatal() {
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return Err(fatal.into());
        }

        // The completion poll below runs ahead of the SWITCH_ISSUED early
        // return further down: that early return only applies outside the
        // SWITCH_ARMED sub-state, i.e. once the switch has completed and
        // there is nothing left to poll.
        if machine.state() == BoundaryState::SwitchIssued && machine.sub_state() == SubState::SwitchArmed {
            return self.poll_switch_completion(machine, now).await;
        }

        // Phase 2: lifecycle checks.
        let lifecycle = self.data.lock().await.lifecycle;
        if lifecycle == ChannelLifecycle::Stopped || self.producer.read().await.is_none() {
            return Ok(());
        }
        if matches!(
            machine.state(),
            BoundaryState::SwitchIssued | BoundaryState::Live | BoundaryState::FailedTerminal
        ) {
            return Ok(());
        }

        // Phase 3: convergence timeout.
        if let Err(e) = machine.check_convergence_timeout(now, self.config.max_startup_convergence_s) {
            self.metrics.record_session_terminal(self.channel_id, "convergence_timeout");
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return Err(e.into());
        }

        // Phase 4: infeasibility check.
        let Some(boundary_ms) = machine.plan_boundary_ms() else {
            return Ok(());
        };
        let lead_ms = boundary_ms - now.timestamp_millis();
        if lead_ms < self.config.min_prefeed_lead_ms {
            if !machine.is_converged() {
                return self.skip_infeasible_boundary(machine, now).await;
            }
            let err = SchedulingError::InfeasibleBoundary {
                boundary_ms,
                lead_ms,
                min_lead_ms: self.config.min_prefeed_lead_ms,
            };
            machine.force_terminal(err.clone());
            self.metrics.record_session_terminal(self.channel_id, "infeasible_boundary");
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return Err(err.into());
        }

        // Phase 5: preload phase.
        let preload_lead_ms =
            self.config.min_prefeed_lead_ms + self.config.scheduling_buffer_s * 1000;
        if machine.state() == BoundaryState::Planned && now.timestamp_millis() >= boundary_ms - preload_lead_ms {
            self.try_preload(machine, boundary_ms).await?;
        }

        Ok(())
    }

    /// Pre-convergence infeasible boundary: skip to the next one the
    /// provider reports, rather than treat it as fatal.
    async fn skip_infeasible_boundary(
        &self,
        machine: &mut BoundaryStateMachine,
        now: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        // Querying at `now` would return the same trimmed current segment
        // whose boundary was just found infeasible, re-installing it
        // unchanged. Query at the boundary instant instead, as
        // `try_preload`/`poll_switch_completion` do, so the provider returns
        // the segment that starts there.
        let boundary_time = machine
            .plan_boundary_ms()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(now);
        let segments = self
            .schedule_provider
            .playout_plan_now(self.channel_id, boundary_time)
            .await
            .map_err(RuntimeError::Scheduling)?;
        let Some(next) = segments.into_iter().next() else {
            let err = SchedulingError::NoScheduleData {
                channel_id: self.channel_id.to_string(),
                at: now.to_rfc3339(),
            };
            machine.force_terminal(err.clone());
            self.metrics.record_session_terminal(self.channel_id, "no_schedule_data");
            return Err(err.into());
        };
        // Re-plan in place: NONE|PLANNED -> skip means staying logically at
        // the same outer state (PLANNED) but with a new boundary. Since
        // `Planned -> Planned` is not itself a legal edge, only the stored
        // boundary is updated.
        let boundary_ms = next.end_time_utc.timestamp_millis();
        {
            let mut data = self.data.lock().await;
            data.current_segment = Some(next);
        }
        machine.set_plan_boundary_ms(boundary_ms);
        Ok(())
    }

    async fn try_preload(self: &Arc<Self>, machine: &mut BoundaryStateMachine, boundary_ms: i64) -> Result<(), RuntimeError> {
        let boundary_time = DateTime::<Utc>::from_timestamp_millis(boundary_ms)
            .unwrap_or_else(Utc::now);
        let segments = self
            .schedule_provider
            .playout_plan_now(self.channel_id, boundary_time)
            .await
            .map_err(RuntimeError::Scheduling)?;
        let Some(successor) = segments.into_iter().next() else {
            // No successor available yet; remain PLANNED for retry.
            return Ok(());
        };

        let start_frame = (successor.start_pts_ms * successor.fps.numerator as i64)
            / (successor.fps.denominator as i64 * 1000);
        let frame_count = match successor.frame_count() {
            Ok(count) => count,
            Err(_) => return Ok(()),
        };

        let producer = self.producer.read().await.clone();
        let Some(producer) = producer else {
            return Ok(());
        };

        let outcome = producer
            .load_preview(&successor.asset_path, start_frame, frame_count, successor.fps)
            .await;

        match outcome {
            Ok(LoadOutcome::Loaded) => {
                {
                    let mut data = self.data.lock().await;
                    data.successor_segment = Some(successor);
                }
                machine.transition(BoundaryState::PreloadIssued).map_err(RuntimeError::Scheduling)?;
                machine.set_sub_state(SubState::PreviewLoaded);

                let issuance_buffer = ChronoDuration::milliseconds(self.config.issuance_buffer_ms);
                let issue_at = DateTime::<Utc>::from_timestamp_millis(boundary_ms)
                    .unwrap_or_else(Utc::now)
                    - ChronoDuration::milliseconds(self.config.min_prefeed_lead_ms)
                    - issuance_buffer;

                machine.transition(BoundaryState::SwitchScheduled).map_err(RuntimeError::Scheduling)?;
                self.schedule_issuance_timer(issue_at, boundary_ms).await;
                Ok(())
            }
            Ok(LoadOutcome::NotReady) => {
                // Retry next tick provided the boundary is still feasible
                // (the infeasibility check handles that on the next call).
                Ok(())
            }
            Err(e) => {
                self.metrics.record_preload_failure(self.channel_id, &e.to_string());
                Ok(())
            }
        }
    }

    /// Spawns the one-shot issuance timer. A real clock is used for the sleep
    /// duration regardless of which [`Clock`] implementation drives
    /// `now_utc`, since `tokio::time::sleep` has no notion of a frozen
    /// clock; tests that need determinism call
    /// [`Self::fire_issuance_timer`] directly instead of relying on the
    /// spawned task.
    async fn schedule_issuance_timer(self: &Arc<Self>, issue_at: DateTime<Utc>, boundary_ms: i64) {
        if self.timer_mode == TimerMode::Manual {
            return;
        }
        let now = Utc::now();
        let delay = (issue_at - now).to_std().unwrap_or(std::time::Duration::ZERO);
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.fire_issuance_timer(boundary_ms).await;
        });
        *self.issuance_timer.lock().await = Some(handle);
    }

    /// Runs the timer-callback logic: validates
    /// one-shot issuance, lateness tolerance, sub-state, and boundary
    /// match; transitions `SWITCH_SCHEDULED -> SWITCH_ISSUED`; issues the
    /// first `SwitchToLive` call.
    pub async fn fire_issuance_timer(&self, target_boundary_ms: i64) {
        let now = self.clock.now_utc();
        let mut guard = self.machine.lock().await;
        let Some(machine) = guard.as_mut() else { return };

        if machine.state() != BoundaryState::SwitchScheduled {
            // Duplicate or stale firing (e.g. already terminal): ignored as
            // the one-shot invariant requires, not re-raised.
            return;
        }

        let issue_at = DateTime::<Utc>::from_timestamp_millis(target_boundary_ms)
            .unwrap_or_else(Utc::now)
            - ChronoDuration::milliseconds(self.config.min_prefeed_lead_ms)
            - ChronoDuration::milliseconds(self.config.issuance_buffer_ms);
        let lateness_ms = (now - issue_at).num_milliseconds().max(0);
        if lateness_ms > self.config.issuance_tolerance_ms {
            self.metrics.record_switch_late(self.channel_id, lateness_ms);
            let err = SchedulingError::LateIssuance {
                lateness_ms,
                tolerance_ms: self.config.issuance_tolerance_ms,
            };
            machine.force_terminal(err);
            self.metrics.record_session_terminal(self.channel_id, "late_issuance");
            if machine.deferred_teardown_due() {
                self.execute_deferred_teardown(machine).await;
            }
            return;
        }

        if machine.sub_state() != SubState::PreviewLoaded {
            machine.force_terminal(SchedulingError::IllegalTransition {
                from: format!("{:?}", machine.sub_state()),
                to: "SWITCH_ISSUED (requires PREVIEW_LOADED)".to_string(),
            });
            self.metrics.record_session_terminal(self.channel_id, "illegal_transition");
            return;
        }

        if machine.plan_boundary_ms() != Some(target_boundary_ms) {
            let err = SchedulingError::BoundaryMismatch {
                declared_ms: target_boundary_ms,
                planned_ms: machine.plan_boundary_ms().unwrap_or(-1),
            };
            machine.force_terminal(err);
            self.metrics.record_session_terminal(self.channel_id, "boundary_mismatch");
            return;
        }

        if machine.transition(BoundaryState::SwitchIssued).is_err() {
            return;
        }
        machine.set_sub_state(SubState::SwitchArmed);
        self.metrics.record_switch_issued(self.channel_id, target_boundary_ms);

        let producer = self.producer.read().await.clone();
        let Some(producer) = producer else {
            machine.force_terminal(SchedulingError::InvalidSegment {
                reason: "switch issued with no producer attached".to_string(),
            });
            self.metrics.record_session_terminal(self.channel_id, "no_producer");
            return;
        };

        if let Err(e) = producer.switch_to_live(target_boundary_ms).await {
            machine.force_terminal(producer_error_to_scheduling(&e));
            self.metrics.record_session_terminal(self.channel_id, "producer_error");
        }
    }

    /// Phase 7: polls `SwitchToLive` again while SWITCH_ARMED to detect
    /// completion. Persistent not-ready past the boundary is logged once
    /// (`SwitchBeforeExhaustion`) but is not itself fatal — the successor
    /// wins as soon as it is ready.
    async fn poll_switch_completion(
        &self,
        machine: &mut BoundaryStateMachine,
        now: DateTime<Utc>,
    ) -> Result<(), RuntimeError> {
        let Some(boundary_ms) = machine.plan_boundary_ms() else {
            return Ok(());
        };
        let producer = self.producer.read().await.clone();
        let Some(producer) = producer else { return Ok(()) };

        match producer.switch_to_live(boundary_ms).await {
            Ok(SwitchOutcome::Completed) => {
                machine.transition(BoundaryState::Live).map_err(RuntimeError::Scheduling)?;
                let boundary_time = DateTime::<Utc>::from_timestamp_millis(boundary_ms).unwrap_or(now);
                let segments = self
                    .schedule_provider
                    .playout_plan_now(self.channel_id, boundary_time)
                    .await
                    .map_err(RuntimeError::Scheduling)?;
                match segments.into_iter().next() {
                    Some(next) => self.plan_boundary(machine, next).await?,
                    None => {
                        machine.transition(BoundaryState::None).map_err(RuntimeError::Scheduling)?;
                    }
                }
                Ok(())
            }
            Ok(SwitchOutcome::NotReady) => {
                if now.timestamp_millis() > boundary_ms
                    && !self.exhaustion_violation_logged.swap(true, Ordering::SeqCst)
                {
                    tracing::warn!(
                        channel_id = %self.channel_id,
                        boundary_ms,
                        "SwitchBeforeExhaustion: preview still not ready past scheduled exhaustion"
                    );
                }
                Ok(())
            }
            Err(e) => {
                let err = producer_error_to_scheduling(&e);
                machine.force_terminal(err.clone());
                self.metrics.record_session_terminal(self.channel_id, "producer_error");
                if machine.deferred_teardown_due() {
                    self.execute_deferred_teardown(machine).await;
                }
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FrozenClock;
    use crate::director::StaticDirector;
    use crate::producer::MockProducer;
    use crate::schedule::mock_grid::{GridChannelConfig, MockGridProvider};
    use chrono::TimeZone;

    fn config() -> SchedulingConfig {
        SchedulingConfig {
            min_prefeed_lead_ms: 5000,
            startup_latency_s: 7,
            scheduling_buffer_s: 2,
            teardown_grace_ms: 10_000,
            max_startup_convergence_s: 120,
            tick_hz: 1,
            issuance_buffer_ms: 500,
            issuance_tolerance_ms: 50,
        }
    }

    async fn provider_with_channel(channel_id: Uuid) -> Arc<MockGridProvider> {
        let provider = MockGridProvider::new();
        provider
            .register_channel(
                channel_id,
                GridChannelConfig::new(
                    30,
                    22,
                    "program.mov",
                    "filler.mov",
                    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                    crate::schedule::FrameRate {
                        numerator: 30000,
                        denominator: 1001,
                    },
                )
                .unwrap(),
            )
            .await;
        Arc::new(provider)
    }

    fn orchestrator(
        channel_id: Uuid,
        clock: Arc<FrozenClock>,
        provider: Arc<MockGridProvider>,
    ) -> Arc<ChannelOrchestrator> {
        Arc::new(ChannelOrchestrator::new(
            channel_id,
            clock,
            provider,
            Arc::new(StaticDirector::new()),
            config(),
            64,
            TimerMode::Manual,
            Box::new(|_mode: ChannelMode| -> Arc<dyn Producer> { Arc::new(MockProducer::new()) }),
            Arc::new(RuntimeMetrics::new()),
        ))
    }

    #[tokio::test]
    async fn tune_in_creates_session_and_plans_first_boundary() {
        let channel_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let clock = Arc::new(FrozenClock::new(start));
        let provider = provider_with_channel(channel_id).await;
        let orch = orchestrator(channel_id, clock, provider);

        orch.tune_in(Uuid::new_v4()).await.unwrap();
        let machine = orch.machine.lock().await;
        let m = machine.as_ref().unwrap();
        assert_eq!(m.state(), BoundaryState::Planned);
        assert_eq!(m.plan_boundary_ms(), Some(Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap().timestamp_millis()));
    }

    #[tokio::test]
    async fn preload_then_manual_switch_reaches_live() {
        let channel_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let clock = Arc::new(FrozenClock::new(start));
        let provider = provider_with_channel(channel_id).await;
        let orch = orchestrator(channel_id, clock.clone(), provider);

        orch.tune_in(Uuid::new_v4()).await.unwrap();

        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 53).unwrap() + ChronoDuration::milliseconds(1));
        orch.tick().await.unwrap();
        assert_eq!(orch.machine.lock().await.as_ref().unwrap().state(), BoundaryState::SwitchScheduled);

        let boundary_ms = orch.machine.lock().await.as_ref().unwrap().plan_boundary_ms().unwrap();
        // issue_at = boundary(14:22:00) - 5s - 500ms = 14:21:54.500; fire right at it.
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 54).unwrap() + ChronoDuration::milliseconds(500));
        orch.fire_issuance_timer(boundary_ms).await;
        assert_eq!(orch.machine.lock().await.as_ref().unwrap().state(), BoundaryState::SwitchIssued);

        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap() + ChronoDuration::milliseconds(2));
        orch.tick().await.unwrap();
        assert!(orch.is_live().await);
    }

    #[tokio::test]
    async fn late_issuance_is_fatal() {
        let channel_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let clock = Arc::new(FrozenClock::new(start));
        let provider = provider_with_channel(channel_id).await;
        let orch = orchestrator(channel_id, clock.clone(), provider);

        orch.tune_in(Uuid::new_v4()).await.unwrap();
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 53).unwrap() + ChronoDuration::milliseconds(1));
        orch.tick().await.unwrap();

        let boundary_ms = orch.machine.lock().await.as_ref().unwrap().plan_boundary_ms().unwrap();
        // Fires 160ms late relative to issue_at = boundary - 5s - 500ms = 14:21:54.500.
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 54).unwrap() + ChronoDuration::milliseconds(660));
        orch.fire_issuance_timer(boundary_ms).await;

        assert_eq!(orch.machine.lock().await.as_ref().unwrap().state(), BoundaryState::FailedTerminal);
    }

    #[tokio::test]
    async fn infeasible_startup_boundary_is_skipped_pre_convergence() {
        let channel_id = Uuid::new_v4();
        // Tune in 2s before the grid boundary: lead < MIN_PREFEED_LEAD_MS.
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 58).unwrap();
        let clock = Arc::new(FrozenClock::new(start));
        let provider = provider_with_channel(channel_id).await;
        let orch = orchestrator(channel_id, clock.clone(), provider);

        orch.tune_in(Uuid::new_v4()).await.unwrap();
        orch.tick().await.unwrap();

        let machine = orch.machine.lock().await;
        let m = machine.as_ref().unwrap();
        assert_ne!(m.state(), BoundaryState::FailedTerminal);
        // The infeasible 14:22:00 boundary (the program/filler split within
        // the 14:00-14:30 block) is skipped in favor of the segment the
        // provider reports starting there: the filler run, ending at the
        // next grid boundary, 14:30:00.
        assert_eq!(
            m.plan_boundary_ms(),
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 14, 30, 0).unwrap().timestamp_millis())
        );
    }

    #[tokio::test]
    async fn last_viewer_leaving_mid_cycle_defers_teardown_until_stable() {
        let channel_id = Uuid::new_v4();
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let clock = Arc::new(FrozenClock::new(start));
        let provider = provider_with_channel(channel_id).await;
        let orch = orchestrator(channel_id, clock.clone(), provider);
        let viewer = Uuid::new_v4();

        orch.tune_in(viewer).await.unwrap();
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 53).unwrap() + ChronoDuration::milliseconds(1));
        orch.tick().await.unwrap();
        assert_eq!(orch.machine.lock().await.as_ref().unwrap().state(), BoundaryState::SwitchScheduled);

        orch.tune_out(viewer).await.unwrap();
        assert!(!orch.deferred_teardown_triggered());

        let boundary_ms = orch.machine.lock().await.as_ref().unwrap().plan_boundary_ms().unwrap();
        // issue_at = boundary(14:22:00) - 5s - 500ms = 14:21:54.500; fire right at it.
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 21, 54).unwrap() + ChronoDuration::milliseconds(500));
        orch.fire_issuance_timer(boundary_ms).await;
        clock.set(Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap() + ChronoDuration::milliseconds(2));
        orch.tick().await.unwrap();

        assert!(orch.deferred_teardown_triggered());
    }
}
