//! Access orchestrator
//!
//! Turns doorbell presses into door sessions: capture a still, recognize the
//! visitor, speak the verdict and, for known visitors, run the unlock cycle.
//!
//! At most one session is in flight. A press arriving while Busy is dropped,
//! not queued. The unlock task inherits the session permit, so the state only
//! returns to Idle once the door has been relocked.
//!
//! Shutdown goes through [`Orchestrator::drain`]: an unlock that has started
//! always runs to relock, and once the drain gives up no new unlock may start.

use crate::domain::types::{
    DoorSession, FailureReason, OrchestratorState, PressEvent, RecognitionResult,
    SessionOutcome,
};
use crate::infra::config::MessagesConfig;
use crate::infra::metrics::Metrics;
use crate::io::camera::Camera;
use crate::io::speech::Speaker;
use crate::services::door::DoorActuation;
use crate::services::recognition::RecognitionPipeline;
use crate::services::session::{SessionGate, SessionPermit};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Minimum playback time for each spoken message
pub const WELCOME_SPEECH: Duration = Duration::from_millis(1500);
pub const REJECTION_SPEECH: Duration = Duration::from_millis(2000);
pub const NO_CAMERA_SPEECH: Duration = Duration::from_millis(3000);
pub const GREETING_SPEECH: Duration = Duration::from_millis(3000);
pub const READY_SPEECH: Duration = Duration::from_millis(2000);
/// Pause between the startup greeting and the ready message
pub const STARTUP_PAUSE: Duration = Duration::from_secs(3);

/// Door actuation lifecycle as seen by shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Actuation {
    Ready,
    Unlocking,
    /// Shutdown stopped waiting; unlocks are refused from here on
    Closed,
}

/// What happened to a submitted press
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressDisposition {
    Accepted,
    DroppedBusy,
}

pub struct Orchestrator {
    camera: Arc<dyn Camera>,
    speaker: Arc<dyn Speaker>,
    pipeline: Arc<RecognitionPipeline>,
    /// None when GPIO is unavailable
    actuator: Option<Arc<dyn DoorActuation>>,
    gate: SessionGate,
    actuation: Arc<watch::Sender<Actuation>>,
    metrics: Arc<Metrics>,
    messages: MessagesConfig,
}

impl Orchestrator {
    pub fn new(
        camera: Arc<dyn Camera>,
        speaker: Arc<dyn Speaker>,
        pipeline: Arc<RecognitionPipeline>,
        actuator: Option<Arc<dyn DoorActuation>>,
        gate: SessionGate,
        metrics: Arc<Metrics>,
        messages: MessagesConfig,
    ) -> Self {
        if actuator.is_none() {
            warn!("orchestrator_no_actuator");
        }
        let (actuation, _) = watch::channel(Actuation::Ready);
        Self {
            camera,
            speaker,
            pipeline,
            actuator,
            gate,
            actuation: Arc::new(actuation),
            metrics,
            messages,
        }
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Speak the startup greeting and ready message. Doorbell presses are
    /// still accepted meanwhile.
    pub async fn announce_ready(&self) {
        self.say(&self.messages.greeting, GREETING_SPEECH).await;
        tokio::time::sleep(STARTUP_PAUSE).await;
        self.say(&self.messages.ready, READY_SPEECH).await;
        info!("door_ready");
    }

    /// Wait for the in-flight session to finish on shutdown.
    ///
    /// Gives up after `bound` unless the door is mid-cycle: an unlock that has
    /// started is always awaited through relock. When the drain gives up, no
    /// later unlock may start, so the process can exit with the door locked.
    /// Returns true if the orchestrator reached Idle.
    pub async fn drain(&self, bound: Duration) -> bool {
        let mut actuation = self.actuation.subscribe();
        let idle = self.gate.wait_idle();
        tokio::pin!(idle);

        tokio::select! {
            _ = &mut idle => return true,
            _ = actuation.wait_for(|a| *a == Actuation::Unlocking) => {}
            _ = tokio::time::sleep(bound) => {
                let mut unlocking = false;
                self.actuation.send_if_modified(|a| match a {
                    Actuation::Ready => {
                        *a = Actuation::Closed;
                        true
                    }
                    Actuation::Unlocking => {
                        unlocking = true;
                        false
                    }
                    Actuation::Closed => false,
                });
                if !unlocking {
                    let idle = self.gate.state() == OrchestratorState::Idle;
                    if !idle {
                        warn!(waited_ms = %bound.as_millis(), "drain_gave_up_door_locked");
                    }
                    return idle;
                }
            }
        }

        info!("drain_waiting_for_relock");
        idle.await;
        true
    }

    /// Start a session for `press` unless one is already in flight
    pub fn submit(self: &Arc<Self>, press: PressEvent) -> PressDisposition {
        self.metrics.record_press();

        let Some(permit) = self.gate.try_begin() else {
            self.metrics.record_press_dropped();
            info!(source = %press.source.as_str(), "press_dropped_busy");
            return PressDisposition::DroppedBusy;
        };
        self.metrics.set_busy(true);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_session(press, permit).await;
        });
        PressDisposition::Accepted
    }

    /// Consume presses until shutdown
    pub async fn run(
        self: Arc<Self>,
        mut presses: mpsc::Receiver<PressEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("orchestrator_started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("orchestrator_shutdown");
                        return;
                    }
                }
                press = presses.recv() => {
                    let Some(press) = press else {
                        info!("orchestrator_press_channel_closed");
                        return;
                    };
                    debug!(
                        source = %press.source.as_str(),
                        queued_us = %press.at.elapsed().as_micros(),
                        "press_received"
                    );
                    self.submit(press);
                }
            }
        }
    }

    async fn run_session(&self, press: PressEvent, permit: SessionPermit) -> DoorSession {
        let started = Instant::now();
        let started_at = chrono::Utc::now();
        info!(source = %press.source.as_str(), "session_started");

        let mut permit = Some(permit);
        let (result, outcome) = self.resolve(&mut permit).await;
        let session = self.finish(press, started_at, started, result, outcome);

        // Still held unless the unlock task took it
        if let Some(permit) = permit {
            self.release(permit);
        }
        session
    }

    async fn resolve(
        &self,
        permit: &mut Option<SessionPermit>,
    ) -> (Option<RecognitionResult>, SessionOutcome) {
        let image = match self.camera.capture().await {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, "camera_unavailable");
                self.say(&self.messages.no_camera, NO_CAMERA_SPEECH).await;
                return (None, SessionOutcome::CameraUnavailable);
            }
        };

        let recognition_start = Instant::now();
        let result = self.pipeline.recognize(&image).await;
        self.metrics.record_recognition(&result, recognition_start.elapsed().as_millis() as u64);

        let outcome = match &result {
            RecognitionResult::Identified(name) => {
                info!(visitor = %name, "visitor_identified");
                self.say(&self.messages.welcome_for(name), WELCOME_SPEECH).await;

                match (&self.actuator, permit.take()) {
                    (Some(actuator), Some(held)) => {
                        match self.start_unlock(Arc::clone(actuator), held) {
                            Ok(()) => SessionOutcome::Unlocked,
                            Err(held) => {
                                *permit = Some(held);
                                warn!(visitor = %name, "unlock_refused_shutting_down");
                                SessionOutcome::WelcomedWithoutActuator
                            }
                        }
                    }
                    (_, held) => {
                        *permit = held;
                        warn!(visitor = %name, "door_actuator_unavailable");
                        SessionOutcome::WelcomedWithoutActuator
                    }
                }
            }
            RecognitionResult::NoMatch
            | RecognitionResult::Failure(FailureReason::ServiceError) => {
                self.say(&self.messages.not_recognized, REJECTION_SPEECH).await;
                SessionOutcome::Rejected
            }
            RecognitionResult::Failure(FailureReason::NoFaceDetected) => SessionOutcome::Ignored,
            RecognitionResult::Failure(FailureReason::InvalidImage) => {
                self.say(&self.messages.no_camera, NO_CAMERA_SPEECH).await;
                SessionOutcome::CameraUnavailable
            }
        };

        (Some(result), outcome)
    }

    /// Run the unlock cycle detached; the permit is released after relock.
    /// Hands the permit back if shutdown has closed actuation.
    fn start_unlock(
        &self,
        actuator: Arc<dyn DoorActuation>,
        permit: SessionPermit,
    ) -> Result<(), SessionPermit> {
        let began = self.actuation.send_if_modified(|a| {
            if *a == Actuation::Ready {
                *a = Actuation::Unlocking;
                true
            } else {
                false
            }
        });
        if !began {
            return Err(permit);
        }

        let actuation = Arc::clone(&self.actuation);
        let metrics = Arc::clone(&self.metrics);
        metrics.record_unlock();
        tokio::spawn(async move {
            let report = actuator.unlock().await;
            if report.open.is_none() || report.closed.is_none() || report.lock_errors > 0 {
                warn!(
                    open = %report.open.is_some(),
                    closed = %report.closed.is_some(),
                    lock_errors = %report.lock_errors,
                    "door_cycle_degraded"
                );
            }
            // Ready before Idle, so the next session can unlock
            actuation.send_replace(Actuation::Ready);
            metrics.set_busy(false);
            drop(permit);
        });
        Ok(())
    }

    fn release(&self, permit: SessionPermit) {
        self.metrics.set_busy(false);
        drop(permit);
    }

    async fn say(&self, text: &str, min_duration: Duration) {
        if let Err(e) = self.speaker.speak(text, min_duration).await {
            self.metrics.record_speech_error();
            warn!(error = %e, text = %text, "speech_failed");
        }
    }

    fn finish(
        &self,
        press: PressEvent,
        started_at: chrono::DateTime<chrono::Utc>,
        started: Instant,
        result: Option<RecognitionResult>,
        outcome: SessionOutcome,
    ) -> DoorSession {
        self.metrics.record_session(outcome);
        let session = DoorSession { press, started_at, result, outcome, elapsed: started.elapsed() };

        info!(
            source = %session.press.source.as_str(),
            started_at = %session.started_at.to_rfc3339(),
            result = %session.result.as_ref().map_or("none", |r| r.as_str()),
            outcome = %session.outcome.as_str(),
            elapsed_ms = %session.elapsed.as_millis(),
            "session_complete"
        );
        session
    }
}
