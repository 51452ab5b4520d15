//! End-to-end door sessions with a stub face service and in-memory pins

use async_trait::async_trait;
use bytes::Bytes;
use embedded_hal::digital::{ErrorType, OutputPin};
use facegate::domain::error::{FaceApiError, SpeechError};
use facegate::domain::types::{
    Candidate, FaceId, IdentifyResult, Level, OrchestratorState, PersonId, PressEvent,
    PressSource,
};
use facegate::infra::config::MessagesConfig;
use facegate::infra::Metrics;
use facegate::io::{Speaker, StillCamera};
use facegate::services::{
    DoorActuation, DoorActuator, FaceService, Orchestrator, PressDisposition, PulseSpec,
    RecognitionPipeline, SessionGate, SoftPwm,
};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Output pin that logs every level change
#[derive(Clone, Default)]
struct LoggedPin {
    writes: Arc<Mutex<Vec<(Instant, Level)>>>,
}

impl LoggedPin {
    fn levels(&self) -> Vec<Level> {
        self.writes.lock().iter().map(|w| w.1).collect()
    }
}

impl ErrorType for LoggedPin {
    type Error = Infallible;
}

impl OutputPin for LoggedPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.writes.lock().push((Instant::now(), Level::Low));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.writes.lock().push((Instant::now(), Level::High));
        Ok(())
    }
}

/// Recognizes every face as one fixed person
struct OnePersonService {
    name: Option<&'static str>,
    person: PersonId,
    /// Added latency on detect
    latency: Duration,
}

#[async_trait]
impl FaceService for OnePersonService {
    async fn detect_faces(&self, _image: Bytes) -> Result<Vec<FaceId>, FaceApiError> {
        tokio::time::sleep(self.latency).await;
        Ok(match self.name {
            Some(_) => vec![FaceId(Uuid::now_v7())],
            None => Vec::new(),
        })
    }

    async fn identify(
        &self,
        _group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, FaceApiError> {
        Ok(face_ids
            .iter()
            .map(|id| IdentifyResult {
                face_id: *id,
                candidates: vec![Candidate { person_id: self.person, confidence: 0.8 }],
            })
            .collect())
    }

    async fn get_person_name(
        &self,
        _group_id: &str,
        _person_id: PersonId,
    ) -> Result<String, FaceApiError> {
        Ok(self.name.unwrap_or_default().to_string())
    }
}

#[derive(Default)]
struct TranscriptSpeaker {
    lines: Mutex<Vec<(Instant, String)>>,
}

#[async_trait]
impl Speaker for TranscriptSpeaker {
    async fn speak(&self, text: &str, _min_duration: Duration) -> Result<(), SpeechError> {
        self.lines.lock().push((Instant::now(), text.to_string()));
        Ok(())
    }
}

struct Door {
    orchestrator: Arc<Orchestrator>,
    speaker: Arc<TranscriptSpeaker>,
    lock: LoggedPin,
    servo: LoggedPin,
    metrics: Arc<Metrics>,
    _image: NamedTempFile,
}

fn door(name: Option<&'static str>) -> Door {
    door_with_latency(name, Duration::ZERO)
}

fn door_with_latency(name: Option<&'static str>, latency: Duration) -> Door {
    let mut image = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
    image.write_all(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]).unwrap();

    let lock = LoggedPin::default();
    let servo = LoggedPin::default();
    let short = |spec: PulseSpec| PulseSpec { window_ticks: 60_000, ..spec };
    let actuator = DoorActuator::new(
        lock.clone(),
        SoftPwm::new(servo.clone(), Duration::ZERO),
        Level::High,
        Duration::from_millis(100),
        short(PulseSpec::OPEN),
        short(PulseSpec::CLOSED),
    );

    let service = OnePersonService { name, person: PersonId(Uuid::now_v7()), latency };
    let pipeline = RecognitionPipeline::new(Arc::new(service), "visitors", Duration::from_secs(2));
    let speaker = Arc::new(TranscriptSpeaker::default());
    let metrics = Arc::new(Metrics::new());

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(StillCamera::new(image.path())),
        speaker.clone(),
        Arc::new(pipeline),
        Some(Arc::new(actuator) as Arc<dyn DoorActuation>),
        SessionGate::new(),
        metrics.clone(),
        MessagesConfig::default(),
    ));

    Door { orchestrator, speaker, lock, servo, metrics, _image: image }
}

async fn wait_idle(orchestrator: &Orchestrator) {
    tokio::time::timeout(Duration::from_secs(5), orchestrator.gate().wait_idle())
        .await
        .expect("door should return to idle");
}

#[tokio::test]
async fn test_known_visitor_full_cycle() {
    let door = door(Some("Alice"));

    let press = PressEvent::new(PressSource::Button);
    assert_eq!(door.orchestrator.submit(press), PressDisposition::Accepted);

    // A bounce or second press during the cycle is dropped
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(door.orchestrator.gate().state(), OrchestratorState::Busy);
    assert_eq!(
        door.orchestrator.submit(PressEvent::new(PressSource::Button)),
        PressDisposition::DroppedBusy
    );

    wait_idle(&door.orchestrator).await;

    let lines = door.speaker.lines.lock().clone();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].1, "Welcome Alice. I will open the door.");

    // startup lock, unlock, relock
    assert_eq!(door.lock.levels(), vec![Level::Low, Level::High, Level::Low]);
    let unlock_at = door.lock.writes.lock()[1].0;
    assert!(lines[0].0 <= unlock_at);

    let relock_at = door.lock.writes.lock()[2].0;
    let last_servo_write = door.servo.writes.lock().last().unwrap().0;
    assert!(relock_at >= last_servo_write);

    assert_eq!(door.metrics.unlocks_total(), 1);
    assert_eq!(door.metrics.presses_dropped_busy(), 1);
}

#[tokio::test]
async fn test_empty_frame_never_touches_lock() {
    let door = door(None);

    door.orchestrator.submit(PressEvent::new(PressSource::Virtual));
    wait_idle(&door.orchestrator).await;

    assert!(door.speaker.lines.lock().is_empty());
    assert_eq!(door.lock.levels(), vec![Level::Low]);
    assert_eq!(door.metrics.unlocks_total(), 0);
}

#[tokio::test]
async fn test_sequential_visitors_each_unlock() {
    let door = door(Some("Bob"));

    for _ in 0..2 {
        assert_eq!(
            door.orchestrator.submit(PressEvent::new(PressSource::Button)),
            PressDisposition::Accepted
        );
        wait_idle(&door.orchestrator).await;
    }

    assert_eq!(door.metrics.unlocks_total(), 2);
    assert_eq!(
        door.lock.levels(),
        vec![Level::Low, Level::High, Level::Low, Level::High, Level::Low]
    );
}

#[tokio::test]
async fn test_shutdown_drain_leaves_door_locked() {
    // Detect is slow enough that the unlock starts late in the drain window,
    // and the hold carries the cycle past it
    let door = door_with_latency(Some("Alice"), Duration::from_millis(150));

    door.orchestrator.submit(PressEvent::new(PressSource::Button));
    let drained = door.orchestrator.drain(Duration::from_millis(250)).await;

    assert!(drained);
    assert_eq!(door.lock.levels(), vec![Level::Low, Level::High, Level::Low]);
    assert_eq!(door.orchestrator.gate().state(), OrchestratorState::Idle);
}
