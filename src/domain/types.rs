//! Shared types for the door controller

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Newtype wrapper for face IDs returned by the detection service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(pub Uuid);

impl std::fmt::Display for FaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for enrolled person IDs in the visitor group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub Uuid);

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ranked candidate for a detected face. Rank 0 is the best match.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub person_id: PersonId,
    pub confidence: f64,
}

/// Identification result for a single detected face
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifyResult {
    pub face_id: FaceId,
    /// Candidates in rank order
    pub candidates: Vec<Candidate>,
}

/// Logical pin level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    #[inline]
    pub fn inverted(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::High => "high",
        }
    }
}

/// Where a press came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressSource {
    /// Physical doorbell button
    Button,
    /// HTTP control endpoint
    Virtual,
}

impl PressSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressSource::Button => "button",
            PressSource::Virtual => "virtual",
        }
    }
}

/// A logical doorbell activation
#[derive(Debug, Clone, Copy)]
pub struct PressEvent {
    /// Monotonic time the qualifying edge was observed
    pub at: Instant,
    pub source: PressSource,
}

impl PressEvent {
    pub fn new(source: PressSource) -> Self {
        Self { at: Instant::now(), source }
    }
}

/// Why a recognition run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NoFaceDetected,
    InvalidImage,
    ServiceError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoFaceDetected => "no_face_detected",
            FailureReason::InvalidImage => "invalid_image",
            FailureReason::ServiceError => "service_error",
        }
    }
}

/// Outcome of one recognition pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionResult {
    Identified(String),
    NoMatch,
    Failure(FailureReason),
}

impl RecognitionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecognitionResult::Identified(_) => "identified",
            RecognitionResult::NoMatch => "no_match",
            RecognitionResult::Failure(reason) => reason.as_str(),
        }
    }
}

/// Orchestrator state. At most one session is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Busy,
}

impl OrchestratorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Busy => "busy",
        }
    }
}

/// Supported still-image encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Match a file extension, case-insensitive
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "gif" => Some(ImageFormat::Gif),
            "bmp" => Some(ImageFormat::Bmp),
            _ => None,
        }
    }
}

/// A still image produced by the camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub path: PathBuf,
}

impl CapturedImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Encoding implied by the file extension
    pub fn format(&self) -> Option<ImageFormat> {
        self.path.extension().and_then(|e| e.to_str()).and_then(ImageFormat::from_extension)
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Visitor welcomed and unlock sequence started
    Unlocked,
    /// Visitor welcomed but the door was not actuated (no actuator, or shutting down)
    WelcomedWithoutActuator,
    /// Rejection spoken
    Rejected,
    /// Nothing usable in frame, silent return
    Ignored,
    /// Camera could not deliver a valid image
    CameraUnavailable,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Unlocked => "unlocked",
            SessionOutcome::WelcomedWithoutActuator => "welcomed_without_actuator",
            SessionOutcome::Rejected => "rejected",
            SessionOutcome::Ignored => "ignored",
            SessionOutcome::CameraUnavailable => "camera_unavailable",
        }
    }
}

/// Ephemeral record of one press-to-resolution cycle. Logged, never persisted.
#[derive(Debug, Clone)]
pub struct DoorSession {
    pub press: PressEvent,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// None when capture failed before recognition ran
    pub result: Option<RecognitionResult>,
    pub outcome: SessionOutcome,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_from_extension() {
        assert_eq!(ImageFormat::from_extension("JPG"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_extension("Png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_extension("gif"), Some(ImageFormat::Gif));
        assert_eq!(ImageFormat::from_extension("bmp"), Some(ImageFormat::Bmp));
        assert_eq!(ImageFormat::from_extension("tiff"), None);
    }

    #[test]
    fn test_captured_image_format() {
        assert_eq!(CapturedImage::new("/tmp/a.JPG").format(), Some(ImageFormat::Jpeg));
        assert_eq!(CapturedImage::new("/tmp/noext").format(), None);
    }

    #[test]
    fn test_level_inverted() {
        assert_eq!(Level::Low.inverted(), Level::High);
        assert_eq!(Level::High.inverted(), Level::Low);
    }

    #[test]
    fn test_recognition_result_as_str() {
        assert_eq!(RecognitionResult::Identified("Alice".into()).as_str(), "identified");
        assert_eq!(RecognitionResult::NoMatch.as_str(), "no_match");
        assert_eq!(
            RecognitionResult::Failure(FailureReason::ServiceError).as_str(),
            "service_error"
        );
    }
}
