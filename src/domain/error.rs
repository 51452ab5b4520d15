//! Typed errors at each collaborator boundary

use crate::domain::types::FailureReason;
use thiserror::Error;

/// Digital I/O failures. Non-fatal: the caller disables physical I/O.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("gpio controller unavailable: {0}")]
    Unavailable(String),
    #[error("gpio pin {0} already claimed")]
    PinClaimed(u32),
    #[error("gpio pin {pin}: {source}")]
    Io {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
}

impl embedded_hal::digital::Error for HardwareError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// Face service call failures
#[derive(Debug, Error)]
pub enum FaceApiError {
    #[error("face api transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("face api returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("face api call timed out after {0} ms")]
    Timeout(u64),
    #[error("face api response could not be decoded: {0}")]
    Decode(String),
}

/// Recognition pipeline stage failures
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("captured image is missing, empty or of an unsupported format")]
    InvalidImage,
    #[error("no face detected in captured image")]
    NoFaceDetected,
    #[error("recognition service error")]
    ServiceError,
}

impl From<RecognitionError> for FailureReason {
    fn from(e: RecognitionError) -> Self {
        match e {
            RecognitionError::InvalidImage => FailureReason::InvalidImage,
            RecognitionError::NoFaceDetected => FailureReason::NoFaceDetected,
            RecognitionError::ServiceError => FailureReason::ServiceError,
        }
    }
}

impl From<FaceApiError> for RecognitionError {
    fn from(_: FaceApiError) -> Self {
        RecognitionError::ServiceError
    }
}

/// Camera capture failures
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera not initialized: {0}")]
    NotReady(String),
    #[error("capture command failed: {0}")]
    Capture(String),
    #[error("camera io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Speech playback failures
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech command failed: {0}")]
    Command(String),
    #[error("speech io error: {0}")]
    Io(#[from] std::io::Error),
}
