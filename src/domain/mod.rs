//! Domain models - core types shared by every component
//!
//! This module contains the canonical data types used throughout the system:
//! - `PressEvent` - a debounced doorbell activation
//! - `RecognitionResult` - outcome of one recognition pipeline run
//! - `DoorSession` - one press-to-resolution cycle
//! - `error` - typed errors at each collaborator boundary

pub mod error;
pub mod types;

pub use error::{CameraError, FaceApiError, HardwareError, RecognitionError, SpeechError};
pub use types::{
    CapturedImage, DoorSession, FailureReason, Level, OrchestratorState, PressEvent, PressSource,
    RecognitionResult, SessionOutcome,
};
