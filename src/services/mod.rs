//! Services - door access logic
//!
//! This module contains the core services:
//! - `orchestrator` - Press -> capture -> recognize -> speak -> unlock sessions
//! - `session` - Single in-flight session guard
//! - `recognition` - Face recognition pipeline over a `FaceService`
//! - `door` - Lock pin and servo unlock cycle
//! - `pwm` - Software-timed servo pulse trains

pub mod door;
pub mod orchestrator;
pub mod pwm;
pub mod recognition;
pub mod session;

// Re-export commonly used types
pub use door::{DoorActuation, DoorActuator, UnlockReport};
pub use orchestrator::{Orchestrator, PressDisposition};
pub use pwm::{PulseReport, PulseSpec, PulseTrain, SoftPwm};
pub use recognition::{FaceService, RecognitionPipeline};
pub use session::{SessionGate, SessionPermit};
