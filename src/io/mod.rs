//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `gpio` - sysfs GPIO pins behind the embedded-hal digital traits
//! - `doorbell` - Debounced doorbell button monitoring
//! - `face_api` - REST client for the face detection/identification service
//! - `camera` - Still-image capture
//! - `speech` - Spoken feedback
//! - `command` - External command templates shared by camera and speech
//! - `http` - Control and Prometheus metrics HTTP endpoint

pub mod camera;
pub mod command;
pub mod doorbell;
pub mod face_api;
pub mod gpio;
pub mod http;
pub mod speech;

// Re-export commonly used types
pub use camera::{Camera, CommandCamera, StillCamera};
pub use doorbell::{Debouncer, DoorbellMonitor};
pub use face_api::FaceApiClient;
pub use gpio::GpioController;
pub use speech::{CommandSpeaker, LogSpeaker, Speaker};
