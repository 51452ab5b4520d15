//! Still-image capture
//!
//! `CommandCamera` shells out to a capture program (fswebcam by default) and
//! overwrites one file per capture; sessions never overlap so a single file is
//! enough. `StillCamera` serves a fixed image for bench setups and tests.

use crate::domain::error::CameraError;
use crate::domain::types::CapturedImage;
use crate::io::command::{stderr_tail, CommandTemplate};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

#[async_trait]
pub trait Camera: Send + Sync {
    async fn capture(&self) -> Result<CapturedImage, CameraError>;
}

pub struct CommandCamera {
    command: CommandTemplate,
    output: PathBuf,
}

impl CommandCamera {
    pub fn new(
        argv: &[String],
        capture_dir: impl Into<PathBuf>,
        extension: &str,
    ) -> Result<Self, CameraError> {
        let command = CommandTemplate::from_argv(argv)
            .ok_or_else(|| CameraError::NotReady("empty capture command".to_string()))?;
        let output = capture_dir.into().join(format!("visitor.{extension}"));
        Ok(Self { command, output })
    }
}

#[async_trait]
impl Camera for CommandCamera {
    async fn capture(&self) -> Result<CapturedImage, CameraError> {
        let start = Instant::now();
        if let Some(dir) = self.output.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        // Stale frames must never be mistaken for a fresh capture
        let _ = tokio::fs::remove_file(&self.output).await;

        let path = self.output.display().to_string();
        let output = match self.command.output("path", &path).await {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CameraError::NotReady(format!(
                    "capture program {} not found",
                    self.command.program()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        if !output.status.success() {
            return Err(CameraError::Capture(stderr_tail(&output)));
        }

        match tokio::fs::metadata(&self.output).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => return Err(CameraError::NotReady(format!("no frame written to {path}"))),
        }

        debug!(path = %path, latency_ms = %start.elapsed().as_millis(), "camera_captured");
        Ok(CapturedImage::new(&self.output))
    }
}

/// Serves the same file on every capture
pub struct StillCamera {
    path: PathBuf,
}

impl StillCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        info!(path = %path.display(), "camera_still_file");
        Self { path }
    }
}

#[async_trait]
impl Camera for StillCamera {
    async fn capture(&self) -> Result<CapturedImage, CameraError> {
        if tokio::fs::try_exists(&self.path).await? {
            Ok(CapturedImage::new(&self.path))
        } else {
            Err(CameraError::NotReady(format!("{} does not exist", self.path.display())))
        }
    }
}
