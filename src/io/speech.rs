//! Spoken feedback at the door
//!
//! `speak` resolves no sooner than the requested minimum duration, so callers
//! can sequence speech before the next physical step without guessing how long
//! synthesis takes.

use crate::domain::error::SpeechError;
use crate::io::command::{stderr_tail, CommandTemplate};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str, min_duration: Duration) -> Result<(), SpeechError>;
}

/// Runs a speech synthesis program
pub struct CommandSpeaker {
    command: CommandTemplate,
}

impl CommandSpeaker {
    pub fn new(argv: &[String]) -> Result<Self, SpeechError> {
        let command = CommandTemplate::from_argv(argv)
            .ok_or_else(|| SpeechError::Command("empty speech command".to_string()))?;
        Ok(Self { command })
    }

    async fn synthesize(&self, text: &str) -> Result<(), SpeechError> {
        let output = self.command.output("text", text).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SpeechError::Command(stderr_tail(&output)))
        }
    }
}

#[async_trait]
impl Speaker for CommandSpeaker {
    async fn speak(&self, text: &str, min_duration: Duration) -> Result<(), SpeechError> {
        debug!(text = %text, "speech_start");
        let (result, ()) = tokio::join!(self.synthesize(text), tokio::time::sleep(min_duration));
        result
    }
}

/// Logs messages instead of playing them
#[derive(Debug, Default)]
pub struct LogSpeaker;

#[async_trait]
impl Speaker for LogSpeaker {
    async fn speak(&self, text: &str, min_duration: Duration) -> Result<(), SpeechError> {
        info!(text = %text, "speech");
        tokio::time::sleep(min_duration).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_speak_waits_min_duration() {
        let speaker = CommandSpeaker::new(&argv(&["true", "{text}"])).unwrap();
        let start = Instant::now();
        speaker.speak("The door is ready.", Duration::from_millis(120)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_failed_synthesis_is_error() {
        let speaker = CommandSpeaker::new(&argv(&["false"])).unwrap();
        let result = speaker.speak("hello", Duration::ZERO).await;
        assert!(matches!(result, Err(SpeechError::Command(_))));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let speaker = CommandSpeaker::new(&argv(&["facegate-no-such-tts", "{text}"])).unwrap();
        let result = speaker.speak("hello", Duration::ZERO).await;
        assert!(matches!(result, Err(SpeechError::Io(_))));
    }

    #[tokio::test]
    async fn test_log_speaker() {
        let start = Instant::now();
        LogSpeaker.speak("hello", Duration::from_millis(30)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
