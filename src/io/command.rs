//! External command templates
//!
//! Camera and speech adapters shell out to configurable programs such as
//! `["fswebcam", "--no-banner", "-r", "1280x720", "{path}"]` or
//! `["espeak", "{text}"]`. Templates are argv lists; `{name}` inside an argument
//! is replaced by the value, which is never re-split on whitespace.

use std::io;
use std::process::{Output, Stdio};
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    program: String,
    args: Vec<String>,
}

impl CommandTemplate {
    /// None if the argv list is empty or names no program
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        if program.trim().is_empty() {
            return None;
        }
        Some(Self { program: program.clone(), args: args.to_vec() })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with every `{placeholder}` token replaced by `value`
    pub fn render(&self, placeholder: &str, value: &str) -> Vec<String> {
        let token = format!("{{{placeholder}}}");
        self.args
            .iter()
            .map(|arg| arg.replace(&token, value))
            .collect()
    }

    /// Run to completion with captured output
    pub async fn output(&self, placeholder: &str, value: &str) -> io::Result<Output> {
        Command::new(&self.program)
            .args(self.render(placeholder, value))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Last non-empty stderr line, for error messages
pub fn stderr_tail(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().to_string())
        .unwrap_or_else(|| format!("exit status {}", output.status))
}
