use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use knobd_core::app::ApplicationId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Outcome of asking the user to choose an application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    Selected(ApplicationId),
    Cancelled,
}

/// Interactive chooser over a set of candidate applications.
pub trait Picker {
    fn pick(&self, candidates: &[ApplicationId]) -> impl Future<Output = Pick> + Send;
}

/// Runs a dmenu-style command: candidates on stdin, one per line, the
/// choice on stdout.
#[derive(Debug, Clone)]
pub struct CommandPicker {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPicker {
    pub fn new(command: String, args: Vec<String>, timeout: Duration) -> Self {
        CommandPicker {
            command,
            args,
            timeout,
        }
    }

    async fn run(&self, candidates: &[ApplicationId]) -> std::io::Result<Option<String>> {
        let mut child = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let input: String = candidates.iter().map(|c| format!("{c}\n")).collect();
            stdin.write_all(input.as_bytes()).await?;
            // Dropping stdin closes it so the picker sees EOF
        }

        let mut output = String::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_string(&mut output).await?;
        }
        let status = child.wait().await?;
        if !status.success() {
            debug!("picker exited with {status}");
            return Ok(None);
        }
        Ok(Some(output))
    }
}

impl Picker for CommandPicker {
    async fn pick(&self, candidates: &[ApplicationId]) -> Pick {
        if candidates.is_empty() {
            return Pick::Cancelled;
        }

        match tokio::time::timeout(self.timeout, self.run(candidates)).await {
            Ok(Ok(Some(output))) => parse_choice(&output, candidates),
            Ok(Ok(None)) => Pick::Cancelled,
            Ok(Err(e)) => {
                warn!("failed to run picker '{}': {e}", self.command);
                Pick::Cancelled
            }
            Err(_) => {
                warn!("picker timed out after {}s", self.timeout.as_secs());
                Pick::Cancelled
            }
        }
    }
}

/// First output line, accepted only if it names one of the candidates.
fn parse_choice(output: &str, candidates: &[ApplicationId]) -> Pick {
    let Some(choice) = output.lines().next().and_then(ApplicationId::new) else {
        return Pick::Cancelled;
    };
    if candidates.contains(&choice) {
        Pick::Selected(choice)
    } else {
        debug!("picker returned unknown application '{choice}'");
        Pick::Cancelled
    }
}

#[cfg(test)]
pub use mock::MockPicker;
