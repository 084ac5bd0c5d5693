//! Shell command execution with a wall-clock budget.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Result of one execution attempt. Output is combined stdout and stderr,
/// kept for diagnostics only; the store never sees it.
#[derive(Debug)]
pub enum Outcome {
    Success { output: String },
    Failed { code: Option<i32>, output: String },
    TimedOut,
    SpawnFailed { error: io::Error },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Short single-line description for logging a failed attempt.
    pub fn describe(&self) -> String {
        match self {
            Outcome::Success { .. } => "succeeded".to_owned(),
            Outcome::Failed { code: Some(code), output } => {
                format!("exited with code {code}: {}", truncate(output))
            }
            Outcome::Failed { code: None, output } => {
                format!("terminated by signal: {}", truncate(output))
            }
            Outcome::TimedOut => "timed out".to_owned(),
            Outcome::SpawnFailed { error } => format!("could not spawn shell: {error}"),
        }
    }
}

fn truncate(output: &str) -> String {
    output.trim_end().chars().take(100).collect()
}

/// Run `command` under `sh -c`, capturing combined output. The child is
/// killed once `timeout` elapses; a timed-out attempt counts as a failure.
pub async fn run_shell(command: &str, timeout: Duration) -> Outcome {
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(error) => return Outcome::SpawnFailed { error },
    };

    // Dropping the wait future on timeout drops the child handle, and
    // kill_on_drop reaps the subprocess with it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(result)) => {
            let mut output = String::from_utf8_lossy(&result.stdout).into_owned();
            output.push_str(&String::from_utf8_lossy(&result.stderr));

            if result.status.success() {
                Outcome::Success { output }
            } else {
                Outcome::Failed {
                    code: result.status.code(),
                    output,
                }
            }
        }
        Ok(Err(error)) => Outcome::SpawnFailed { error },
        Err(_) => Outcome::TimedOut,
    }
}
