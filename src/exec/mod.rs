//! Hardware command execution.
//!
//! Probe commands shell out to the BlueZ userland tools. The runner is a
//! trait so the scheduler can be exercised against a scripted fake; the
//! production implementation runs under a bounded timeout with forced
//! termination.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Failure text for outcomes that are negative but expected from live
/// radios; these are normal probe failures, not errors.
pub const EXPECTED_FAILURES: &[&str] = &["No route to host", "Input/output error", "Host is down"];

/// Whether command output matches an expected negative outcome.
pub fn is_expected_failure(output: &str) -> bool {
    EXPECTED_FAILURES.iter().any(|p| output.contains(p))
}

/// Captured result of one hardware command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when the process died without one (signal, timeout).
    pub status: Option<i32>,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Executes a shell-style command string with a bounded timeout.
///
/// An `Err` means the command could not be spawned at all (resource
/// exhaustion); that is fatal to the caller. Command-level failures are
/// reported through `CommandOutput`.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Production runner: `sh -c` under `tokio::time::timeout`, with the child
/// killed when the timeout fires.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning `{command}`"))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => {
                let output = result.context("collecting command output")?;
                Ok(CommandOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    status: output.status.code(),
                    timed_out: false,
                })
            }
            // Dropping the in-flight wait kills the child (kill_on_drop).
            Err(_) => Ok(CommandOutput {
                timed_out: true,
                ..CommandOutput::default()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_failure_patterns() {
        assert!(is_expected_failure("connect: No route to host"));
        assert!(is_expected_failure("Read failed: Input/output error"));
        assert!(is_expected_failure("Host is down"));
        assert!(!is_expected_failure("Invalid device: hci9"));
    }

    #[tokio::test]
    async fn test_shell_runner_captures_output() {
        let out = ShellRunner
            .run("echo hello; echo oops >&2", Duration::from_secs(5))
            .await
            .expect("spawn should succeed");

        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_shell_runner_reports_nonzero_status() {
        let out = ShellRunner
            .run("exit 3", Duration::from_secs(5))
            .await
            .expect("spawn should succeed");

        assert!(!out.success());
        assert_eq!(out.status, Some(3));
    }

    #[tokio::test]
    async fn test_shell_runner_times_out() {
        let out = ShellRunner
            .run("sleep 5", Duration::from_millis(50))
            .await
            .expect("spawn should succeed");

        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.status, None);
    }
}
