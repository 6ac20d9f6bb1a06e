//! Timed Process Execution
//!
//! Runs host CLI tools (adb, fastboot, emulator) with a hard deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Process execution errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured outcome of a single CLI invocation
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit code, if the process exited on its own
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// The deadline expired and the process was killed
    pub timed_out: bool,
}

impl CommandResult {
    /// Successful run: exited on its own with status zero
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Build a zero-exit result, used by fakes and tests
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    /// Build a failed result, used by fakes and tests
    pub fn failed(exit_code: i32, stderr: &str) -> Self {
        Self {
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.to_string(),
            timed_out: false,
        }
    }

    /// Build a timed-out result, used by fakes and tests
    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// Runs a host command with a deadline, capturing output
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run_timed(
        &self,
        timeout: Duration,
        program: &Path,
        args: &[&str],
    ) -> Result<CommandResult, CommandError>;
}

/// ProcessRunner backed by tokio child processes
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run_timed(
        &self,
        timeout: Duration,
        program: &Path,
        args: &[&str],
    ) -> Result<CommandResult, CommandError> {
        debug!("run {:?} {:?} (timeout {:?})", program, args, timeout);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Ok(result) => {
                let output = result.map_err(|source| CommandError::Spawn {
                    program: program.display().to_string(),
                    source,
                })?;
                Ok(CommandResult {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    timed_out: false,
                })
            }
            // Dropping the output future kills the child (kill_on_drop)
            Err(_) => Ok(CommandResult::timeout()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let runner = TokioProcessRunner;
        let result = runner
            .run_timed(Duration::from_secs(5), &PathBuf::from("echo"), &["hello"])
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let runner = TokioProcessRunner;
        let result = runner
            .run_timed(Duration::from_millis(100), &PathBuf::from("sleep"), &["5"])
            .await
            .unwrap();

        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let runner = TokioProcessRunner;
        let result = runner
            .run_timed(
                Duration::from_secs(1),
                &PathBuf::from("/nonexistent/definitely-not-a-binary"),
                &[],
            )
            .await;

        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
