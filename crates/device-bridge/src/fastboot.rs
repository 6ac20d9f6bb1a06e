//! Fastboot CLI Client
//!
//! Bootloader-mode devices are invisible to adb; this client shells out to
//! the fastboot binary to list and drive them.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::runner::{CommandResult, ProcessRunner};

/// Fastboot errors
#[derive(Debug, thiserror::Error)]
pub enum FastbootError {
    #[error("fastboot command failed: {0}")]
    CommandFailed(String),
    #[error("process error: {0}")]
    Process(#[from] crate::runner::CommandError),
}

/// Parse `fastboot devices` output into serials.
///
/// One device per line, whitespace-separated columns, last column the
/// literal `fastboot`. Serials composed solely of `?` are placeholders for
/// devices in a transient unknown state and are discarded. Blank input is
/// an empty list, never an error.
pub fn parse_device_list(output: &str) -> Vec<String> {
    let mut serials = Vec::new();

    for line in output.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 || parts.last() != Some(&"fastboot") {
            continue;
        }
        let serial = parts[0];
        if serial.chars().all(|c| c == '?') {
            debug!("ignoring placeholder fastboot serial {:?}", serial);
            continue;
        }
        serials.push(serial.to_string());
    }

    serials
}

/// Fastboot CLI client
pub struct FastbootClient {
    fastboot_path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    command_timeout: Duration,
}

impl FastbootClient {
    pub fn new(
        fastboot_path: PathBuf,
        runner: Arc<dyn ProcessRunner>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            fastboot_path,
            runner,
            command_timeout,
        }
    }

    /// Run a raw fastboot command against a device, capturing the result
    pub async fn run_for_device(
        &self,
        serial: &str,
        args: &[&str],
    ) -> Result<CommandResult, FastbootError> {
        let mut full_args = vec!["-s", serial];
        full_args.extend(args);
        let result = self
            .runner
            .run_timed(self.command_timeout, &self.fastboot_path, &full_args)
            .await?;
        Ok(result)
    }

    /// List serials currently in fastboot mode
    pub async fn devices(&self) -> Result<Vec<String>, FastbootError> {
        let result = self
            .runner
            .run_timed(self.command_timeout, &self.fastboot_path, &["devices"])
            .await?;

        if !result.success() {
            return Err(FastbootError::CommandFailed(result.stderr.trim().to_string()));
        }

        Ok(parse_device_list(&result.stdout))
    }

    /// Query a bootloader variable.
    ///
    /// fastboot prints getvar responses on stderr.
    pub async fn getvar(&self, serial: &str, variable: &str) -> Result<String, FastbootError> {
        let result = self.run_for_device(serial, &["getvar", variable]).await?;
        if !result.success() {
            return Err(FastbootError::CommandFailed(result.stderr.trim().to_string()));
        }

        let prefix = format!("{}:", variable);
        for line in result.stderr.lines().chain(result.stdout.lines()) {
            if let Some(value) = line.strip_prefix(&prefix) {
                return Ok(value.trim().to_string());
            }
        }
        Err(FastbootError::CommandFailed(format!(
            "no {} in getvar output",
            variable
        )))
    }

    /// Reboot out of the bootloader into the OS
    pub async fn reboot(&self, serial: &str) -> Result<(), FastbootError> {
        let result = self.run_for_device(serial, &["reboot"]).await?;
        if !result.success() {
            return Err(FastbootError::CommandFailed(result.stderr.trim().to_string()));
        }
        Ok(())
    }

    /// Reboot back into the bootloader
    pub async fn reboot_bootloader(&self, serial: &str) -> Result<(), FastbootError> {
        let result = self.run_for_device(serial, &["reboot-bootloader"]).await?;
        if !result.success() {
            return Err(FastbootError::CommandFailed(result.stderr.trim().to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "04035EEB0B01F01C        fastboot\n\
                      HT99PP800024    fastboot\n\
                      ????????????    fastboot";
        let serials = parse_device_list(output);
        assert_eq!(serials, vec!["04035EEB0B01F01C", "HT99PP800024"]);
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_device_list("").is_empty());
        assert!(parse_device_list("\n\n").is_empty());
    }

    #[test]
    fn test_parse_ignores_other_lines() {
        let output = "< waiting for any device >\nABC123 fastboot\n";
        assert_eq!(parse_device_list(output), vec!["ABC123"]);
    }
}
