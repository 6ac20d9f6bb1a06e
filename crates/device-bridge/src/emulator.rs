//! Emulator Launcher
//!
//! Launches and tears down Android emulator instances for the fleet.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Emulator errors
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("emulator binary not found")]
    NotFound,
    #[error("no free emulator port")]
    NoFreePort,
    #[error("failed to start emulator: {0}")]
    StartFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Emulator console port range; adb ports are console+1
pub const EMULATOR_PORT_RANGE: std::ops::Range<u16> = 5554..5584;

/// Get the next available emulator console port
pub fn next_emulator_port(used_ports: &[u16]) -> Option<u16> {
    EMULATOR_PORT_RANGE
        .step_by(2)
        .find(|port| !used_ports.contains(port))
}

/// Emulator launch options
#[derive(Debug, Clone, Default)]
pub struct EmulatorOptions {
    /// GPU mode (auto, host, swiftshader_indirect, etc.)
    pub gpu: Option<String>,
    /// Disable audio
    pub no_audio: bool,
    /// Disable window
    pub no_window: bool,
    /// Disable boot animation
    pub no_boot_anim: bool,
    /// Wipe data on launch
    pub wipe_data: bool,
    /// Console port; picked automatically when unset
    pub port: Option<u16>,
    /// Additional arguments
    pub extra_args: Vec<String>,
}

impl EmulatorOptions {
    /// Options for headless test-harness use
    pub fn headless() -> Self {
        Self {
            gpu: Some("swiftshader_indirect".to_string()),
            no_audio: true,
            no_window: true,
            no_boot_anim: true,
            ..Default::default()
        }
    }

    /// Convert to command line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(ref gpu) = self.gpu {
            args.push("-gpu".to_string());
            args.push(gpu.clone());
        }
        if self.no_audio {
            args.push("-no-audio".to_string());
        }
        if self.no_window {
            args.push("-no-window".to_string());
        }
        if self.no_boot_anim {
            args.push("-no-boot-anim".to_string());
        }
        if self.wipe_data {
            args.push("-wipe-data".to_string());
        }

        args.extend(self.extra_args.clone());
        args
    }
}

/// Running emulator instance
pub struct EmulatorInstance {
    pub avd_name: String,
    pub port: u16,
    process: Option<Child>,
}

impl EmulatorInstance {
    /// The adb serial this instance answers to
    pub fn serial(&self) -> String {
        format!("emulator-{}", self.port)
    }

    /// Check if the emulator process is still running
    pub fn is_running(&mut self) -> bool {
        match self.process.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Kill the emulator process
    pub async fn kill(&mut self) -> Result<(), EmulatorError> {
        if let Some(ref mut child) = self.process {
            child.kill().await?;
            info!("Killed emulator: {}", self.avd_name);
        }
        self.process = None;
        Ok(())
    }

    /// Wait for the emulator process to exit
    pub async fn wait(&mut self) -> Result<i32, EmulatorError> {
        if let Some(ref mut child) = self.process {
            let status = child.wait().await?;
            self.process = None;
            Ok(status.code().unwrap_or(-1))
        } else {
            Ok(0)
        }
    }
}

/// Emulator launcher
pub struct EmulatorLauncher {
    emulator_path: PathBuf,
    running_instances: Vec<EmulatorInstance>,
}

impl EmulatorLauncher {
    pub fn new(emulator_path: PathBuf) -> Self {
        Self {
            emulator_path,
            running_instances: Vec::new(),
        }
    }

    /// Launch an emulator, returning its adb serial
    pub fn launch(&mut self, avd_name: &str, options: EmulatorOptions) -> Result<String, EmulatorError> {
        if !self.emulator_path.exists() {
            return Err(EmulatorError::NotFound);
        }

        let port = match options.port {
            Some(port) => port,
            None => {
                let used: Vec<u16> = self.running_instances.iter().map(|i| i.port).collect();
                next_emulator_port(&used).ok_or(EmulatorError::NoFreePort)?
            }
        };

        info!("Launching emulator {} on port {}", avd_name, port);

        let mut args = vec![
            "-avd".to_string(),
            avd_name.to_string(),
            "-port".to_string(),
            port.to_string(),
        ];
        args.extend(options.to_args());

        debug!("Emulator args: {:?}", args);

        let child = Command::new(&self.emulator_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EmulatorError::StartFailed(e.to_string()))?;

        let instance = EmulatorInstance {
            avd_name: avd_name.to_string(),
            port,
            process: Some(child),
        };
        let serial = instance.serial();
        self.running_instances.push(instance);

        Ok(serial)
    }

    /// Find a running instance by adb serial
    pub fn find_by_serial(&mut self, serial: &str) -> Option<&mut EmulatorInstance> {
        self.running_instances
            .iter_mut()
            .find(|i| i.serial() == serial)
    }

    /// Kill the instance behind a serial, if any
    pub async fn kill_by_serial(&mut self, serial: &str) -> Result<bool, EmulatorError> {
        let Some(pos) = self
            .running_instances
            .iter()
            .position(|i| i.serial() == serial)
        else {
            return Ok(false);
        };
        let mut instance = self.running_instances.remove(pos);
        instance.kill().await?;
        Ok(true)
    }

    /// Stop all running emulators
    pub async fn stop_all(&mut self) {
        for instance in &mut self.running_instances {
            let _ = instance.kill().await;
        }
        self.running_instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_emulator_port() {
        assert_eq!(next_emulator_port(&[]), Some(5554));
        assert_eq!(next_emulator_port(&[5554]), Some(5556));
        assert_eq!(next_emulator_port(&[5554, 5556]), Some(5558));

        let all: Vec<u16> = EMULATOR_PORT_RANGE.step_by(2).collect();
        assert_eq!(next_emulator_port(&all), None);
    }

    #[test]
    fn test_headless_options() {
        let args = EmulatorOptions::headless().to_args();
        assert!(args.contains(&"-no-window".to_string()));
        assert!(args.contains(&"-no-audio".to_string()));
        assert!(args.iter().any(|a| a == "swiftshader_indirect"));
    }
}
