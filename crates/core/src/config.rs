//! Fleet Configuration
//!
//! Manages all fleet-manager settings including:
//! - adb/fastboot/emulator binary locations
//! - discovery and polling intervals
//! - allocation and recovery timeouts
//! - emulator launch defaults

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FleetError, Result};

/// Host tool locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the adb binary; resolved from PATH when unset
    pub adb_path: Option<PathBuf>,
    /// Path to the fastboot binary; resolved from PATH when unset
    pub fastboot_path: Option<PathBuf>,
    /// Path to the emulator binary; resolved from PATH when unset
    pub emulator_path: Option<PathBuf>,
    /// Timeout for a single CLI invocation in milliseconds
    pub command_timeout_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            adb_path: None,
            fastboot_path: None,
            emulator_path: None,
            command_timeout_ms: 30_000,
        }
    }
}

impl ToolsConfig {
    /// Resolve the adb binary, falling back to a PATH lookup
    pub fn resolve_adb(&self) -> Option<PathBuf> {
        self.adb_path
            .clone()
            .or_else(|| which::which("adb").ok())
    }

    /// Resolve the fastboot binary, falling back to a PATH lookup
    pub fn resolve_fastboot(&self) -> Option<PathBuf> {
        self.fastboot_path
            .clone()
            .or_else(|| which::which("fastboot").ok())
    }

    /// Resolve the emulator binary, falling back to a PATH lookup
    pub fn resolve_emulator(&self) -> Option<PathBuf> {
        self.emulator_path
            .clone()
            .or_else(|| which::which("emulator").ok())
    }

    /// Per-invocation CLI timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Device discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Interval between adb device-list polls in milliseconds
    pub bridge_poll_interval_ms: u64,
    /// Enable the background fastboot poller
    pub fastboot_poll_enabled: bool,
    /// Interval between fastboot device-list polls in seconds
    pub fastboot_poll_interval_secs: u64,
    /// Timeout for the post-connect availability check in milliseconds
    pub availability_check_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bridge_poll_interval_ms: 1_000,
            fastboot_poll_enabled: true,
            fastboot_poll_interval_secs: 5,
            availability_check_timeout_ms: 10_000,
        }
    }
}

impl DiscoveryConfig {
    pub fn bridge_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bridge_poll_interval_ms)
    }

    pub fn fastboot_poll_interval(&self) -> Duration {
        Duration::from_secs(self.fastboot_poll_interval_secs)
    }

    pub fn availability_check_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_check_timeout_ms)
    }
}

/// Allocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Default wait for a matching device in milliseconds
    pub default_timeout_ms: u64,
    /// Return immediately instead of blocking when the pool is empty.
    /// Primarily for tests, where deterministic behavior beats patience.
    pub synchronous: bool,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 120_000,
            synchronous: false,
        }
    }
}

impl AllocationConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Recovery escalation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Initial backoff before probing, gives transient USB glitches a
    /// chance to self-heal, in milliseconds
    pub backoff_ms: u64,
    /// Wait for the device to report online, in milliseconds
    pub online_timeout_ms: u64,
    /// Wait for the shell to answer, in milliseconds
    pub shell_timeout_ms: u64,
    /// Wait for the device to become fully usable, in milliseconds
    pub available_timeout_ms: u64,
    /// Wait for the device to enter the bootloader, in milliseconds
    pub bootloader_timeout_ms: u64,
    /// Attempts for the benign fastboot getvar confirmation
    pub getvar_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 5_000,
            online_timeout_ms: 60_000,
            shell_timeout_ms: 30_000,
            available_timeout_ms: 60_000,
            bootloader_timeout_ms: 30_000,
            getvar_attempts: 3,
        }
    }
}

impl RecoveryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn online_timeout(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_timeout_ms)
    }

    pub fn available_timeout(&self) -> Duration {
        Duration::from_millis(self.available_timeout_ms)
    }

    pub fn bootloader_timeout(&self) -> Duration {
        Duration::from_millis(self.bootloader_timeout_ms)
    }
}

/// TCP device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Attempts for the underlying `adb connect`
    pub connect_attempts: u32,
    /// Delay between connect attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Wait for a freshly connected TCP device to come online, in milliseconds
    pub online_timeout_ms: u64,
    /// Port used when switching a USB device to TCP addressing
    pub default_port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay_ms: 5_000,
            online_timeout_ms: 30_000,
            default_port: 5555,
        }
    }
}

impl TcpConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn online_timeout(&self) -> Duration {
        Duration::from_millis(self.online_timeout_ms)
    }
}

/// Emulator launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Wait for a launched emulator to finish booting, in seconds
    pub launch_timeout_secs: u64,
    /// Launch emulators without a window or audio
    pub headless: bool,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            launch_timeout_secs: 180,
            headless: true,
        }
    }
}

impl EmulatorConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }
}

/// Main fleet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Host tool locations
    pub tools: ToolsConfig,
    /// Discovery settings
    pub discovery: DiscoveryConfig,
    /// Allocation settings
    pub allocation: AllocationConfig,
    /// Recovery settings
    pub recovery: RecoveryConfig,
    /// TCP device settings
    pub tcp: TcpConfig,
    /// Emulator settings
    pub emulator: EmulatorConfig,
}

impl FleetConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("com", "droidfleet", "droid-fleet")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from file
    pub async fn load() -> Result<Self> {
        let config_file = Self::config_file()
            .ok_or_else(|| FleetError::Config("Cannot determine config path".into()))?;

        if config_file.exists() {
            debug!("Loading config from {:?}", config_file);
            let contents = tokio::fs::read_to_string(&config_file).await?;
            let config: FleetConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            info!("Config file not found, using defaults");
            let config = FleetConfig::default();
            config.save().await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self) -> Result<()> {
        let config_file = Self::config_file()
            .ok_or_else(|| FleetError::Config("Cannot determine config path".into()))?;

        // Ensure directory exists
        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_file, contents).await?;

        debug!("Config saved to {:?}", config_file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.discovery.fastboot_poll_interval_secs, 5);
        assert!(config.discovery.fastboot_poll_enabled);
        assert!(!config.allocation.synchronous);
        assert_eq!(config.tcp.default_port, 5555);
    }

    #[test]
    fn test_config_round_trip() {
        let mut config = FleetConfig::default();
        config.tools.adb_path = Some(PathBuf::from("/opt/sdk/platform-tools/adb"));
        config.allocation.synchronous = true;

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: FleetConfig = toml::from_str(&text).unwrap();

        assert_eq!(
            parsed.tools.adb_path,
            Some(PathBuf::from("/opt/sdk/platform-tools/adb"))
        );
        assert!(parsed.allocation.synchronous);
        assert_eq!(parsed.recovery.backoff_ms, config.recovery.backoff_ms);
    }

    #[test]
    fn test_durations() {
        let config = FleetConfig::default();
        assert_eq!(config.tools.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.recovery.backoff(), Duration::from_secs(5));
        assert_eq!(config.discovery.fastboot_poll_interval(), Duration::from_secs(5));
    }
}
