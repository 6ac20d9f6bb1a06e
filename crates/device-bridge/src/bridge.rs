//! Bridge Traits and Device State
//!
//! Narrow interfaces over the transport layer, so the manager can be
//! driven by the real adb bridge or by in-memory fakes in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Bridge errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("adb not found")]
    AdbNotFound,
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("process error: {0}")]
    Process(#[from] crate::runner::CommandError),
}

/// Raw device state as reported by adb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeDeviceState {
    /// Device is online and ready
    Online,
    /// Device is offline
    Offline,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    /// Device is in bootloader mode
    Bootloader,
    /// Device is in recovery mode
    Recovery,
    /// Unknown state
    Unknown,
}

impl BridgeDeviceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeDeviceState::Online => "device",
            BridgeDeviceState::Offline => "offline",
            BridgeDeviceState::Unauthorized => "unauthorized",
            BridgeDeviceState::Bootloader => "bootloader",
            BridgeDeviceState::Recovery => "recovery",
            BridgeDeviceState::Unknown => "unknown",
        }
    }

    pub fn from_adb(value: &str) -> Self {
        match value {
            "device" => BridgeDeviceState::Online,
            "offline" => BridgeDeviceState::Offline,
            "unauthorized" => BridgeDeviceState::Unauthorized,
            "bootloader" => BridgeDeviceState::Bootloader,
            "recovery" => BridgeDeviceState::Recovery,
            _ => BridgeDeviceState::Unknown,
        }
    }

    pub fn is_online(&self) -> bool {
        matches!(self, BridgeDeviceState::Online)
    }
}

/// Transport-observed reachability of a device.
///
/// Orthogonal to allocation state: a device can be allocated to a job
/// while mid-reboot and NotAvailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// Not reachable over the transport
    NotAvailable,
    /// Online and reachable
    Online,
    /// In the bootloader; observed only via fastboot polling
    Fastboot,
    /// In recovery mode
    Recovery,
}

impl ConnectivityState {
    /// Map a raw adb state onto the connectivity axis
    pub fn from_bridge(state: BridgeDeviceState) -> Self {
        match state {
            BridgeDeviceState::Online => ConnectivityState::Online,
            BridgeDeviceState::Bootloader => ConnectivityState::Fastboot,
            BridgeDeviceState::Recovery => ConnectivityState::Recovery,
            BridgeDeviceState::Offline
            | BridgeDeviceState::Unauthorized
            | BridgeDeviceState::Unknown => ConnectivityState::NotAvailable,
        }
    }
}

/// Live handle to one transport-layer device
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// Stable identity key for the device
    fn serial(&self) -> &str;

    /// Last observed raw state
    fn state(&self) -> BridgeDeviceState;

    /// Whether the transport reports this as an emulator
    fn is_emulator(&self) -> bool;

    /// Read a system property
    async fn get_property(&self, name: &str) -> Result<String, BridgeError>;

    /// Run a shell command and capture its output
    async fn shell(&self, command: &str) -> Result<String, BridgeError>;

    /// Reboot the device, optionally into a named mode ("bootloader", "recovery")
    async fn reboot(&self, mode: Option<&str>) -> Result<(), BridgeError>;
}

/// Receives connect/disconnect/change notifications from the bridge
pub trait BridgeListener: Send + Sync {
    fn device_connected(&self, handle: Arc<dyn DeviceHandle>);
    fn device_disconnected(&self, handle: Arc<dyn DeviceHandle>);
    fn device_changed(&self, handle: Arc<dyn DeviceHandle>, state: BridgeDeviceState);
}

/// The transport layer as the manager sees it
#[async_trait]
pub trait DeviceBridge: Send + Sync {
    /// Register a listener for device notifications
    fn add_listener(&self, listener: Arc<dyn BridgeListener>);

    /// Unregister a previously added listener
    fn remove_listener(&self, listener: &Arc<dyn BridgeListener>);

    /// Snapshot of currently connected device handles
    async fn devices(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, BridgeError>;

    /// Start delivering notifications
    async fn start(&self) -> Result<(), BridgeError>;

    /// Stop delivering notifications
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_adb() {
        assert_eq!(BridgeDeviceState::from_adb("device"), BridgeDeviceState::Online);
        assert_eq!(BridgeDeviceState::from_adb("offline"), BridgeDeviceState::Offline);
        assert_eq!(
            BridgeDeviceState::from_adb("bootloader"),
            BridgeDeviceState::Bootloader
        );
        assert_eq!(BridgeDeviceState::from_adb("sideload"), BridgeDeviceState::Unknown);
    }

    #[test]
    fn test_connectivity_mapping() {
        assert_eq!(
            ConnectivityState::from_bridge(BridgeDeviceState::Online),
            ConnectivityState::Online
        );
        assert_eq!(
            ConnectivityState::from_bridge(BridgeDeviceState::Bootloader),
            ConnectivityState::Fastboot
        );
        assert_eq!(
            ConnectivityState::from_bridge(BridgeDeviceState::Unauthorized),
            ConnectivityState::NotAvailable
        );
    }
}
