//! Manager error types

use droid_fleet_bridge::{BridgeError, CommandError, EmulatorError, FastbootError};
use thiserror::Error;

/// Errors surfaced by device-manager operations.
///
/// "No device matched in time" is not an error; allocation returns None
/// for that. These are the genuine failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Recovery exhausted all escalation steps without the device ever
    /// coming back
    #[error("device {0} not available")]
    NotAvailable(String),

    /// The device answered partially but never became fully usable;
    /// distinct from NotAvailable so callers can decide whether to retry
    #[error("device {0} unresponsive")]
    Unresponsive(String),

    /// Operation not supported for this device kind or configuration
    #[error("unsupported operation on {serial}: {reason}")]
    Unsupported { serial: String, reason: String },

    #[error("tcp connect to {0} failed")]
    TcpConnect(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error(transparent)]
    Fastboot(#[from] FastbootError),

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error(transparent)]
    Process(#[from] CommandError),
}

impl From<DeviceError> for droid_fleet_core::FleetError {
    fn from(err: DeviceError) -> Self {
        use droid_fleet_core::FleetError;
        match err {
            DeviceError::NotAvailable(serial) => FleetError::DeviceNotAvailable(serial),
            DeviceError::Unresponsive(serial) => FleetError::DeviceUnresponsive(serial),
            DeviceError::Unsupported { serial, reason } => {
                FleetError::Unsupported(format!("{}: {}", serial, reason))
            }
            DeviceError::TcpConnect(addr) => FleetError::Bridge(format!("tcp connect to {} failed", addr)),
            DeviceError::Bridge(e) => FleetError::Bridge(e.to_string()),
            DeviceError::Fastboot(e) => FleetError::Fastboot(e.to_string()),
            DeviceError::Emulator(e) => FleetError::Emulator(e.to_string()),
            DeviceError::Process(e) => FleetError::Process(e.to_string()),
        }
    }
}
