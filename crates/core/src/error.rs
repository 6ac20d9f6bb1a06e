//! Error types for droid-fleet
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// Main error type for droid-fleet
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Bridge error: {0}")]
    Bridge(String),

    #[error("Fastboot error: {0}")]
    Fastboot(String),

    #[error("Emulator error: {0}")]
    Emulator(String),

    #[error("Device not available: {0}")]
    DeviceNotAvailable(String),

    #[error("Device unresponsive: {0}")]
    DeviceUnresponsive(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for droid-fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// Check if this error is recoverable
    ///
    /// Transient transport and CLI failures are worth retrying; exhausted
    /// recovery and misuse errors are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FleetError::Process(_)
                | FleetError::Bridge(_)
                | FleetError::Fastboot(_)
                | FleetError::Timeout(_)
                | FleetError::Cancelled
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            FleetError::Io(e) => format!("File operation failed: {}", e),
            FleetError::Config(msg) => format!("Configuration error: {}", msg),
            FleetError::DeviceNotAvailable(serial) => {
                format!("Device {} never came back online", serial)
            }
            FleetError::DeviceUnresponsive(serial) => {
                format!("Device {} answered partially but never became usable", serial)
            }
            FleetError::NotFound(msg) => format!("Not found: {}", msg),
            FleetError::Cancelled => "Operation was cancelled".to_string(),
            _ => self.to_string(),
        }
    }
}
