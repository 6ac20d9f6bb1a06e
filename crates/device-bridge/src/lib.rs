//! droid-fleet transport layer
//!
//! Everything that touches the host's adb, fastboot, and emulator binaries,
//! behind narrow traits the device manager consumes.

pub mod adb;
pub mod bridge;
pub mod emulator;
pub mod fastboot;
pub mod runner;
pub mod testing;

pub use adb::{AdbBridge, AdbClient, AdbDeviceHandle};
pub use bridge::{
    BridgeDeviceState, BridgeError, BridgeListener, ConnectivityState, DeviceBridge, DeviceHandle,
};
pub use emulator::{EmulatorError, EmulatorInstance, EmulatorLauncher, EmulatorOptions};
pub use fastboot::{FastbootClient, FastbootError};
pub use runner::{CommandError, CommandResult, ProcessRunner, TokioProcessRunner};
