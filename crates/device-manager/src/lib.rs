//! droid-fleet device manager
//!
//! The allocation core: per-device state machine, concurrent registry and
//! pools, selection, blocking state waits, and the recovery escalation
//! that brings stuck devices back.

pub mod descriptor;
pub mod error;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod recovery;
pub mod registry;
pub mod selection;
pub mod state_machine;

pub use descriptor::{sort_device_list, DeviceDescriptor};
pub use error::DeviceError;
pub use manager::{DeviceAllocationMonitor, DeviceManager, FreeDeviceState};
pub use monitor::DeviceStateMonitor;
pub use pool::AvailablePool;
pub use registry::{DeviceKind, DeviceRecord, DeviceRegistry};
pub use selection::SelectionCriteria;
pub use state_machine::{transition, AllocationState, DeviceEvent, Transition};
