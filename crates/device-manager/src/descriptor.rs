//! Device Descriptors
//!
//! Read-only snapshots of device records for display and listing.

use droid_fleet_bridge::ConnectivityState;
use serde::{Deserialize, Serialize};

use crate::registry::{DeviceKind, DeviceRecord};
use crate::state_machine::AllocationState;

/// Value-type snapshot of one device; never mutated after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub serial: String,
    pub kind: DeviceKind,
    pub is_emulator: bool,
    pub allocation_state: AllocationState,
    pub connectivity_state: ConnectivityState,
    pub product: Option<String>,
}

impl DeviceDescriptor {
    pub fn snapshot(record: &DeviceRecord) -> Self {
        Self {
            serial: record.serial().to_string(),
            kind: record.kind(),
            is_emulator: record.is_emulator(),
            allocation_state: record.allocation_state(),
            connectivity_state: record.connectivity_state(),
            product: record.product(),
        }
    }
}

/// Sort for listing: Allocated devices first, then Available, then the
/// rest; discovery order preserved within each group.
pub fn sort_device_list(mut descriptors: Vec<DeviceDescriptor>) -> Vec<DeviceDescriptor> {
    descriptors.sort_by_key(|d| match d.allocation_state {
        AllocationState::Allocated => 0u8,
        AllocationState::Available => 1,
        _ => 2,
    });
    descriptors
}
