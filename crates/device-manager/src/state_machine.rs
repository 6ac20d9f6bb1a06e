//! Allocation State Machine
//!
//! Pure transition function for a device's allocation lifecycle. No I/O,
//! no locking; every device record drives its transitions through here.

use serde::{Deserialize, Serialize};

/// Whether and how a device is claimed by a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    /// Freshly seen or reset; not yet checked
    Unknown,
    /// Availability check in flight
    CheckingAvailability,
    /// Passed checks, waiting in the pool
    Available,
    /// Claimed by a job
    Allocated,
}

impl AllocationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationState::Unknown => "Unknown",
            AllocationState::CheckingAvailability => "CheckingAvailability",
            AllocationState::Available => "Available",
            AllocationState::Allocated => "Allocated",
        }
    }
}

/// Triggers for allocation transitions.
///
/// Generated by the manager from transport notifications or API calls,
/// never by the state machine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    ConnectedOnline,
    Disconnected,
    AvailableCheckPassed,
    AvailableCheckFailed,
    ForceAvailable,
    AllocateRequest,
    ForceAllocateRequest,
    FreeAvailable,
    FreeUnknown,
}

/// Outcome of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub new_state: AllocationState,
    /// False means no observable transition happened; callers use this to
    /// decide whether to notify monitors, and a duplicate allocate request
    /// reads it to learn the device was not newly allocated.
    pub changed: bool,
}

impl Transition {
    fn to(new_state: AllocationState) -> Self {
        Self {
            new_state,
            changed: true,
        }
    }

    fn unchanged(state: AllocationState) -> Self {
        Self {
            new_state: state,
            changed: false,
        }
    }
}

/// Map (state, event) to the next state.
///
/// Total: unmapped pairs keep the current state with `changed=false`.
/// Availability events only move forward Unknown -> Checking -> Available;
/// allocate events always win; a disconnect resets everything except an
/// Allocated device, which is preserved so a test in progress is not
/// silently freed.
pub fn transition(state: AllocationState, event: DeviceEvent) -> Transition {
    use AllocationState::*;
    use DeviceEvent::*;

    match (state, event) {
        (Unknown, ConnectedOnline) => Transition::to(CheckingAvailability),
        (Unknown, ForceAvailable) => Transition::to(Available),

        (CheckingAvailability, AvailableCheckPassed) => Transition::to(Available),
        (CheckingAvailability, AvailableCheckFailed) => Transition::to(Unknown),
        (CheckingAvailability, ForceAvailable) => Transition::to(Available),
        (CheckingAvailability, Disconnected) => Transition::to(Unknown),

        (Available, AllocateRequest) => Transition::to(Allocated),
        (Available, Disconnected) => Transition::to(Unknown),

        (Allocated, FreeAvailable) => Transition::to(Available),
        (Allocated, FreeUnknown) => Transition::to(Unknown),

        // Force-allocation wins from any state, but is a visible no-op on
        // an already-allocated device.
        (Allocated, ForceAllocateRequest) => Transition::unchanged(Allocated),
        (_, ForceAllocateRequest) => Transition::to(Allocated),

        (current, _) => Transition::unchanged(current),
    }
}
