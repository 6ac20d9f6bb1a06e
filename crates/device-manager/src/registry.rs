//! Device Record & Registry
//!
//! One record per known serial, guarded for concurrent access from the
//! event dispatcher, the fastboot poller, and arbitrary job tasks.

use std::collections::HashMap;
use std::sync::Arc;

use droid_fleet_bridge::{ConnectivityState, DeviceHandle};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

use crate::state_machine::{transition, AllocationState, DeviceEvent, Transition};

/// What flavor of device a record represents; drives allocation and free
/// side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Physical device on USB
    Hardware,
    /// Emulator slot managed by the fleet
    StubEmulator,
    /// Virtual placeholder for jobs that need no hardware
    NullDevice,
    /// Device addressed over TCP (ip:port serial)
    TcpConnected,
}

/// Snapshot broadcast to state-monitor waiters on every observable change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSignal {
    pub connectivity: ConnectivityState,
    pub allocation: AllocationState,
}

struct RecordState {
    allocation: AllocationState,
    connectivity: ConnectivityState,
    /// A fastboot command is in flight; connectivity updates are dropped
    /// until it completes.
    fastboot_busy: bool,
    /// Excluded by the global selection filter; never offered to the pool
    excluded: bool,
    handle: Option<Arc<dyn DeviceHandle>>,
    product: Option<String>,
}

/// One device, keyed by serial.
///
/// The single mutex covers the allocation + connectivity pair so the two
/// axes update atomically; different devices can be mutated concurrently.
pub struct DeviceRecord {
    serial: String,
    kind: DeviceKind,
    state: Mutex<RecordState>,
    signal: watch::Sender<DeviceSignal>,
}

impl DeviceRecord {
    pub fn new(serial: &str, kind: DeviceKind) -> Arc<Self> {
        let (signal, _) = watch::channel(DeviceSignal {
            connectivity: ConnectivityState::NotAvailable,
            allocation: AllocationState::Unknown,
        });
        Arc::new(Self {
            serial: serial.to_string(),
            kind,
            state: Mutex::new(RecordState {
                allocation: AllocationState::Unknown,
                connectivity: ConnectivityState::NotAvailable,
                fastboot_busy: false,
                excluded: false,
                handle: None,
                product: None,
            }),
            signal,
        })
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn allocation_state(&self) -> AllocationState {
        self.state.lock().allocation
    }

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.state.lock().connectivity
    }

    /// Live transport handle, if the device is currently known to adb
    pub fn handle(&self) -> Option<Arc<dyn DeviceHandle>> {
        self.state.lock().handle.clone()
    }

    /// Swap in the transport handle for this serial. Reconnects replace
    /// the handle; they never mutate the old one.
    pub fn set_handle(&self, handle: Arc<dyn DeviceHandle>) {
        self.state.lock().handle = Some(handle);
    }

    pub fn product(&self) -> Option<String> {
        self.state.lock().product.clone()
    }

    pub fn set_product(&self, product: Option<String>) {
        self.state.lock().product = product;
    }

    pub fn is_emulator(&self) -> bool {
        if self.kind == DeviceKind::StubEmulator {
            return true;
        }
        let state = self.state.lock();
        match &state.handle {
            Some(handle) => handle.is_emulator(),
            None => self.serial.starts_with("emulator-"),
        }
    }

    pub fn mark_excluded(&self) {
        self.state.lock().excluded = true;
    }

    pub fn is_excluded(&self) -> bool {
        self.state.lock().excluded
    }

    /// Drive the allocation state machine with one event.
    ///
    /// Returns the applied transition; the caller decides whether to
    /// notify monitors based on `changed`.
    pub fn apply_event(&self, event: DeviceEvent) -> (AllocationState, Transition) {
        let mut state = self.state.lock();
        let old = state.allocation;
        let t = transition(old, event);
        if t.changed {
            state.allocation = t.new_state;
            self.publish(&state);
        }
        (old, t)
    }

    /// Update the transport-observed connectivity state.
    ///
    /// Returns false when the update was dropped because a fastboot
    /// command is in flight for this device.
    pub fn set_connectivity(&self, connectivity: ConnectivityState) -> bool {
        let mut state = self.state.lock();
        if state.fastboot_busy {
            debug!(
                "dropping connectivity update {:?} for {} during fastboot command",
                connectivity, self.serial
            );
            return false;
        }
        if state.connectivity != connectivity {
            state.connectivity = connectivity;
            self.publish(&state);
        }
        true
    }

    /// Mark a fastboot command in flight: state pins to Fastboot and
    /// incoming connectivity updates are dropped until `end_fastboot`.
    pub fn begin_fastboot(&self) {
        let mut state = self.state.lock();
        state.fastboot_busy = true;
        if state.connectivity != ConnectivityState::Fastboot {
            state.connectivity = ConnectivityState::Fastboot;
            self.publish(&state);
        }
    }

    /// Finish a fastboot command, restoring the command's actual outcome
    pub fn end_fastboot(&self, outcome: ConnectivityState) {
        let mut state = self.state.lock();
        state.fastboot_busy = false;
        if state.connectivity != outcome {
            state.connectivity = outcome;
            self.publish(&state);
        }
    }

    pub fn fastboot_busy(&self) -> bool {
        self.state.lock().fastboot_busy
    }

    /// Subscribe to (connectivity, allocation) snapshots
    pub fn subscribe(&self) -> watch::Receiver<DeviceSignal> {
        self.signal.subscribe()
    }

    fn publish(&self, state: &RecordState) {
        let _ = self.signal.send(DeviceSignal {
            connectivity: state.connectivity,
            allocation: state.allocation,
        });
    }
}

impl std::fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DeviceRecord")
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("allocation", &state.allocation)
            .field("connectivity", &state.connectivity)
            .finish()
    }
}

/// True for serials the transport uses as placeholders for devices in a
/// transient unknown state; these never enter the registry.
pub fn is_placeholder_serial(serial: &str) -> bool {
    serial.is_empty() || serial.chars().all(|c| c == '?')
}

struct RegistryInner {
    by_serial: HashMap<String, Arc<DeviceRecord>>,
    /// Serials in first-seen order, for stable listing
    order: Vec<String>,
}

/// Shared mapping serial -> record
pub struct DeviceRegistry {
    inner: RwLock<RegistryInner>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                by_serial: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    pub fn find(&self, serial: &str) -> Option<Arc<DeviceRecord>> {
        self.inner.read().by_serial.get(serial).cloned()
    }

    /// Look up a record, creating it on first sight of a serial.
    ///
    /// Atomic check-then-insert: two callers racing on the same serial get
    /// the same record. Placeholder serials are rejected with None and
    /// nothing is registered.
    pub fn find_or_create(&self, serial: &str, kind: DeviceKind) -> Option<Arc<DeviceRecord>> {
        if is_placeholder_serial(serial) {
            return None;
        }

        let mut inner = self.inner.write();
        if let Some(record) = inner.by_serial.get(serial) {
            return Some(record.clone());
        }
        let record = DeviceRecord::new(serial, kind);
        inner.by_serial.insert(serial.to_string(), record.clone());
        inner.order.push(serial.to_string());
        Some(record)
    }

    pub fn remove(&self, serial: &str) -> Option<Arc<DeviceRecord>> {
        let mut inner = self.inner.write();
        let record = inner.by_serial.remove(serial);
        if record.is_some() {
            inner.order.retain(|s| s != serial);
        }
        record
    }

    /// All records in first-seen order
    pub fn records(&self) -> Vec<Arc<DeviceRecord>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|serial| inner.by_serial.get(serial).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_serial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_or_create_returns_same_record() {
        let registry = DeviceRegistry::new();
        let first = registry.find_or_create("ABC123", DeviceKind::Hardware).unwrap();
        let second = registry.find_or_create("ABC123", DeviceKind::Hardware).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_placeholder_serials_rejected() {
        let registry = DeviceRegistry::new();
        assert!(registry.find_or_create("????????????", DeviceKind::Hardware).is_none());
        assert!(registry.find_or_create("?", DeviceKind::Hardware).is_none());
        assert!(registry.find_or_create("", DeviceKind::Hardware).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_records_keep_first_seen_order() {
        let registry = DeviceRegistry::new();
        registry.find_or_create("ccc", DeviceKind::Hardware);
        registry.find_or_create("aaa", DeviceKind::Hardware);
        registry.find_or_create("bbb", DeviceKind::Hardware);

        let serials: Vec<_> = registry
            .records()
            .iter()
            .map(|r| r.serial().to_string())
            .collect();
        assert_eq!(serials, vec!["ccc", "aaa", "bbb"]);
    }

    #[test]
    fn test_remove() {
        let registry = DeviceRegistry::new();
        registry.find_or_create("ABC123", DeviceKind::Hardware);
        assert!(registry.remove("ABC123").is_some());
        assert!(registry.find("ABC123").is_none());
        assert!(registry.remove("ABC123").is_none());
    }

    #[test]
    fn test_apply_event_updates_allocation() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        let (old, t) = record.apply_event(DeviceEvent::ConnectedOnline);

        assert_eq!(old, AllocationState::Unknown);
        assert!(t.changed);
        assert_eq!(record.allocation_state(), AllocationState::CheckingAvailability);
    }

    #[test]
    fn test_fastboot_suppresses_connectivity_updates() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        record.set_connectivity(ConnectivityState::Online);

        record.begin_fastboot();
        assert_eq!(record.connectivity_state(), ConnectivityState::Fastboot);

        // A racing disconnect notification is dropped, not applied
        assert!(!record.set_connectivity(ConnectivityState::NotAvailable));
        assert_eq!(record.connectivity_state(), ConnectivityState::Fastboot);

        record.end_fastboot(ConnectivityState::Fastboot);
        assert!(record.set_connectivity(ConnectivityState::NotAvailable));
        assert_eq!(record.connectivity_state(), ConnectivityState::NotAvailable);
    }

    #[test]
    fn test_watch_signal_published() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        let rx = record.subscribe();

        record.set_connectivity(ConnectivityState::Online);
        let signal = *rx.borrow();
        assert_eq!(signal.connectivity, ConnectivityState::Online);
        assert_eq!(signal.allocation, AllocationState::Unknown);
    }
}
