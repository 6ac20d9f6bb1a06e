//! Device Selection
//!
//! Immutable predicate over a device record, used per allocation call and
//! optionally installed globally at init to fence off out-of-policy
//! devices.

use serde::{Deserialize, Serialize};

use crate::registry::{DeviceKind, DeviceRecord};

/// Selection criteria for allocating a device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Only these serials match, when non-empty
    pub serials: Vec<String>,
    /// These serials never match
    pub exclude_serials: Vec<String>,
    /// Required product type (e.g. "sailfish")
    pub product: Option<String>,
    /// Match emulators; without this, emulators are skipped
    pub emulator_requested: bool,
    /// Match a fleet-managed emulator slot
    pub stub_emulator_requested: bool,
    /// Match a virtual no-hardware placeholder
    pub null_device_requested: bool,
    /// Match TCP-addressed devices
    pub tcp_device_requested: bool,
}

impl SelectionCriteria {
    /// Match any physical device
    pub fn any() -> Self {
        Self::default()
    }

    /// Match one specific serial
    pub fn serial(serial: &str) -> Self {
        Self {
            serials: vec![serial.to_string()],
            ..Default::default()
        }
    }

    /// Match any emulator
    pub fn emulator() -> Self {
        Self {
            emulator_requested: true,
            ..Default::default()
        }
    }

    /// Request a virtual placeholder device
    pub fn null_device() -> Self {
        Self {
            null_device_requested: true,
            ..Default::default()
        }
    }

    /// Request a fleet-managed emulator slot
    pub fn stub_emulator() -> Self {
        Self {
            stub_emulator_requested: true,
            ..Default::default()
        }
    }

    /// Match TCP-addressed devices
    pub fn tcp_device() -> Self {
        Self {
            tcp_device_requested: true,
            ..Default::default()
        }
    }

    /// Exclude a serial, builder-style
    pub fn excluding(mut self, serial: &str) -> Self {
        self.exclude_serials.push(serial.to_string());
        self
    }

    /// Require a product type, builder-style
    pub fn with_product(mut self, product: &str) -> Self {
        self.product = Some(product.to_string());
        self
    }

    /// Check whether a device record satisfies these criteria
    pub fn matches(&self, record: &DeviceRecord) -> bool {
        let serial = record.serial();

        if !self.serials.is_empty() && !self.serials.iter().any(|s| s == serial) {
            return false;
        }
        if self.exclude_serials.iter().any(|s| s == serial) {
            return false;
        }

        // Virtual kinds only match when specifically requested
        match record.kind() {
            DeviceKind::NullDevice => return self.null_device_requested,
            DeviceKind::StubEmulator => return self.stub_emulator_requested,
            DeviceKind::TcpConnected => {
                if !self.tcp_device_requested && !self.serials.iter().any(|s| s == serial) {
                    return false;
                }
            }
            DeviceKind::Hardware => {}
        }

        if record.is_emulator() != self.emulator_requested {
            return false;
        }

        if let Some(ref product) = self.product {
            match record.product() {
                Some(ref actual) if actual == product => {}
                _ => return false,
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceRecord;

    #[test]
    fn test_any_matches_hardware() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        assert!(SelectionCriteria::any().matches(&record));
    }

    #[test]
    fn test_serial_allow_list() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        assert!(SelectionCriteria::serial("ABC123").matches(&record));
        assert!(!SelectionCriteria::serial("XYZ789").matches(&record));
    }

    #[test]
    fn test_serial_deny_list() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        assert!(!SelectionCriteria::any().excluding("ABC123").matches(&record));
        assert!(SelectionCriteria::any().excluding("XYZ789").matches(&record));
    }

    #[test]
    fn test_emulator_matching() {
        let emulator = DeviceRecord::new("emulator-5554", DeviceKind::Hardware);
        let hardware = DeviceRecord::new("ABC123", DeviceKind::Hardware);

        assert!(!SelectionCriteria::any().matches(&emulator));
        assert!(SelectionCriteria::emulator().matches(&emulator));
        assert!(!SelectionCriteria::emulator().matches(&hardware));
    }

    #[test]
    fn test_virtual_kinds_need_explicit_request() {
        let null = DeviceRecord::new("null-device-0", DeviceKind::NullDevice);
        assert!(!SelectionCriteria::any().matches(&null));
        assert!(SelectionCriteria::null_device().matches(&null));
    }

    #[test]
    fn test_product_requirement() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        assert!(!SelectionCriteria::any().with_product("sailfish").matches(&record));

        record.set_product(Some("sailfish".to_string()));
        assert!(SelectionCriteria::any().with_product("sailfish").matches(&record));
        assert!(!SelectionCriteria::any().with_product("walleye").matches(&record));
    }
}
