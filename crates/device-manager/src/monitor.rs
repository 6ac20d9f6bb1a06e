//! Device State Monitor
//!
//! Per-device blocking waits with explicit timeouts. Every wait returns a
//! sentinel on expiry, never an error, so callers can retry or escalate.
//!
//! Online/offline transitions are push-signaled through the record's watch
//! channel. Bootloader state is only observable through the low-frequency
//! fastboot poll, so bootloader waits resolve with higher latency than
//! online waits; that asymmetry is inherent to the transport.

use std::sync::Arc;
use std::time::Duration;

use droid_fleet_bridge::{ConnectivityState, DeviceHandle};
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::registry::{DeviceRecord, DeviceSignal};

/// Interval between active shell/boot probes
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Blocking waits over one device's observable state
pub struct DeviceStateMonitor {
    record: Arc<DeviceRecord>,
}

impl DeviceStateMonitor {
    pub fn new(record: Arc<DeviceRecord>) -> Self {
        Self { record }
    }

    /// Wait until the signal satisfies `pred` or the timeout elapses
    async fn wait_for_signal<F>(&self, pred: F, limit: Duration) -> bool
    where
        F: Fn(&DeviceSignal) -> bool,
    {
        let mut rx = self.record.subscribe();
        let result = matches!(timeout(limit, rx.wait_for(|s| pred(s))).await, Ok(Ok(_)));
        result
    }

    /// Wait for the device to report Online; returns its transport handle
    pub async fn wait_for_online(&self, limit: Duration) -> Option<Arc<dyn DeviceHandle>> {
        if self
            .wait_for_signal(|s| s.connectivity == ConnectivityState::Online, limit)
            .await
        {
            self.record.handle()
        } else {
            debug!("{}: online wait expired after {:?}", self.record.serial(), limit);
            None
        }
    }

    /// Wait until the device answers shell commands
    pub async fn wait_for_shell_responsive(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(handle) = self.record.handle() {
                if handle.shell("echo ping").await.is_ok() {
                    return true;
                }
            }
            if Instant::now() + PROBE_INTERVAL > deadline {
                debug!("{}: shell wait expired after {:?}", self.record.serial(), limit);
                return false;
            }
            sleep(PROBE_INTERVAL).await;
        }
    }

    /// Wait until the device is fully usable: online, shell answering, and
    /// boot completed. Returns its transport handle.
    pub async fn wait_for_available(&self, limit: Duration) -> Option<Arc<dyn DeviceHandle>> {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            if self
                .wait_for_signal(|s| s.connectivity == ConnectivityState::Online, remaining)
                .await
            {
                if let Some(handle) = self.record.handle() {
                    let booted = handle
                        .get_property("sys.boot_completed")
                        .await
                        .map(|v| v == "1")
                        .unwrap_or(false);
                    if booted && handle.shell("echo ping").await.is_ok() {
                        return Some(handle);
                    }
                }
            }

            if Instant::now() + PROBE_INTERVAL > deadline {
                break;
            }
            sleep(PROBE_INTERVAL).await;
        }
        debug!("{}: available wait expired after {:?}", self.record.serial(), limit);
        None
    }

    /// Wait until the device is no longer reachable as Online
    pub async fn wait_for_not_available(&self, limit: Duration) -> bool {
        self.wait_for_signal(|s| s.connectivity != ConnectivityState::Online, limit)
            .await
    }

    /// Wait until the fastboot poller reports the device in the bootloader
    pub async fn wait_for_bootloader(&self, limit: Duration) -> bool {
        self.wait_for_signal(|s| s.connectivity == ConnectivityState::Fastboot, limit)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceKind;
    use droid_fleet_bridge::testing::FakeDeviceHandle;

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_online_signaled() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        record.set_handle(FakeDeviceHandle::new("ABC123"));

        let monitor = DeviceStateMonitor::new(record.clone());
        let setter = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                record.set_connectivity(ConnectivityState::Online);
            })
        };

        let handle = monitor.wait_for_online(Duration::from_secs(10)).await;
        assert!(handle.is_some());
        setter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_online_times_out() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        let monitor = DeviceStateMonitor::new(record);

        let handle = monitor.wait_for_online(Duration::from_millis(200)).await;
        assert!(handle.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_available() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        record.set_handle(FakeDeviceHandle::booted("ABC123"));
        record.set_connectivity(ConnectivityState::Online);

        let monitor = DeviceStateMonitor::new(record);
        let handle = monitor.wait_for_available(Duration::from_secs(5)).await;
        assert!(handle.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_available_requires_boot_completed() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        // Online but sys.boot_completed never set
        record.set_handle(FakeDeviceHandle::new("ABC123"));
        record.set_connectivity(ConnectivityState::Online);

        let monitor = DeviceStateMonitor::new(record);
        let handle = monitor.wait_for_available(Duration::from_secs(2)).await;
        assert!(handle.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bootloader() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        let monitor = DeviceStateMonitor::new(record.clone());

        let setter = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(2)).await;
                record.set_connectivity(ConnectivityState::Fastboot);
            })
        };

        assert!(monitor.wait_for_bootloader(Duration::from_secs(10)).await);
        setter.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_not_available() {
        let record = DeviceRecord::new("ABC123", DeviceKind::Hardware);
        record.set_connectivity(ConnectivityState::Online);
        let monitor = DeviceStateMonitor::new(record.clone());

        let setter = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(1)).await;
                record.set_connectivity(ConnectivityState::NotAvailable);
            })
        };

        assert!(monitor.wait_for_not_available(Duration::from_secs(10)).await);
        setter.await.unwrap();
    }
}
