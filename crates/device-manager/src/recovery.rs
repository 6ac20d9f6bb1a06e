//! Recovery Procedure
//!
//! Escalating algorithm for a device that stopped responding: backoff,
//! probe, wait the device back through online/shell/available, and reboot
//! it when the waits run dry. Either returns silently or raises
//! NotAvailable (never came back) / Unresponsive (answered partially but
//! never became usable).

use std::sync::Arc;

use droid_fleet_bridge::ConnectivityState;
use droid_fleet_core::FleetEvent;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::DeviceError;
use crate::manager::DeviceManager;
use crate::monitor::DeviceStateMonitor;
use crate::registry::DeviceRecord;

impl DeviceManager {
    /// Bring an unresponsive device back to a usable state.
    ///
    /// Escalation: backoff sleep, then wait online/shell/available; if the
    /// terminal available-wait fails, hard-reboot directly through the
    /// transport handle and wait once more. A device found in fastboot is
    /// first rebooted out of the bootloader.
    pub async fn recover_device(&self, record: &Arc<DeviceRecord>) -> Result<(), DeviceError> {
        let serial = record.serial().to_string();
        let cfg = self.recovery_config().clone();

        info!("recovering device {}", serial);
        self.events().emit(FleetEvent::RecoveryStarted {
            serial: serial.clone(),
        });

        // Transient USB/adb glitches often self-heal within moments
        sleep(cfg.backoff()).await;

        let monitor = DeviceStateMonitor::new(record.clone());
        let was_fastboot = record.connectivity_state() == ConnectivityState::Fastboot;
        if was_fastboot {
            debug!("{} is in fastboot, rebooting out of the bootloader", serial);
            if let Some(fastboot) = self.fastboot_client() {
                if let Err(e) = fastboot.reboot(&serial).await {
                    warn!("fastboot reboot of {} failed: {}", serial, e);
                }
            }
        }

        let Some(handle) = monitor.wait_for_online(cfg.online_timeout()).await else {
            return self.recovery_failed(&serial, DeviceError::NotAvailable(serial.clone()));
        };

        let shell_ok = monitor.wait_for_shell_responsive(cfg.shell_timeout()).await;
        let mut available =
            shell_ok && monitor.wait_for_available(cfg.available_timeout()).await.is_some();

        if available && was_fastboot {
            // Confirm the device round-tripped cleanly out of the bootloader
            available = monitor.wait_for_online(cfg.online_timeout()).await.is_some();
        }

        if available {
            info!("device {} recovered", serial);
            self.events().emit(FleetEvent::RecoverySucceeded {
                serial: serial.clone(),
            });
            return Ok(());
        }

        // Unresponsive, as opposed to gone: the transport still sees it
        // but it never reached a usable state. Reboot through the handle
        // directly, bypassing the state-monitor path that just failed.
        warn!("device {} unresponsive, issuing hard reboot", serial);
        if let Err(e) = handle.reboot(None).await {
            warn!("hard reboot of {} failed: {}", serial, e);
        }

        if monitor.wait_for_available(cfg.available_timeout()).await.is_some() {
            info!("device {} recovered after hard reboot", serial);
            self.events().emit(FleetEvent::RecoverySucceeded {
                serial: serial.clone(),
            });
            return Ok(());
        }

        self.recovery_failed(&serial, DeviceError::Unresponsive(serial.clone()))
    }

    /// Bring a device into (or confirm it in) the bootloader.
    ///
    /// Already in fastboot: confirm with a benign getvar, retried. Not
    /// yet: reboot to bootloader and wait for not-available then
    /// bootloader; if it comes back Online instead, issue a targeted
    /// "reboot bootloader" through the handle and wait again.
    pub async fn recover_device_bootloader(
        &self,
        record: &Arc<DeviceRecord>,
    ) -> Result<(), DeviceError> {
        let serial = record.serial().to_string();
        let cfg = self.recovery_config().clone();

        let Some(fastboot) = self.fastboot_client().cloned() else {
            return Err(DeviceError::Unsupported {
                serial,
                reason: "fastboot not configured".to_string(),
            });
        };

        info!("recovering device {} into the bootloader", serial);
        self.events().emit(FleetEvent::RecoveryStarted {
            serial: serial.clone(),
        });
        sleep(cfg.backoff()).await;

        let monitor = DeviceStateMonitor::new(record.clone());

        if record.connectivity_state() == ConnectivityState::Fastboot {
            for attempt in 1..=cfg.getvar_attempts {
                match fastboot.getvar(&serial, "product").await {
                    Ok(product) => {
                        debug!("{} confirmed in bootloader (product={})", serial, product);
                        self.events().emit(FleetEvent::RecoverySucceeded {
                            serial: serial.clone(),
                        });
                        return Ok(());
                    }
                    Err(e) => {
                        debug!(
                            "getvar on {} failed (attempt {}/{}): {}",
                            serial, attempt, cfg.getvar_attempts, e
                        );
                        sleep(cfg.backoff()).await;
                    }
                }
            }
            return self.recovery_failed(&serial, DeviceError::Unresponsive(serial.clone()));
        }

        // Not in the bootloader yet; ask the OS to reboot into it
        if let Some(handle) = record.handle() {
            if let Err(e) = handle.reboot(Some("bootloader")).await {
                warn!("reboot-to-bootloader of {} failed: {}", serial, e);
            }
        }

        monitor.wait_for_not_available(cfg.online_timeout()).await;
        if monitor.wait_for_bootloader(cfg.bootloader_timeout()).await {
            self.events().emit(FleetEvent::RecoverySucceeded {
                serial: serial.clone(),
            });
            return Ok(());
        }

        // The device came back Online instead of stopping in the
        // bootloader; target it directly.
        if let Some(handle) = monitor.wait_for_online(cfg.online_timeout()).await {
            if let Err(e) = handle.reboot(Some("bootloader")).await {
                warn!("targeted reboot-to-bootloader of {} failed: {}", serial, e);
            }
            if monitor.wait_for_bootloader(cfg.bootloader_timeout()).await {
                self.events().emit(FleetEvent::RecoverySucceeded {
                    serial: serial.clone(),
                });
                return Ok(());
            }
        }

        self.recovery_failed(&serial, DeviceError::NotAvailable(serial.clone()))
    }

    fn recovery_failed(&self, serial: &str, error: DeviceError) -> Result<(), DeviceError> {
        warn!("recovery of {} failed: {}", serial, error);
        self.events().emit(FleetEvent::RecoveryFailed {
            serial: serial.to_string(),
            reason: error.to_string(),
        });
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use droid_fleet_bridge::testing::{FakeBridge, FakeDeviceHandle, FakeProcessRunner};
    use droid_fleet_bridge::{CommandResult, FastbootClient};
    use droid_fleet_core::{EventBus, FleetConfig};
    use tokio::time::sleep;

    use crate::registry::DeviceKind;

    fn make_manager(runner: Arc<FakeProcessRunner>) -> Arc<DeviceManager> {
        let fastboot = Arc::new(FastbootClient::new(
            PathBuf::from("fastboot"),
            runner.clone(),
            Duration::from_secs(5),
        ));
        DeviceManager::new(
            FakeBridge::new(),
            runner,
            Some(fastboot),
            None,
            FleetConfig::default(),
            Arc::new(EventBus::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_device_when_it_returns() {
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        record.set_handle(FakeDeviceHandle::booted("aaa"));

        // NotAvailable now; comes back online after the backoff
        let returner = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(10)).await;
                record.set_connectivity(ConnectivityState::Online);
            })
        };

        manager.recover_device(&record).await.unwrap();
        returner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_device_never_returns() {
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);

        let result = manager.recover_device(&record).await;
        assert!(matches!(result, Err(DeviceError::NotAvailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_device_from_fastboot() {
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner.clone());

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        record.set_handle(FakeDeviceHandle::booted("aaa"));
        record.set_connectivity(ConnectivityState::Fastboot);

        let returner = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(10)).await;
                record.set_connectivity(ConnectivityState::Online);
            })
        };

        manager.recover_device(&record).await.unwrap();
        returner.await.unwrap();

        // The bootloader exit went through the fastboot CLI
        assert!(runner.calls().iter().any(|c| c.contains("reboot")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_device_unresponsive_after_hard_reboot() {
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        // Online and shell-responsive, but boot never completes
        let handle = FakeDeviceHandle::new("aaa");
        record.set_handle(handle.clone());
        record.set_connectivity(ConnectivityState::Online);

        let result = manager.recover_device(&record).await;
        assert!(matches!(result, Err(DeviceError::Unresponsive(_))));

        // The escalation issued a hard reboot through the handle itself
        assert_eq!(handle.reboots(), vec![None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootloader_recovery_confirms_with_getvar() {
        let runner = Arc::new(FakeProcessRunner::new());
        runner.push_response(
            "getvar product",
            CommandResult {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: "product: sailfish\nFinished. Total time: 0.002s".to_string(),
                timed_out: false,
            },
        );
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        record.set_connectivity(ConnectivityState::Fastboot);

        manager.recover_device_bootloader(&record).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootloader_recovery_getvar_exhausted() {
        // Unscripted getvar returns empty output, which never parses
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        record.set_connectivity(ConnectivityState::Fastboot);

        let result = manager.recover_device_bootloader(&record).await;
        assert!(matches!(result, Err(DeviceError::Unresponsive(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootloader_recovery_reboots_into_bootloader() {
        let runner = Arc::new(FakeProcessRunner::new());
        let manager = make_manager(runner);

        let record = DeviceRecord::new("aaa", DeviceKind::Hardware);
        let handle = FakeDeviceHandle::booted("aaa");
        record.set_handle(handle.clone());
        record.set_connectivity(ConnectivityState::Online);

        // Device drops off adb, then the fastboot poller would see it
        let driver = {
            let record = record.clone();
            tokio::spawn(async move {
                sleep(Duration::from_secs(10)).await;
                record.set_connectivity(ConnectivityState::NotAvailable);
                sleep(Duration::from_secs(5)).await;
                record.set_connectivity(ConnectivityState::Fastboot);
            })
        };

        manager.recover_device_bootloader(&record).await.unwrap();
        driver.await.unwrap();

        assert_eq!(handle.reboots(), vec![Some("bootloader".to_string())]);
    }
}
