//! CLI commands for droid-fleet
//!
//! Thin command structs over the device manager, for scripting and
//! inspection of a running fleet host.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;

use droid_fleet_manager::{DeviceManager, FreeDeviceState, SelectionCriteria};

/// How long `devices` waits for discovery to settle before listing
const DISCOVERY_SETTLE: Duration = Duration::from_secs(2);

/// List all known devices, allocated first
pub struct DevicesCommand {
    /// Emit machine-readable JSON instead of the table
    pub json: bool,
}

impl DevicesCommand {
    pub async fn execute(&self, manager: &Arc<DeviceManager>) -> Result<()> {
        tokio::time::sleep(DISCOVERY_SETTLE).await;

        let devices = manager.list_all_devices();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
            return Ok(());
        }
        if devices.is_empty() {
            println!("no devices");
            return Ok(());
        }

        println!(
            "{:<24} {:<22} {:<14} {}",
            "SERIAL", "ALLOCATION", "CONNECTIVITY", "PRODUCT"
        );
        for device in devices {
            let connectivity = format!("{:?}", device.connectivity_state);
            println!(
                "{:<24} {:<22} {:<14} {}",
                device.serial,
                device.allocation_state.as_str(),
                connectivity,
                device.product.as_deref().unwrap_or("-")
            );
        }
        Ok(())
    }
}

/// Allocate a device (optionally a specific serial), report it, and free
/// it back to the pool
pub struct AllocateCommand {
    pub serial: Option<String>,
    pub timeout: Duration,
}

impl AllocateCommand {
    pub async fn execute(&self, manager: &Arc<DeviceManager>) -> Result<()> {
        let criteria = match &self.serial {
            Some(serial) => SelectionCriteria::serial(serial),
            None => SelectionCriteria::any(),
        };

        match manager.allocate_device_matching(criteria, self.timeout).await {
            Some(record) => {
                println!("allocated {}", record.serial());
                manager.free_device(&record, FreeDeviceState::Available).await;
                Ok(())
            }
            None => {
                bail!("no matching device became available within {:?}", self.timeout);
            }
        }
    }
}

/// Run the recovery escalation against a stuck device
pub struct RecoverCommand {
    pub serial: String,
}

impl RecoverCommand {
    pub async fn execute(&self, manager: &Arc<DeviceManager>) -> Result<()> {
        tokio::time::sleep(DISCOVERY_SETTLE).await;

        let Some(record) = manager.find_device(&self.serial) else {
            bail!("unknown device {}", self.serial);
        };

        info!("recovering {}...", self.serial);
        manager.recover_device(&record).await?;
        println!("device {} recovered", self.serial);
        Ok(())
    }
}

/// Stream fleet events until interrupted
pub struct WatchCommand;

impl WatchCommand {
    pub async fn execute(&self, manager: &Arc<DeviceManager>) -> Result<()> {
        let subscription = manager.events().subscribe();
        println!("watching fleet events, ctrl-c to stop");

        let printer = tokio::task::spawn_blocking(move || {
            for event in subscription.iter() {
                println!("{:?}", event);
            }
        });

        tokio::signal::ctrl_c().await?;
        printer.abort();
        Ok(())
    }
}
