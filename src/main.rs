//! droid-fleet - device-fleet manager for Android test harnesses
//!
//! Main entry point: wires the transport layer to the device manager and
//! dispatches CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use droid_fleet::commands::{AllocateCommand, DevicesCommand, RecoverCommand, WatchCommand};
use droid_fleet::core::{EventBus, FleetConfig};
use droid_fleet::bridge::{
    AdbBridge, AdbClient, DeviceBridge, EmulatorLauncher, FastbootClient, TokioProcessRunner,
};
use droid_fleet::manager::DeviceManager;

/// Main entry point
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("{} v{} starting...", droid_fleet::APP_NAME, droid_fleet::VERSION);

    let config = FleetConfig::load().await?;
    let manager = build_manager(config).await?;

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "devices".to_string());

    match command.as_str() {
        "devices" => {
            let json = args.next().as_deref() == Some("--json");
            DevicesCommand { json }.execute(&manager).await?
        }
        "allocate" => {
            AllocateCommand {
                serial: args.next(),
                timeout: Duration::from_secs(30),
            }
            .execute(&manager)
            .await?
        }
        "recover" => {
            let Some(serial) = args.next() else {
                bail!("usage: droid-fleet recover <serial>");
            };
            RecoverCommand { serial }.execute(&manager).await?
        }
        "watch" => WatchCommand.execute(&manager).await?,
        other => {
            bail!(
                "unknown command {:?}; available: devices, allocate, recover, watch",
                other
            );
        }
    }

    manager.shutdown().await;
    Ok(())
}

/// Wire the real transport stack into a device manager
async fn build_manager(config: FleetConfig) -> Result<Arc<DeviceManager>> {
    let runner = Arc::new(TokioProcessRunner);

    let Some(adb_path) = config.tools.resolve_adb() else {
        bail!("adb not found; install platform-tools or set tools.adb_path");
    };
    info!("using adb at {:?}", adb_path);

    let client = Arc::new(AdbClient::new(
        adb_path,
        runner.clone(),
        config.tools.command_timeout(),
    ));
    let bridge = AdbBridge::new(client, config.discovery.bridge_poll_interval());

    let fastboot = config.tools.resolve_fastboot().map(|path| {
        info!("using fastboot at {:?}", path);
        Arc::new(FastbootClient::new(
            path,
            runner.clone(),
            config.tools.command_timeout(),
        ))
    });
    if fastboot.is_none() {
        info!("fastboot not found; bootloader devices will not be tracked");
    }

    let launcher = config.tools.resolve_emulator().map(EmulatorLauncher::new);

    let manager = DeviceManager::new(
        bridge as Arc<dyn DeviceBridge>,
        runner,
        fastboot,
        launcher,
        config,
        Arc::new(EventBus::new()),
    );
    manager.init(None, Vec::new()).await?;
    Ok(manager)
}
