//! ADB (Android Debug Bridge) Client
//!
//! Talks to devices through the adb CLI and turns the host's device list
//! into connect/disconnect/change notifications for bridge listeners.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeDeviceState, BridgeError, BridgeListener, DeviceBridge, DeviceHandle};
use crate::runner::ProcessRunner;

/// One line of `adb devices -l` output
#[derive(Debug, Clone)]
pub struct AdbDeviceInfo {
    pub serial: String,
    pub state: BridgeDeviceState,
    pub product: Option<String>,
    pub model: Option<String>,
}

impl AdbDeviceInfo {
    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

/// Parse `adb devices -l` output into device infos.
///
/// The first line is the "List of devices attached" banner.
pub fn parse_device_list(output: &str) -> Vec<AdbDeviceInfo> {
    let mut devices = Vec::new();

    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let serial = parts[0].to_string();
        let state = BridgeDeviceState::from_adb(parts[1]);

        let mut product = None;
        let mut model = None;
        for part in parts.iter().skip(2) {
            if let Some(value) = part.strip_prefix("product:") {
                product = Some(value.to_string());
            } else if let Some(value) = part.strip_prefix("model:") {
                model = Some(value.to_string());
            }
        }

        devices.push(AdbDeviceInfo {
            serial,
            state,
            product,
            model,
        });
    }

    devices
}

/// ADB Client
pub struct AdbClient {
    adb_path: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    command_timeout: Duration,
}

impl AdbClient {
    pub fn new(adb_path: PathBuf, runner: Arc<dyn ProcessRunner>, command_timeout: Duration) -> Self {
        Self {
            adb_path,
            runner,
            command_timeout,
        }
    }

    /// Run an adb command, failing on non-zero exit
    pub async fn run(&self, args: &[&str]) -> Result<String, BridgeError> {
        let result = self
            .runner
            .run_timed(self.command_timeout, &self.adb_path, args)
            .await?;

        if !result.success() {
            let detail = if result.timed_out {
                format!("adb {:?} timed out", args)
            } else {
                result.stderr.trim().to_string()
            };
            return Err(BridgeError::CommandFailed(detail));
        }

        Ok(result.stdout)
    }

    /// Run an adb command against a specific device
    pub async fn run_for_device(&self, serial: &str, args: &[&str]) -> Result<String, BridgeError> {
        let mut full_args = vec!["-s", serial];
        full_args.extend(args);
        self.run(&full_args).await
    }

    /// Start the adb server
    pub async fn start_server(&self) -> Result<(), BridgeError> {
        self.run(&["start-server"]).await?;
        Ok(())
    }

    /// Kill the adb server
    pub async fn kill_server(&self) -> Result<(), BridgeError> {
        self.run(&["kill-server"]).await?;
        Ok(())
    }

    /// List connected devices
    pub async fn list_devices(&self) -> Result<Vec<AdbDeviceInfo>, BridgeError> {
        let output = self.run(&["devices", "-l"]).await?;
        Ok(parse_device_list(&output))
    }

    /// Run a shell command on a device
    pub async fn shell(&self, serial: &str, command: &str) -> Result<String, BridgeError> {
        self.run_for_device(serial, &["shell", command]).await
    }

    /// Read a system property
    pub async fn get_prop(&self, serial: &str, prop: &str) -> Result<String, BridgeError> {
        let output = self.shell(serial, &format!("getprop {}", prop)).await?;
        Ok(output.trim().to_string())
    }

    /// Reboot a device, optionally into a named mode
    pub async fn reboot(&self, serial: &str, mode: Option<&str>) -> Result<(), BridgeError> {
        match mode {
            Some(mode) => self.run_for_device(serial, &["reboot", mode]).await?,
            None => self.run_for_device(serial, &["reboot"]).await?,
        };
        Ok(())
    }

    /// Connect to a TCP device ("host:port")
    pub async fn connect(&self, host_port: &str) -> Result<String, BridgeError> {
        self.run(&["connect", host_port]).await
    }

    /// Disconnect a TCP device
    pub async fn disconnect(&self, host_port: &str) -> Result<(), BridgeError> {
        self.run(&["disconnect", host_port]).await?;
        Ok(())
    }

    /// Switch a USB device to TCP addressing on the given port
    pub async fn tcpip(&self, serial: &str, port: u16) -> Result<(), BridgeError> {
        let port = port.to_string();
        self.run_for_device(serial, &["tcpip", &port]).await?;
        Ok(())
    }

    /// Restart adbd with root permissions
    pub async fn root(&self, serial: &str) -> Result<(), BridgeError> {
        self.run_for_device(serial, &["root"]).await?;
        Ok(())
    }
}

/// DeviceHandle backed by the adb CLI
pub struct AdbDeviceHandle {
    serial: String,
    emulator: bool,
    state: Mutex<BridgeDeviceState>,
    client: Arc<AdbClient>,
}

impl AdbDeviceHandle {
    pub fn new(info: &AdbDeviceInfo, client: Arc<AdbClient>) -> Self {
        Self {
            serial: info.serial.clone(),
            emulator: info.is_emulator(),
            state: Mutex::new(info.state),
            client,
        }
    }

    fn set_state(&self, state: BridgeDeviceState) {
        *self.state.lock() = state;
    }
}

#[async_trait]
impl DeviceHandle for AdbDeviceHandle {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn state(&self) -> BridgeDeviceState {
        *self.state.lock()
    }

    fn is_emulator(&self) -> bool {
        self.emulator
    }

    async fn get_property(&self, name: &str) -> Result<String, BridgeError> {
        self.client.get_prop(&self.serial, name).await
    }

    async fn shell(&self, command: &str) -> Result<String, BridgeError> {
        self.client.shell(&self.serial, command).await
    }

    async fn reboot(&self, mode: Option<&str>) -> Result<(), BridgeError> {
        self.client.reboot(&self.serial, mode).await
    }
}

/// DeviceBridge implementation that polls `adb devices -l` and diffs the
/// result against its last snapshot.
///
/// A replug of the same serial produces a fresh handle; the old one keeps
/// working for callers that still hold it, but the bridge reports the new
/// one.
pub struct AdbBridge {
    client: Arc<AdbClient>,
    poll_interval: Duration,
    listeners: RwLock<Vec<Arc<dyn BridgeListener>>>,
    known: Mutex<HashMap<String, Arc<AdbDeviceHandle>>>,
    cancel: CancellationToken,
    self_ref: std::sync::Weak<AdbBridge>,
}

impl AdbBridge {
    pub fn new(client: Arc<AdbClient>, poll_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            client,
            poll_interval,
            listeners: RwLock::new(Vec::new()),
            known: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            self_ref: weak.clone(),
        })
    }

    /// One poll cycle: list, diff, notify
    async fn poll_once(&self) {
        let infos = match self.client.list_devices().await {
            Ok(infos) => infos,
            Err(e) => {
                warn!("adb device list failed: {}", e);
                return;
            }
        };

        let mut connected: Vec<Arc<AdbDeviceHandle>> = Vec::new();
        let mut changed: Vec<(Arc<AdbDeviceHandle>, BridgeDeviceState)> = Vec::new();
        let mut disconnected: Vec<Arc<AdbDeviceHandle>> = Vec::new();

        {
            let mut known = self.known.lock();
            let mut seen: HashMap<&str, ()> = HashMap::new();

            for info in &infos {
                seen.insert(info.serial.as_str(), ());
                match known.get(&info.serial) {
                    Some(handle) => {
                        if handle.state() != info.state {
                            handle.set_state(info.state);
                            changed.push((handle.clone(), info.state));
                        }
                    }
                    None => {
                        let handle = Arc::new(AdbDeviceHandle::new(info, self.client.clone()));
                        known.insert(info.serial.clone(), handle.clone());
                        connected.push(handle);
                    }
                }
            }

            let gone: Vec<String> = known
                .keys()
                .filter(|serial| !seen.contains_key(serial.as_str()))
                .cloned()
                .collect();
            for serial in gone {
                if let Some(handle) = known.remove(&serial) {
                    disconnected.push(handle);
                }
            }
        }

        let listeners = self.listeners.read().clone();
        for handle in connected {
            debug!("device connected: {}", handle.serial());
            for listener in &listeners {
                listener.device_connected(handle.clone());
            }
        }
        for (handle, state) in changed {
            debug!("device {} changed to {:?}", handle.serial(), state);
            for listener in &listeners {
                listener.device_changed(handle.clone(), state);
            }
        }
        for handle in disconnected {
            debug!("device disconnected: {}", handle.serial());
            for listener in &listeners {
                listener.device_disconnected(handle.clone());
            }
        }
    }
}

#[async_trait]
impl DeviceBridge for AdbBridge {
    fn add_listener(&self, listener: Arc<dyn BridgeListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn BridgeListener>) {
        self.listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn devices(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, BridgeError> {
        // Refresh the snapshot so init-time replay sees the live picture
        self.poll_once().await;
        let known = self.known.lock();
        Ok(known
            .values()
            .map(|handle| handle.clone() as Arc<dyn DeviceHandle>)
            .collect())
    }

    async fn start(&self) -> Result<(), BridgeError> {
        self.client.start_server().await?;

        let bridge = self
            .self_ref
            .upgrade()
            .expect("bridge started while being dropped");
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(bridge.poll_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => bridge.poll_once().await,
                }
            }
            debug!("adb poll loop stopped");
        });

        info!("adb bridge started, polling every {:?}", self.poll_interval);
        Ok(())
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let output = "List of devices attached\n\
                      04035EEB0B01F01C       device product:sailfish model:Pixel\n\
                      emulator-5554          device product:sdk_gphone_x86\n\
                      HT99PP800024           offline\n";
        let devices = parse_device_list(output);

        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].serial, "04035EEB0B01F01C");
        assert_eq!(devices[0].state, BridgeDeviceState::Online);
        assert_eq!(devices[0].product.as_deref(), Some("sailfish"));
        assert!(devices[1].is_emulator());
        assert_eq!(devices[2].state, BridgeDeviceState::Offline);
    }

    #[test]
    fn test_parse_empty_device_list() {
        assert!(parse_device_list("List of devices attached\n").is_empty());
        assert!(parse_device_list("").is_empty());
    }

    #[test]
    fn test_parse_skips_garbled_lines() {
        let output = "List of devices attached\nsingleword\n";
        assert!(parse_device_list(output).is_empty());
    }
}
