//! In-memory fakes for the bridge traits
//!
//! Lightweight test doubles so the manager can be exercised without real
//! hardware, adb, or fastboot binaries.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::bridge::{
    BridgeDeviceState, BridgeError, BridgeListener, DeviceBridge, DeviceHandle,
};
use crate::runner::{CommandError, CommandResult, ProcessRunner};

/// ProcessRunner that replays scripted results.
///
/// Responses are keyed by a substring of the rendered command line; the
/// first matching queue is popped. Unscripted commands succeed with empty
/// output.
#[derive(Default)]
pub struct FakeProcessRunner {
    responses: Mutex<Vec<(String, VecDeque<CommandResult>)>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result for command lines containing `matcher`
    pub fn push_response(&self, matcher: &str, result: CommandResult) {
        let mut responses = self.responses.lock();
        if let Some((_, queue)) = responses.iter_mut().find(|(m, _)| m == matcher) {
            queue.push_back(result);
        } else {
            responses.push((matcher.to_string(), VecDeque::from([result])));
        }
    }

    /// Delay every subsequent invocation, to widen race windows in tests
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Rendered command lines seen so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ProcessRunner for FakeProcessRunner {
    async fn run_timed(
        &self,
        _timeout: Duration,
        program: &Path,
        args: &[&str],
    ) -> Result<CommandResult, CommandError> {
        let rendered = format!("{} {}", program.display(), args.join(" "));
        self.calls.lock().push(rendered.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut responses = self.responses.lock();
        for (matcher, queue) in responses.iter_mut() {
            if rendered.contains(matcher.as_str()) {
                if let Some(result) = queue.pop_front() {
                    return Ok(result);
                }
            }
        }
        Ok(CommandResult::ok(""))
    }
}

/// DeviceHandle with settable state, properties, and shell behavior
pub struct FakeDeviceHandle {
    serial: String,
    emulator: bool,
    state: Mutex<BridgeDeviceState>,
    properties: Mutex<HashMap<String, String>>,
    shell_responsive: AtomicBool,
    reboots: Mutex<Vec<Option<String>>>,
}

impl FakeDeviceHandle {
    pub fn new(serial: &str) -> Arc<Self> {
        Arc::new(Self {
            serial: serial.to_string(),
            emulator: serial.starts_with("emulator-"),
            state: Mutex::new(BridgeDeviceState::Online),
            properties: Mutex::new(HashMap::new()),
            shell_responsive: AtomicBool::new(true),
            reboots: Mutex::new(Vec::new()),
        })
    }

    /// A handle that already reports a completed boot
    pub fn booted(serial: &str) -> Arc<Self> {
        let handle = Self::new(serial);
        handle.set_property("sys.boot_completed", "1");
        handle
    }

    pub fn set_state(&self, state: BridgeDeviceState) {
        *self.state.lock() = state;
    }

    pub fn set_property(&self, name: &str, value: &str) {
        self.properties
            .lock()
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_shell_responsive(&self, responsive: bool) {
        self.shell_responsive.store(responsive, Ordering::SeqCst);
    }

    /// Reboot modes requested so far (None = normal reboot)
    pub fn reboots(&self) -> Vec<Option<String>> {
        self.reboots.lock().clone()
    }
}

#[async_trait]
impl DeviceHandle for FakeDeviceHandle {
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
        Ok(self.properties.lock().get(name).cloned().unwrap_or_default())
    }

    async fn shell(&self, command: &str) -> Result<String, BridgeError> {
        if self.shell_responsive.load(Ordering::SeqCst) {
            Ok(command.strip_prefix("echo ").unwrap_or("").to_string())
        } else {
            Err(BridgeError::CommandFailed("shell unresponsive".to_string()))
        }
    }

    async fn reboot(&self, mode: Option<&str>) -> Result<(), BridgeError> {
        self.reboots.lock().push(mode.map(|m| m.to_string()));
        Ok(())
    }
}

/// DeviceBridge driven directly by the test
#[derive(Default)]
pub struct FakeBridge {
    listeners: RwLock<Vec<Arc<dyn BridgeListener>>>,
    devices: Mutex<HashMap<String, Arc<FakeDeviceHandle>>>,
    started: AtomicBool,
}

impl FakeBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate a device being plugged in
    pub fn plug(&self, handle: Arc<FakeDeviceHandle>) {
        self.devices
            .lock()
            .insert(handle.serial().to_string(), handle.clone());
        for listener in self.listeners.read().iter() {
            listener.device_connected(handle.clone());
        }
    }

    /// Simulate a device being unplugged
    pub fn unplug(&self, serial: &str) {
        let handle = self.devices.lock().remove(serial);
        if let Some(handle) = handle {
            for listener in self.listeners.read().iter() {
                listener.device_disconnected(handle.clone());
            }
        }
    }

    /// Simulate an adb state change for a plugged device
    pub fn change_state(&self, serial: &str, state: BridgeDeviceState) {
        let handle = self.devices.lock().get(serial).cloned();
        if let Some(handle) = handle {
            handle.set_state(state);
            for listener in self.listeners.read().iter() {
                listener.device_changed(handle.clone(), state);
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceBridge for FakeBridge {
    fn add_listener(&self, listener: Arc<dyn BridgeListener>) {
        self.listeners.write().push(listener);
    }

    fn remove_listener(&self, listener: &Arc<dyn BridgeListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    async fn devices(&self) -> Result<Vec<Arc<dyn DeviceHandle>>, BridgeError> {
        Ok(self
            .devices
            .lock()
            .values()
            .map(|h| h.clone() as Arc<dyn DeviceHandle>)
            .collect())
    }

    async fn start(&self) -> Result<(), BridgeError> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_runner_scripted_responses() {
        let runner = FakeProcessRunner::new();
        runner.push_response("devices", CommandResult::ok("ABC fastboot"));
        runner.push_response("devices", CommandResult::ok(""));

        let out = runner
            .run_timed(Duration::from_secs(1), Path::new("fastboot"), &["devices"])
            .await
            .unwrap();
        assert_eq!(out.stdout, "ABC fastboot");

        let out = runner
            .run_timed(Duration::from_secs(1), Path::new("fastboot"), &["devices"])
            .await
            .unwrap();
        assert_eq!(out.stdout, "");

        // unscripted commands succeed
        let out = runner
            .run_timed(Duration::from_secs(1), Path::new("adb"), &["connect", "x"])
            .await
            .unwrap();
        assert!(out.success());
    }

    #[tokio::test]
    async fn test_fake_handle_shell() {
        let handle = FakeDeviceHandle::booted("ABC123");
        assert_eq!(handle.shell("echo ping").await.unwrap(), "ping");
        assert_eq!(handle.get_property("sys.boot_completed").await.unwrap(), "1");

        handle.set_shell_responsive(false);
        assert!(handle.shell("echo ping").await.is_err());
    }
}
