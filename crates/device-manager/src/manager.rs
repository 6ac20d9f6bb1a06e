//! Device Manager
//!
//! The orchestrator: owns the registry and the available pool, subscribes
//! to transport notifications, runs the background fastboot poller, and
//! implements allocate/free/force-allocate plus the TCP and emulator
//! operations.
//!
//! Transport callbacks are funneled through a channel into a single
//! dispatcher task, so no two tasks ever mutate one record's allocation
//! state concurrently; job tasks touch records only through the state
//! machine under the per-record lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use droid_fleet_bridge::{
    BridgeDeviceState, BridgeError, BridgeListener, CommandResult, ConnectivityState,
    DeviceBridge, DeviceHandle, EmulatorError, EmulatorLauncher, EmulatorOptions,
    FastbootClient, ProcessRunner,
};
use droid_fleet_core::{EventBus, FleetConfig, FleetEvent};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::descriptor::{sort_device_list, DeviceDescriptor};
use crate::error::DeviceError;
use crate::monitor::DeviceStateMonitor;
use crate::pool::AvailablePool;
use crate::registry::{DeviceKind, DeviceRecord, DeviceRegistry};
use crate::selection::SelectionCriteria;
use crate::state_machine::{AllocationState, DeviceEvent};

/// Delay for adbd to restart after `adb tcpip`
const TCPIP_RESTART_DELAY: Duration = Duration::from_secs(2);

/// How a device is being given back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeDeviceState {
    /// Device is healthy; return it to the pool
    Available,
    /// Device is presumed dead or crashed; keep it out of the pool
    Unavailable,
}

/// Observer of allocation-state changes; the externally visible trace of
/// the state machine
pub trait DeviceAllocationMonitor: Send + Sync {
    fn allocation_changed(&self, serial: &str, old_state: AllocationState, new_state: AllocationState);
}

/// Internal dispatcher messages
enum ManagerEvent {
    Connected {
        serial: String,
        handle: Arc<dyn DeviceHandle>,
    },
    Disconnected {
        serial: String,
    },
    StateChanged {
        serial: String,
        state: BridgeDeviceState,
    },
    CheckCompleted {
        serial: String,
        passed: bool,
        product: Option<String>,
    },
    FastbootList {
        serials: Vec<String>,
    },
}

/// BridgeListener that forwards transport callbacks into the dispatcher
struct BridgeEventForwarder {
    tx: mpsc::UnboundedSender<ManagerEvent>,
}

impl BridgeListener for BridgeEventForwarder {
    fn device_connected(&self, handle: Arc<dyn DeviceHandle>) {
        let _ = self.tx.send(ManagerEvent::Connected {
            serial: handle.serial().to_string(),
            handle,
        });
    }

    fn device_disconnected(&self, handle: Arc<dyn DeviceHandle>) {
        let _ = self.tx.send(ManagerEvent::Disconnected {
            serial: handle.serial().to_string(),
        });
    }

    fn device_changed(&self, handle: Arc<dyn DeviceHandle>, state: BridgeDeviceState) {
        let _ = self.tx.send(ManagerEvent::StateChanged {
            serial: handle.serial().to_string(),
            state,
        });
    }
}

fn kind_for_serial(serial: &str) -> DeviceKind {
    if serial.contains(':') {
        DeviceKind::TcpConnected
    } else {
        DeviceKind::Hardware
    }
}

/// The device-fleet manager
pub struct DeviceManager {
    registry: Arc<DeviceRegistry>,
    pool: Arc<AvailablePool>,
    bridge: Arc<dyn DeviceBridge>,
    runner: Arc<dyn ProcessRunner>,
    fastboot: Option<Arc<FastbootClient>>,
    launcher: Option<tokio::sync::Mutex<EmulatorLauncher>>,
    config: FleetConfig,
    events: Arc<EventBus>,
    monitors: RwLock<Vec<Arc<dyn DeviceAllocationMonitor>>>,
    global_filter: RwLock<Option<SelectionCriteria>>,
    tx: mpsc::UnboundedSender<ManagerEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ManagerEvent>>>,
    forwarder: Mutex<Option<Arc<dyn BridgeListener>>>,
    initialized: AtomicBool,
    cancel: CancellationToken,
    virtual_counter: AtomicU32,
}

impl DeviceManager {
    pub fn new(
        bridge: Arc<dyn DeviceBridge>,
        runner: Arc<dyn ProcessRunner>,
        fastboot: Option<Arc<FastbootClient>>,
        launcher: Option<EmulatorLauncher>,
        config: FleetConfig,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: Arc::new(DeviceRegistry::new()),
            pool: Arc::new(AvailablePool::new()),
            bridge,
            runner,
            fastboot,
            launcher: launcher.map(tokio::sync::Mutex::new),
            config,
            events,
            monitors: RwLock::new(Vec::new()),
            global_filter: RwLock::new(None),
            tx,
            rx: Mutex::new(Some(rx)),
            forwarder: Mutex::new(None),
            initialized: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            virtual_counter: AtomicU32::new(0),
        })
    }

    /// Start the manager: subscribe to transport notifications, replay the
    /// currently connected devices, and start the background pollers.
    ///
    /// Devices not matching `global_filter` stay discoverable via `find`
    /// but never reach Available.
    pub async fn init(
        self: &Arc<Self>,
        global_filter: Option<SelectionCriteria>,
        monitors: Vec<Arc<dyn DeviceAllocationMonitor>>,
    ) -> Result<(), DeviceError> {
        *self.global_filter.write() = global_filter;
        self.monitors.write().extend(monitors);

        self.bridge.start().await?;

        let forwarder: Arc<dyn BridgeListener> = Arc::new(BridgeEventForwarder {
            tx: self.tx.clone(),
        });
        self.bridge.add_listener(forwarder.clone());
        *self.forwarder.lock() = Some(forwarder);

        // Replay devices that were already connected before we listened
        for handle in self.bridge.devices().await? {
            if handle.state().is_online() {
                let _ = self.tx.send(ManagerEvent::Connected {
                    serial: handle.serial().to_string(),
                    handle,
                });
            }
        }

        let rx = self
            .rx
            .lock()
            .take()
            .expect("DeviceManager::init() called twice");
        let manager = self.clone();
        tokio::spawn(async move { manager.run_dispatcher(rx).await });

        if self.config.discovery.fastboot_poll_enabled && self.fastboot.is_some() {
            self.spawn_fastboot_poller();
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("device manager initialized");
        Ok(())
    }

    /// Stop background tasks and tear down managed emulators
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(forwarder) = self.forwarder.lock().take() {
            self.bridge.remove_listener(&forwarder);
        }
        self.bridge.stop();
        if let Some(launcher) = &self.launcher {
            launcher.lock().await.stop_all().await;
        }
        self.events.emit(FleetEvent::Shutdown);
        self.initialized.store(false, Ordering::SeqCst);
        info!("device manager shut down");
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Calling allocation methods before init is a programming error
    fn assert_initialized(&self, operation: &str) {
        assert!(
            self.initialized.load(Ordering::SeqCst),
            "DeviceManager::{} called before init()",
            operation
        );
    }

    // ---- dispatcher ----------------------------------------------------

    async fn run_dispatcher(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<ManagerEvent>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    }

    fn handle_event(self: &Arc<Self>, event: ManagerEvent) {
        match event {
            ManagerEvent::Connected { serial, handle } => self.on_connected(&serial, handle),
            ManagerEvent::Disconnected { serial } => self.on_disconnected(&serial),
            ManagerEvent::StateChanged { serial, state } => self.on_state_changed(&serial, state),
            ManagerEvent::CheckCompleted {
                serial,
                passed,
                product,
            } => self.on_check_completed(&serial, passed, product),
            ManagerEvent::FastbootList { serials } => self.on_fastboot_list(&serials),
        }
    }

    fn on_connected(self: &Arc<Self>, serial: &str, handle: Arc<dyn DeviceHandle>) {
        let Some(record) = self.registry.find_or_create(serial, kind_for_serial(serial)) else {
            debug!("ignoring placeholder serial {:?}", serial);
            return;
        };

        record.set_handle(handle.clone());
        record.set_connectivity(ConnectivityState::Online);
        self.events.emit(FleetEvent::DeviceConnected {
            serial: serial.to_string(),
        });

        if let Some(filter) = self.global_filter.read().as_ref() {
            if !filter.matches(&record) {
                if !record.is_excluded() {
                    info!("device {} excluded by global filter", serial);
                    record.mark_excluded();
                }
                return;
            }
        }

        let (old, t) = record.apply_event(DeviceEvent::ConnectedOnline);
        if t.changed {
            self.notify_allocation_change(serial, old, t.new_state);
            self.spawn_availability_check(handle);
        }
    }

    fn on_disconnected(&self, serial: &str) {
        let Some(record) = self.registry.find(serial) else {
            return;
        };

        // May be dropped if a fastboot command is in flight; the next
        // bridge poll re-observes the real state.
        record.set_connectivity(ConnectivityState::NotAvailable);
        self.pool.remove(serial);

        let (old, t) = record.apply_event(DeviceEvent::Disconnected);
        if t.changed {
            self.notify_allocation_change(serial, old, t.new_state);
        }
        self.events.emit(FleetEvent::DeviceDisconnected {
            serial: serial.to_string(),
        });
    }

    fn on_state_changed(self: &Arc<Self>, serial: &str, state: BridgeDeviceState) {
        let Some(record) = self.registry.find(serial) else {
            return;
        };

        record.set_connectivity(ConnectivityState::from_bridge(state));

        if state.is_online() {
            // A device climbing back to online re-enters the
            // availability pipeline.
            let (old, t) = record.apply_event(DeviceEvent::ConnectedOnline);
            if t.changed {
                self.notify_allocation_change(serial, old, t.new_state);
                if let Some(handle) = record.handle() {
                    self.spawn_availability_check(handle);
                }
            }
        } else {
            // An offline device cannot be handed out
            self.pool.remove(serial);
            let (old, t) = record.apply_event(DeviceEvent::Disconnected);
            if t.changed {
                self.notify_allocation_change(serial, old, t.new_state);
            }
        }
    }

    fn on_check_completed(&self, serial: &str, passed: bool, product: Option<String>) {
        let Some(record) = self.registry.find(serial) else {
            return;
        };

        if product.is_some() {
            record.set_product(product);
        }

        let event = if passed {
            DeviceEvent::AvailableCheckPassed
        } else {
            DeviceEvent::AvailableCheckFailed
        };
        let (old, t) = record.apply_event(event);
        if t.changed {
            self.notify_allocation_change(serial, old, t.new_state);
            if t.new_state == AllocationState::Available && !record.is_excluded() {
                self.pool.offer(record);
            }
        }
    }

    fn on_fastboot_list(&self, serials: &[String]) {
        for serial in serials {
            let Some(record) = self.registry.find_or_create(serial, DeviceKind::Hardware) else {
                continue;
            };
            if record.connectivity_state() != ConnectivityState::Fastboot {
                self.events.emit(FleetEvent::FastbootDeviceSeen {
                    serial: serial.clone(),
                });
            }
            record.set_connectivity(ConnectivityState::Fastboot);
        }

        // Devices that left fastboot without reappearing on adb
        for record in self.registry.records() {
            if record.connectivity_state() == ConnectivityState::Fastboot
                && !record.fastboot_busy()
                && !serials.iter().any(|s| s == record.serial())
            {
                record.set_connectivity(ConnectivityState::NotAvailable);
            }
        }
    }

    /// Best-effort shell round-trip deciding whether a device is usable
    fn spawn_availability_check(self: &Arc<Self>, handle: Arc<dyn DeviceHandle>) {
        let tx = self.tx.clone();
        let limit = self.config.discovery.availability_check_timeout();
        tokio::spawn(async move {
            let serial = handle.serial().to_string();
            let outcome = tokio::time::timeout(limit, async {
                let shell_ok = handle.shell("echo ping").await.is_ok();
                let product = handle
                    .get_property("ro.build.product")
                    .await
                    .ok()
                    .filter(|p| !p.is_empty());
                (shell_ok, product)
            })
            .await;

            let (passed, product) = match outcome {
                Ok((passed, product)) => (passed, product),
                Err(_) => (false, None),
            };
            debug!("availability check for {}: passed={}", serial, passed);
            let _ = tx.send(ManagerEvent::CheckCompleted {
                serial,
                passed,
                product,
            });
        });
    }

    fn spawn_fastboot_poller(self: &Arc<Self>) {
        let fastboot = self.fastboot.clone().expect("poller without fastboot client");
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let interval = self.config.discovery.fastboot_poll_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match fastboot.devices().await {
                            Ok(serials) => {
                                let _ = tx.send(ManagerEvent::FastbootList { serials });
                            }
                            Err(e) => debug!("fastboot poll failed: {}", e),
                        }
                    }
                }
            }
            debug!("fastboot poller stopped");
        });
    }

    // ---- allocation ----------------------------------------------------

    /// Allocate any physical device, waiting up to the configured default
    pub async fn allocate_device(&self) -> Option<Arc<DeviceRecord>> {
        self.allocate_device_matching(
            SelectionCriteria::any(),
            self.config.allocation.default_timeout(),
        )
        .await
    }

    /// Allocate the first available device matching `criteria`, waiting up
    /// to `limit` for one to appear. None means no match in time, which is
    /// an expected outcome in a shared pool, not an error.
    pub async fn allocate_device_matching(
        &self,
        criteria: SelectionCriteria,
        limit: Duration,
    ) -> Option<Arc<DeviceRecord>> {
        self.assert_initialized("allocate_device");

        // Virtual placeholders are synthesized on demand, not pooled
        if criteria.null_device_requested {
            return Some(self.create_virtual_device(DeviceKind::NullDevice));
        }
        if criteria.stub_emulator_requested {
            return Some(self.create_virtual_device(DeviceKind::StubEmulator));
        }

        let limit = if self.config.allocation.synchronous {
            Duration::ZERO
        } else {
            limit
        };

        let record = self
            .pool
            .take(
                |record| {
                    criteria.matches(record)
                        && record.apply_event(DeviceEvent::AllocateRequest).1.changed
                },
                limit,
            )
            .await?;

        self.notify_allocation_change(
            record.serial(),
            AllocationState::Available,
            AllocationState::Allocated,
        );
        info!("allocated device {}", record.serial());
        Some(record)
    }

    fn create_virtual_device(&self, kind: DeviceKind) -> Arc<DeviceRecord> {
        let n = self.virtual_counter.fetch_add(1, Ordering::SeqCst);
        let serial = match kind {
            DeviceKind::NullDevice => format!("null-device-{}", n),
            _ => format!("stub-emulator-{}", n),
        };
        let record = self
            .registry
            .find_or_create(&serial, kind)
            .expect("virtual serials are never placeholders");
        let (old, t) = record.apply_event(DeviceEvent::ForceAllocateRequest);
        if t.changed {
            self.notify_allocation_change(&serial, old, t.new_state);
        }
        record
    }

    /// Claim a specific device regardless of where it is in the discovery
    /// pipeline. None means it was already allocated.
    pub fn force_allocate_device(&self, serial: &str) -> Option<Arc<DeviceRecord>> {
        self.assert_initialized("force_allocate_device");

        let record = self.registry.find_or_create(serial, kind_for_serial(serial))?;
        let (old, t) = record.apply_event(DeviceEvent::ForceAllocateRequest);
        if !t.changed {
            debug!("force allocate {}: already allocated", serial);
            return None;
        }

        self.pool.remove(serial);
        self.notify_allocation_change(serial, old, t.new_state);
        info!("force-allocated device {}", serial);
        Some(record)
    }

    /// Give a device back. Freeing a never-allocated device is a silent
    /// no-op. TCP and virtual records are dissolved rather than pooled;
    /// a stub emulator's process is torn down.
    pub async fn free_device(&self, record: &Arc<DeviceRecord>, free_state: FreeDeviceState) {
        self.assert_initialized("free_device");
        let serial = record.serial().to_string();

        match record.kind() {
            DeviceKind::StubEmulator => {
                if let Some(launcher) = &self.launcher {
                    match launcher.lock().await.kill_by_serial(&serial).await {
                        Ok(true) => {
                            self.events.emit(FleetEvent::EmulatorStopped {
                                serial: serial.clone(),
                            });
                        }
                        Ok(false) => {}
                        Err(e) => warn!("failed to kill emulator {}: {}", serial, e),
                    }
                }
                let (old, t) = record.apply_event(DeviceEvent::FreeUnknown);
                if t.changed {
                    self.notify_allocation_change(&serial, old, t.new_state);
                }
                self.registry.remove(&serial);
                return;
            }
            DeviceKind::NullDevice => {
                let (old, t) = record.apply_event(DeviceEvent::FreeUnknown);
                if t.changed {
                    self.notify_allocation_change(&serial, old, t.new_state);
                }
                self.registry.remove(&serial);
                return;
            }
            DeviceKind::TcpConnected => {
                if let Err(e) = self.disconnect_from_tcp_device(record).await {
                    warn!("failed to disconnect tcp device {}: {}", serial, e);
                }
                return;
            }
            DeviceKind::Hardware => {}
        }

        let event = match free_state {
            FreeDeviceState::Available => DeviceEvent::FreeAvailable,
            FreeDeviceState::Unavailable => DeviceEvent::FreeUnknown,
        };
        let (old, t) = record.apply_event(event);
        if !t.changed {
            debug!("free {}: not allocated, ignoring", serial);
            return;
        }

        self.notify_allocation_change(&serial, old, t.new_state);
        if t.new_state == AllocationState::Available && !record.is_excluded() {
            self.pool.offer(record.clone());
        }
        info!("freed device {} as {:?}", serial, free_state);
    }

    // ---- tcp devices ---------------------------------------------------

    async fn adb_command(&self, args: &[&str]) -> Result<CommandResult, DeviceError> {
        let adb = self
            .config
            .tools
            .resolve_adb()
            .ok_or(DeviceError::Bridge(BridgeError::AdbNotFound))?;
        let result = self
            .runner
            .run_timed(self.config.tools.command_timeout(), &adb, args)
            .await?;
        Ok(result)
    }

    /// Connect to a device over TCP ("ip:port"), force-allocate it, and
    /// wait for it to come online. Retries the underlying connect a
    /// bounded number of times.
    pub async fn connect_to_tcp_device(
        &self,
        ip_port: &str,
    ) -> Result<Arc<DeviceRecord>, DeviceError> {
        self.assert_initialized("connect_to_tcp_device");

        for attempt in 1..=self.config.tcp.connect_attempts {
            let result = self.adb_command(&["connect", ip_port]).await?;
            let connected = result.success() && result.stdout.contains("connected to");
            if !connected {
                warn!(
                    "adb connect {} failed (attempt {}/{}): {}",
                    ip_port,
                    attempt,
                    self.config.tcp.connect_attempts,
                    result.stdout.trim()
                );
                tokio::time::sleep(self.config.tcp.retry_delay()).await;
                continue;
            }

            let Some(record) = self.force_allocate_device(ip_port) else {
                // Someone else already holds this address
                return Err(DeviceError::TcpConnect(ip_port.to_string()));
            };

            let monitor = DeviceStateMonitor::new(record.clone());
            if monitor
                .wait_for_online(self.config.tcp.online_timeout())
                .await
                .is_some()
            {
                info!("connected tcp device {}", ip_port);
                return Ok(record);
            }

            // Never came online: dissolve the record and retry
            let (old, t) = record.apply_event(DeviceEvent::FreeUnknown);
            if t.changed {
                self.notify_allocation_change(ip_port, old, t.new_state);
            }
            self.registry.remove(ip_port);
            tokio::time::sleep(self.config.tcp.retry_delay()).await;
        }

        Err(DeviceError::TcpConnect(ip_port.to_string()))
    }

    /// Disconnect a TCP device and drop its record
    pub async fn disconnect_from_tcp_device(
        &self,
        record: &Arc<DeviceRecord>,
    ) -> Result<(), DeviceError> {
        let serial = record.serial().to_string();
        if record.kind() != DeviceKind::TcpConnected {
            return Err(DeviceError::Unsupported {
                serial,
                reason: "not a tcp device".to_string(),
            });
        }

        // Best effort: the device may already be gone from the transport
        if let Err(e) = self.adb_command(&["-s", &serial, "usb"]).await {
            debug!("switching {} back to usb failed: {}", serial, e);
        }
        self.adb_command(&["disconnect", &serial]).await?;

        self.pool.remove(&serial);
        let (old, t) = record.apply_event(DeviceEvent::FreeUnknown);
        if t.changed {
            self.notify_allocation_change(&serial, old, t.new_state);
        }
        self.registry.remove(&serial);
        info!("disconnected tcp device {}", serial);
        Ok(())
    }

    /// Switch an allocated USB device to TCP addressing and reconnect to
    /// it. On failure the original USB device is recovered and remains
    /// the only record.
    pub async fn reconnect_device_to_tcp(
        &self,
        usb_record: &Arc<DeviceRecord>,
    ) -> Result<Arc<DeviceRecord>, DeviceError> {
        self.assert_initialized("reconnect_device_to_tcp");
        let serial = usb_record.serial().to_string();

        let handle = usb_record
            .handle()
            .ok_or_else(|| DeviceError::NotAvailable(serial.clone()))?;
        let ip = handle.get_property("dhcp.wlan0.ipaddress").await?;
        if ip.is_empty() {
            return Err(DeviceError::TcpConnect(format!("{}: no ip address", serial)));
        }

        let port = self.config.tcp.default_port;
        self.adb_command(&["-s", &serial, "tcpip", &port.to_string()])
            .await?;
        tokio::time::sleep(TCPIP_RESTART_DELAY).await;

        let ip_port = format!("{}:{}", ip, port);
        match self.connect_to_tcp_device(&ip_port).await {
            Ok(record) => Ok(record),
            Err(e) => {
                warn!(
                    "tcp reconnect of {} failed, recovering the usb device",
                    serial
                );
                self.recover_device(usb_record).await?;
                Err(e)
            }
        }
    }

    // ---- emulators -----------------------------------------------------

    /// Launch an emulator, allocate its record, and wait for it to boot
    pub async fn launch_emulator(&self, avd_name: &str) -> Result<Arc<DeviceRecord>, DeviceError> {
        self.assert_initialized("launch_emulator");
        let launcher = self
            .launcher
            .as_ref()
            .ok_or(DeviceError::Emulator(EmulatorError::NotFound))?;

        let options = if self.config.emulator.headless {
            EmulatorOptions::headless()
        } else {
            EmulatorOptions::default()
        };
        let serial = launcher.lock().await.launch(avd_name, options)?;

        let record = self
            .registry
            .find_or_create(&serial, DeviceKind::StubEmulator)
            .expect("emulator serials are never placeholders");
        let (old, t) = record.apply_event(DeviceEvent::ForceAllocateRequest);
        if t.changed {
            self.pool.remove(&serial);
            self.notify_allocation_change(&serial, old, t.new_state);
        }
        self.events.emit(FleetEvent::EmulatorStarted {
            serial: serial.clone(),
        });

        let monitor = DeviceStateMonitor::new(record.clone());
        if monitor
            .wait_for_available(self.config.emulator.launch_timeout())
            .await
            .is_some()
        {
            info!("emulator {} booted", serial);
            return Ok(record);
        }

        warn!("emulator {} failed to boot, tearing it down", serial);
        let _ = launcher.lock().await.kill_by_serial(&serial).await;
        let (old, t) = record.apply_event(DeviceEvent::FreeUnknown);
        if t.changed {
            self.notify_allocation_change(&serial, old, t.new_state);
        }
        self.registry.remove(&serial);
        Err(DeviceError::NotAvailable(serial))
    }

    /// Tear down the emulator process behind a stub record
    pub async fn kill_emulator(&self, record: &Arc<DeviceRecord>) -> Result<(), DeviceError> {
        let serial = record.serial().to_string();
        if record.kind() != DeviceKind::StubEmulator {
            return Err(DeviceError::Unsupported {
                serial,
                reason: "not a managed emulator".to_string(),
            });
        }
        let Some(launcher) = &self.launcher else {
            return Ok(());
        };

        launcher.lock().await.kill_by_serial(&serial).await?;
        record.set_connectivity(ConnectivityState::NotAvailable);
        self.events.emit(FleetEvent::EmulatorStopped { serial });
        Ok(())
    }

    // ---- fastboot ------------------------------------------------------

    /// Run a fastboot command against a device.
    ///
    /// While the command is in flight the device is pinned to Fastboot and
    /// incoming connectivity notifications for it are dropped; the adb
    /// transport and the fastboot CLI observe the device through
    /// conflicting channels, and a racing disconnect during a long flash
    /// would otherwise corrupt the state.
    pub async fn execute_fastboot_command(
        &self,
        record: &Arc<DeviceRecord>,
        args: &[&str],
    ) -> Result<CommandResult, DeviceError> {
        self.assert_initialized("execute_fastboot_command");
        let serial = record.serial().to_string();

        let fastboot = self.fastboot.as_ref().ok_or_else(|| DeviceError::Unsupported {
            serial: serial.clone(),
            reason: "fastboot not configured".to_string(),
        })?;
        if matches!(record.kind(), DeviceKind::NullDevice | DeviceKind::StubEmulator) {
            return Err(DeviceError::Unsupported {
                serial,
                reason: "device kind has no fastboot support".to_string(),
            });
        }

        record.begin_fastboot();
        let result = fastboot.run_for_device(&serial, args).await;

        // A reboot leaves the bootloader; anything else stays in it
        let outcome = match &result {
            Ok(_) if args.first().is_some_and(|a| a.starts_with("reboot")) => {
                ConnectivityState::NotAvailable
            }
            Ok(_) => ConnectivityState::Fastboot,
            Err(_) => ConnectivityState::NotAvailable,
        };
        record.end_fastboot(outcome);

        Ok(result?)
    }

    // ---- observation ---------------------------------------------------

    /// The single choke point for connectivity updates from outside the
    /// dispatcher (tests, embedding harnesses)
    pub fn set_device_state(&self, serial: &str, connectivity: ConnectivityState) -> bool {
        match self.registry.find(serial) {
            Some(record) => record.set_connectivity(connectivity),
            None => false,
        }
    }

    pub fn find_device(&self, serial: &str) -> Option<Arc<DeviceRecord>> {
        self.registry.find(serial)
    }

    /// Snapshots of all known devices: Allocated first, then Available,
    /// discovery order within each group
    pub fn list_all_devices(&self) -> Vec<DeviceDescriptor> {
        let descriptors = self
            .registry
            .records()
            .iter()
            .map(|record| DeviceDescriptor::snapshot(record))
            .collect();
        sort_device_list(descriptors)
    }

    pub fn add_device_monitor(&self, monitor: Arc<dyn DeviceAllocationMonitor>) {
        self.monitors.write().push(monitor);
    }

    pub fn remove_device_monitor(&self, monitor: &Arc<dyn DeviceAllocationMonitor>) {
        self.monitors.write().retain(|m| !Arc::ptr_eq(m, monitor));
    }

    pub(crate) fn notify_allocation_change(
        &self,
        serial: &str,
        old_state: AllocationState,
        new_state: AllocationState,
    ) {
        let monitors = self.monitors.read().clone();
        for monitor in monitors {
            monitor.allocation_changed(serial, old_state, new_state);
        }
        self.events.emit(FleetEvent::AllocationChanged {
            serial: serial.to_string(),
            old_state: old_state.as_str().to_string(),
            new_state: new_state.as_str().to_string(),
        });
    }

    pub(crate) fn fastboot_client(&self) -> Option<&Arc<FastbootClient>> {
        self.fastboot.as_ref()
    }

    pub(crate) fn recovery_config(&self) -> &droid_fleet_core::config::RecoveryConfig {
        &self.config.recovery
    }
}
