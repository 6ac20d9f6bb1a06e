//! Event System
//!
//! Provides a pub/sub event bus for fleet-wide notifications.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::debug;

/// Events emitted by the fleet manager
#[derive(Debug, Clone)]
pub enum FleetEvent {
    /// A device appeared on the transport
    DeviceConnected { serial: String },
    /// A device disappeared from the transport
    DeviceDisconnected { serial: String },
    /// A device's allocation state changed
    AllocationChanged {
        serial: String,
        old_state: String,
        new_state: String,
    },
    /// The fastboot poller saw a device in the bootloader
    FastbootDeviceSeen { serial: String },
    /// An emulator process was launched
    EmulatorStarted { serial: String },
    /// An emulator process was torn down
    EmulatorStopped { serial: String },
    /// Recovery started for a device
    RecoveryStarted { serial: String },
    /// Recovery brought the device back
    RecoverySucceeded { serial: String },
    /// Recovery exhausted its escalation steps
    RecoveryFailed { serial: String, reason: String },
    /// The manager is shutting down
    Shutdown,
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<FleetEvent>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<FleetEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<FleetEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Get an iterator over events
    pub fn iter(&self) -> impl Iterator<Item = FleetEvent> + '_ {
        self.receiver.iter()
    }
}

/// Event bus for publish/subscribe pattern
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<FleetEvent>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers, pruning dropped ones
    pub fn emit(&self, event: FleetEvent) -> usize {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());

        debug!("Event {:?} delivered to {} subscribers", event, subscribers.len());
        subscribers.len()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe();
        let sub2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus.emit(FleetEvent::Shutdown);
        assert_eq!(delivered, 2);

        assert!(sub1.try_recv().is_ok());
        assert!(sub2.try_recv().is_ok());
    }

    #[test]
    fn test_dropped_subscribers_pruned() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe();
        }
        let kept = bus.subscribe();

        let delivered = bus.emit(FleetEvent::DeviceConnected {
            serial: "abc123".to_string(),
        });
        assert_eq!(delivered, 1);
        assert!(matches!(
            kept.try_recv(),
            Ok(FleetEvent::DeviceConnected { .. })
        ));
    }
}
