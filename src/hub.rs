//! In-process fan-out of device events.
//!
//! The BLE connection loop publishes [`DeviceEvent`]s into a shared
//! [`DeviceHub`]; every WebSocket session subscribes to it. The hub also
//! tracks whether the device loop is running and whether a measurement
//! stream is live, so that new sessions can be told the current state.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::heart_rate::HeartRate;

/// Broadcast channel capacity for device events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connecting,
    ConnectFailed(String),
    Connected,
    /// Notifications are subscribed and data will follow.
    Prepared,
    Data {
        rate: HeartRate,
        /// Unix timestamp in seconds.
        t: f64,
    },
    ConnectionLost,
    ShuttingDown,
}

pub struct DeviceHub {
    started: AtomicBool,
    connected: AtomicBool,
    tx: broadcast::Sender<DeviceEvent>,
}

impl Default for DeviceHub {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            tx,
        }
    }

    /// Whether the device loop is running.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether measurements are currently flowing.
    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    /// Update flags and broadcast. Having no subscribers is fine.
    pub fn publish(&self, event: DeviceEvent) {
        match &event {
            DeviceEvent::Prepared => self.connected.store(true, Ordering::SeqCst),
            DeviceEvent::ConnectionLost => self.connected.store(false, Ordering::SeqCst),
            DeviceEvent::ShuttingDown => {
                self.connected.store(false, Ordering::SeqCst);
                self.started.store(false, Ordering::SeqCst);
            }
            _ => {}
        }
        let _ = self.tx.send(event);
    }
}
