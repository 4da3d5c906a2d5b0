//! Bus topic layout and inbound routing
//!
//! All topics live under a configurable namespace prefix. Inbound
//! routing is a single table built once at startup.

/// Recognized inbound message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// Load a new device from a layout file payload
    PutDevice,
    /// Replace the full device state (cross-process propagation)
    PutDeviceState,
    /// Query the current device
    GetDevice,
    /// Shut the process down
    Exit,
}

/// Concrete topic strings for one namespace
#[derive(Debug, Clone)]
pub struct TopicSet {
    pub put_device: String,
    pub put_device_state: String,
    pub get_device: String,
    pub exit: String,
    pub device_state: String,
    pub device_swapped: String,
    pub error: String,
}

impl TopicSet {
    pub fn new(namespace: &str) -> Self {
        Self {
            put_device: format!("{namespace}/put/device"),
            put_device_state: format!("{namespace}/put/device-state"),
            get_device: format!("{namespace}/get/device"),
            exit: format!("{namespace}/exit"),
            device_state: format!("{namespace}/device-state"),
            device_swapped: format!("{namespace}/device-swapped"),
            error: format!("{namespace}/error"),
        }
    }

    /// Topics the reactor subscribes to on connect
    pub fn subscriptions(&self) -> [&str; 4] {
        [
            &self.put_device,
            &self.put_device_state,
            &self.get_device,
            &self.exit,
        ]
    }

    /// Route an inbound topic to its handler kind
    pub fn route(&self, topic: &str) -> Option<Inbound> {
        if topic == self.put_device {
            Some(Inbound::PutDevice)
        } else if topic == self.put_device_state {
            Some(Inbound::PutDeviceState)
        } else if topic == self.get_device {
            Some(Inbound::GetDevice)
        } else if topic == self.exit {
            Some(Inbound::Exit)
        } else {
            None
        }
    }
}
