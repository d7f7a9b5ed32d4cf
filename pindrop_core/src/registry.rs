//! Logical devices and the connections currently representing them.
//!
//! A device may hold several connections at once (a reconnect racing the old
//! socket's close). It stays online until the last one is released.

use crate::connection::ConnectionId;
use crate::dashboard::{DashboardEvent, EventBus};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Owner name used when a connection has no registered device
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub display_name: String,
    pub connections: HashSet<ConnectionId>,
}

pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Device>>,
    bus: EventBus,
}

impl DeviceRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Add `connection` to the device, creating the device on first sight.
    pub async fn admit(&self, device_id: &str, display_name: &str, connection: ConnectionId) {
        let mut devices = self.devices.write().await;

        if !devices.contains_key(device_id) {
            tracing::info!("Device connected: {} ({})", display_name, device_id);
            devices.insert(
                device_id.to_string(),
                Device {
                    id: device_id.to_string(),
                    display_name: display_name.to_string(),
                    connections: HashSet::new(),
                },
            );
            self.bus.emit(DashboardEvent::ClientConnected);
        }

        if let Some(device) = devices.get_mut(device_id) {
            device.connections.insert(connection);
        }

        self.bus.emit(DashboardEvent::ClientUpdate {
            clients: display_names(&devices),
        });
    }

    /// Rename a known device. Unknown ids are ignored.
    pub async fn rename(&self, device_id: &str, new_name: &str) -> bool {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(device_id) else {
            return false;
        };

        tracing::info!(
            "Device {} renamed: {} -> {}",
            device_id,
            device.display_name,
            new_name
        );
        device.display_name = new_name.to_string();
        self.bus.emit(DashboardEvent::ClientUpdate {
            clients: display_names(&devices),
        });
        true
    }

    /// Drop `connection`; removes its device once no connections remain.
    pub async fn release(&self, connection: ConnectionId) {
        let mut devices = self.devices.write().await;

        let owner = devices
            .iter_mut()
            .find(|(_, device)| device.connections.contains(&connection));
        let Some((device_id, device)) = owner else {
            return;
        };
        device.connections.remove(&connection);
        if !device.connections.is_empty() {
            return;
        }

        let device_id = device_id.clone();
        if let Some(device) = devices.remove(&device_id) {
            tracing::info!("Device disconnected: {} ({})", device.display_name, device_id);
        }
        self.bus.emit(DashboardEvent::ClientDisconnected);
        self.bus.emit(DashboardEvent::ClientUpdate {
            clients: display_names(&devices),
        });
    }

    /// Display name of the device owning `connection`, or [`UNKNOWN_DEVICE`]
    pub async fn resolve_owner(&self, connection: ConnectionId) -> String {
        self.devices
            .read()
            .await
            .values()
            .find(|device| device.connections.contains(&connection))
            .map(|device| device.display_name.clone())
            .unwrap_or_else(|| UNKNOWN_DEVICE.to_string())
    }

    /// Id of the device owning `connection`, if any
    pub async fn owner_of(&self, connection: ConnectionId) -> Option<String> {
        self.devices
            .read()
            .await
            .values()
            .find(|device| device.connections.contains(&connection))
            .map(|device| device.id.clone())
    }

    pub async fn names(&self) -> Vec<String> {
        display_names(&*self.devices.read().await)
    }

    pub async fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().await.get(device_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn display_names(devices: &HashMap<String, Device>) -> Vec<String> {
    devices.values().map(|d| d.display_name.clone()).collect()
}
