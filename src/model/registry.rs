//! In-memory [`DeviceRegistry`] used by the binary and the test suite.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Device, DeviceRegistry};

#[derive(Default)]
pub struct InMemoryRegistry {
    devices: Mutex<BTreeMap<String, Arc<Device>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the currently registered devices, ordered by id.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.lock().values().cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.lock().get(device_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }
}

impl DeviceRegistry for InMemoryRegistry {
    fn register(&self, device: Device) -> bool {
        let mut devices = self.devices.lock();
        if devices.contains_key(&device.id) {
            log::warn!("Refusing to register duplicate device {}", device.id);
            return false;
        }
        log::info!("Registered device {}", device.id);
        devices.insert(device.id.clone(), Arc::new(device));
        true
    }

    fn deregister(&self, device_id: &str) -> bool {
        let removed = self.devices.lock().remove(device_id).is_some();
        if removed {
            log::info!("Deregistered device {device_id}");
        } else {
            log::warn!("Deregistering unknown device {device_id}");
        }
        removed
    }
}
