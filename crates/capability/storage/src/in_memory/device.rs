//! 设备、资源与驱动的内存存储实现

use super::lock_failed;
use crate::error::StorageError;
use crate::traits::{DeviceStore, DriverStore, ResourceStore};
use domain::{Device, Driver, Resource};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// 设备内存存储
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<i64, Device>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定设备初始化（保留原 id）
    pub fn with_devices(devices: Vec<Device>) -> Self {
        let map = devices.into_iter().map(|device| (device.id, device)).collect();
        Self {
            devices: RwLock::new(map),
        }
    }
}

#[async_trait::async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        let items = self
            .devices
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn get_device(&self, id: i64) -> Result<Option<Device>, StorageError> {
        Ok(self.devices.read().ok().and_then(|map| map.get(&id).cloned()))
    }

    async fn find_by_identity(
        &self,
        product_key: &str,
        device_key: &str,
    ) -> Result<Option<Device>, StorageError> {
        let item = self.devices.read().ok().and_then(|map| {
            map.values()
                .find(|device| device.product_key == product_key && device.device_key == device_key)
                .cloned()
        });
        Ok(item)
    }

    async fn create_device(&self, mut device: Device) -> Result<Device, StorageError> {
        if device.name.trim().is_empty() {
            return Err(StorageError::new("device name is required"));
        }
        let mut map = self.devices.write().map_err(lock_failed)?;
        if device.id <= 0 {
            device.id = map.keys().next_back().copied().unwrap_or(0).max(0) + 1;
        }
        if map.contains_key(&device.id) {
            return Err(StorageError::new("device exists"));
        }
        map.insert(device.id, device.clone());
        Ok(device)
    }

    async fn update_device(&self, device: Device) -> Result<bool, StorageError> {
        let mut map = self.devices.write().map_err(lock_failed)?;
        match map.get_mut(&device.id) {
            Some(existing) => {
                *existing = device;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_device(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self.devices.write().map_err(lock_failed)?;
        Ok(map.remove(&id).is_some())
    }
}

/// 资源内存存储
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<BTreeMap<i64, Resource>>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn list_resources(&self) -> Result<Vec<Resource>, StorageError> {
        let items = self
            .resources
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>, StorageError> {
        Ok(self.resources.read().ok().and_then(|map| map.get(&id).cloned()))
    }

    async fn create_resource(&self, mut resource: Resource) -> Result<Resource, StorageError> {
        let mut map = self.resources.write().map_err(lock_failed)?;
        if map.values().any(|item| item.name == resource.name) {
            return Err(StorageError::new("resource name exists"));
        }
        if resource.id <= 0 {
            resource.id = map.keys().next_back().copied().unwrap_or(0).max(0) + 1;
        }
        map.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self.resources.write().map_err(lock_failed)?;
        Ok(map.remove(&id).is_some())
    }
}

/// 驱动内存存储
#[derive(Default)]
pub struct InMemoryDriverStore {
    drivers: RwLock<BTreeMap<i64, Driver>>,
}

impl InMemoryDriverStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl DriverStore for InMemoryDriverStore {
    async fn list_drivers(&self) -> Result<Vec<Driver>, StorageError> {
        let items = self
            .drivers
            .read()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default();
        Ok(items)
    }

    async fn get_driver(&self, id: i64) -> Result<Option<Driver>, StorageError> {
        Ok(self.drivers.read().ok().and_then(|map| map.get(&id).cloned()))
    }

    async fn create_driver(&self, mut driver: Driver) -> Result<Driver, StorageError> {
        let mut map = self.drivers.write().map_err(lock_failed)?;
        if driver.id <= 0 {
            driver.id = map.keys().next_back().copied().unwrap_or(0).max(0) + 1;
        }
        map.insert(driver.id, driver.clone());
        Ok(driver)
    }

    async fn update_driver(&self, driver: Driver) -> Result<bool, StorageError> {
        let mut map = self.drivers.write().map_err(lock_failed)?;
        match map.get_mut(&driver.id) {
            Some(existing) => {
                *existing = driver;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_driver(&self, id: i64) -> Result<bool, StorageError> {
        let mut map = self.drivers.write().map_err(lock_failed)?;
        Ok(map.remove(&id).is_some())
    }
}
