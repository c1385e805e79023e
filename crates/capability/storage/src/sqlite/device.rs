//! SQLite 设备、资源、驱动存储实现

use crate::error::StorageError;
use crate::traits::{DeviceStore, DriverStore, ResourceStore};
use domain::{Device, Driver, Resource, ResourceType};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

const DEVICE_COLUMNS: &str = "id, name, description, product_key, device_key, driver_type, \
     serial_port, baud_rate, data_bits, stop_bits, parity, ip_address, port_num, device_address, \
     collect_interval, storage_interval, timeout, driver_id, resource_id, enabled";

fn device_from_row(row: &SqliteRow) -> Result<Device, StorageError> {
    Ok(Device {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        product_key: row.try_get("product_key")?,
        device_key: row.try_get("device_key")?,
        driver_type: row.try_get("driver_type")?,
        serial_port: row.try_get("serial_port")?,
        baud_rate: row.try_get::<i64, _>("baud_rate")?.max(0) as u32,
        data_bits: row.try_get::<i64, _>("data_bits")?.clamp(0, 255) as u8,
        stop_bits: row.try_get::<i64, _>("stop_bits")?.clamp(0, 255) as u8,
        parity: row.try_get("parity")?,
        ip_address: row.try_get("ip_address")?,
        port_num: row.try_get::<i64, _>("port_num")?.clamp(0, u16::MAX as i64) as u16,
        device_address: row.try_get("device_address")?,
        collect_interval_ms: row.try_get("collect_interval")?,
        storage_interval_s: row.try_get("storage_interval")?,
        timeout_ms: row.try_get("timeout")?,
        driver_id: row.try_get("driver_id")?,
        resource_id: row.try_get("resource_id")?,
        enabled: row.try_get("enabled")?,
    })
}

pub struct SqliteDeviceStore {
    pub pool: SqlitePool,
}

impl SqliteDeviceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DeviceStore for SqliteDeviceStore {
    async fn list_devices(&self) -> Result<Vec<Device>, StorageError> {
        let rows = sqlx::query(&format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(device_from_row).collect()
    }

    async fn get_device(&self, id: i64) -> Result<Option<Device>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM devices WHERE id = ?", DEVICE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn find_by_identity(
        &self,
        product_key: &str,
        device_key: &str,
    ) -> Result<Option<Device>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM devices WHERE product_key = ? AND device_key = ? ORDER BY id LIMIT 1",
            DEVICE_COLUMNS
        ))
        .bind(product_key)
        .bind(device_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(device_from_row).transpose()
    }

    async fn create_device(&self, mut device: Device) -> Result<Device, StorageError> {
        if device.name.trim().is_empty() {
            return Err(StorageError::new("device name is required"));
        }
        let result = sqlx::query(
            "INSERT INTO devices (name, description, product_key, device_key, driver_type, \
             serial_port, baud_rate, data_bits, stop_bits, parity, ip_address, port_num, \
             device_address, collect_interval, storage_interval, timeout, driver_id, resource_id, \
             enabled) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&device.name)
        .bind(&device.description)
        .bind(&device.product_key)
        .bind(&device.device_key)
        .bind(&device.driver_type)
        .bind(&device.serial_port)
        .bind(device.baud_rate as i64)
        .bind(device.data_bits as i64)
        .bind(device.stop_bits as i64)
        .bind(&device.parity)
        .bind(&device.ip_address)
        .bind(device.port_num as i64)
        .bind(&device.device_address)
        .bind(device.collect_interval_ms)
        .bind(device.storage_interval_s)
        .bind(device.timeout_ms)
        .bind(device.driver_id)
        .bind(device.resource_id)
        .bind(device.enabled)
        .execute(&self.pool)
        .await?;
        device.id = result.last_insert_rowid();
        Ok(device)
    }

    async fn update_device(&self, device: Device) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE devices SET name = ?, description = ?, product_key = ?, device_key = ?, \
             driver_type = ?, serial_port = ?, baud_rate = ?, data_bits = ?, stop_bits = ?, \
             parity = ?, ip_address = ?, port_num = ?, device_address = ?, collect_interval = ?, \
             storage_interval = ?, timeout = ?, driver_id = ?, resource_id = ?, enabled = ? \
             WHERE id = ?",
        )
        .bind(&device.name)
        .bind(&device.description)
        .bind(&device.product_key)
        .bind(&device.device_key)
        .bind(&device.driver_type)
        .bind(&device.serial_port)
        .bind(device.baud_rate as i64)
        .bind(device.data_bits as i64)
        .bind(device.stop_bits as i64)
        .bind(&device.parity)
        .bind(&device.ip_address)
        .bind(device.port_num as i64)
        .bind(&device.device_address)
        .bind(device.collect_interval_ms)
        .bind(device.storage_interval_s)
        .bind(device.timeout_ms)
        .bind(device.driver_id)
        .bind(device.resource_id)
        .bind(device.enabled)
        .bind(device.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_device(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn resource_from_row(row: &SqliteRow) -> Result<Resource, StorageError> {
    let kind: String = row.try_get("type")?;
    Ok(Resource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: ResourceType::parse(&kind).unwrap_or_default(),
        path: row.try_get("path")?,
        enabled: row.try_get("enabled")?,
    })
}

pub struct SqliteResourceStore {
    pub pool: SqlitePool,
}

impl SqliteResourceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResourceStore for SqliteResourceStore {
    async fn list_resources(&self) -> Result<Vec<Resource>, StorageError> {
        let rows = sqlx::query("SELECT id, name, type, path, enabled FROM resources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(resource_from_row).collect()
    }

    async fn get_resource(&self, id: i64) -> Result<Option<Resource>, StorageError> {
        let row = sqlx::query("SELECT id, name, type, path, enabled FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(resource_from_row).transpose()
    }

    async fn create_resource(&self, mut resource: Resource) -> Result<Resource, StorageError> {
        if resource.enabled && resource.path.trim().is_empty() {
            return Err(StorageError::new("resource path is required"));
        }
        let result =
            sqlx::query("INSERT INTO resources (name, type, path, enabled) VALUES (?, ?, ?, ?)")
                .bind(&resource.name)
                .bind(resource.kind.as_str())
                .bind(&resource.path)
                .bind(resource.enabled)
                .execute(&self.pool)
                .await?;
        resource.id = result.last_insert_rowid();
        Ok(resource)
    }

    async fn delete_resource(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn driver_from_row(row: &SqliteRow) -> Result<Driver, StorageError> {
    Ok(Driver {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        file_path: row.try_get("file_path")?,
        description: row.try_get("description")?,
        version: row.try_get("version")?,
        config_schema: row.try_get("config_schema")?,
        enabled: row.try_get("enabled")?,
        resource_id: row.try_get("resource_id")?,
    })
}

const DRIVER_COLUMNS: &str =
    "id, name, file_path, description, version, config_schema, enabled, resource_id";

pub struct SqliteDriverStore {
    pub pool: SqlitePool,
}

impl SqliteDriverStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DriverStore for SqliteDriverStore {
    async fn list_drivers(&self) -> Result<Vec<Driver>, StorageError> {
        let rows = sqlx::query(&format!("SELECT {} FROM drivers ORDER BY id", DRIVER_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(driver_from_row).collect()
    }

    async fn get_driver(&self, id: i64) -> Result<Option<Driver>, StorageError> {
        let row = sqlx::query(&format!("SELECT {} FROM drivers WHERE id = ?", DRIVER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(driver_from_row).transpose()
    }

    async fn create_driver(&self, mut driver: Driver) -> Result<Driver, StorageError> {
        let result = sqlx::query(
            "INSERT INTO drivers (name, file_path, description, version, config_schema, enabled, \
             resource_id) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&driver.name)
        .bind(&driver.file_path)
        .bind(&driver.description)
        .bind(&driver.version)
        .bind(&driver.config_schema)
        .bind(driver.enabled)
        .bind(driver.resource_id)
        .execute(&self.pool)
        .await?;
        driver.id = result.last_insert_rowid();
        Ok(driver)
    }

    async fn update_driver(&self, driver: Driver) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "UPDATE drivers SET name = ?, file_path = ?, description = ?, version = ?, \
             config_schema = ?, enabled = ?, resource_id = ? WHERE id = ?",
        )
        .bind(&driver.name)
        .bind(&driver.file_path)
        .bind(&driver.description)
        .bind(&driver.version)
        .bind(&driver.config_schema)
        .bind(driver.enabled)
        .bind(driver.resource_id)
        .bind(driver.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_driver(&self, id: i64) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM drivers WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
