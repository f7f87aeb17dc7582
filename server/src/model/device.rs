use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::QueryOrder;
use serde::Serialize;

use crate::{db_core::prelude::*, server_config::DeviceSeed};

/// A monitored device as seen by the monitoring core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub is_online: bool,
    pub last_communication: DateTime<Utc>,
}

impl Device {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl TryFrom<device::Model> for Device {
    type Error = anyhow::Error;

    fn try_from(model: device::Model) -> Result<Self, Self::Error> {
        let port = u16::try_from(model.port)
            .with_context(|| format!("Device {} has invalid port {}", model.id, model.port))?;

        Ok(Self {
            id: model.id,
            name: model.name,
            address: model.address,
            port,
            is_online: model.is_online,
            last_communication: model.last_communication.with_timezone(&Utc),
        })
    }
}

/// Device registry consumed by the monitor. Only the status fields are ever written.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn list(&self) -> anyhow::Result<Vec<Device>>;

    async fn get(&self, id: i32) -> anyhow::Result<Option<Device>>;

    /// Persist `is_online` and `last_communication` for an existing device.
    async fn save_status(&self, device: &Device) -> anyhow::Result<()>;
}

pub struct DeviceCtrl {
    conn: DatabaseConnection,
}

impl DeviceCtrl {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DeviceStore for DeviceCtrl {
    async fn list(&self) -> anyhow::Result<Vec<Device>> {
        let devices = DeviceEntity::find()
            .order_by_asc(device::Column::Id)
            .all(&self.conn)
            .await
            .context("Error fetching devices")?;

        devices.into_iter().map(Device::try_from).collect()
    }

    async fn get(&self, id: i32) -> anyhow::Result<Option<Device>> {
        DeviceEntity::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Error fetching device by id")?
            .map(Device::try_from)
            .transpose()
    }

    async fn save_status(&self, device: &Device) -> anyhow::Result<()> {
        let last_communication: DateTimeWithTimeZone = device.last_communication.into();

        let result = DeviceEntity::update_many()
            .col_expr(device::Column::IsOnline, Expr::value(device.is_online))
            .col_expr(
                device::Column::LastCommunication,
                Expr::value(last_communication),
            )
            .filter(device::Column::Id.eq(device.id))
            .exec(&self.conn)
            .await
            .context("Error saving device status")?;

        if result.rows_affected == 0 {
            return Err(anyhow!("Device {} no longer exists", device.id));
        }

        Ok(())
    }
}

/// Registry held in memory, seeded from configuration.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<i32, Device>>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeded devices start online, matching a cold start of the debounce tracker.
    pub fn from_seeds(seeds: &[DeviceSeed], now: DateTime<Utc>) -> Self {
        let store = Self::new();
        for seed in seeds {
            store.insert(Device {
                id: seed.id,
                name: seed.name.clone(),
                address: seed.address.clone(),
                port: seed.port,
                is_online: true,
                last_communication: now,
            });
        }
        store
    }

    pub fn insert(&self, device: Device) {
        self.devices.write().unwrap().insert(device.id, device);
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn list(&self) -> anyhow::Result<Vec<Device>> {
        Ok(self.devices.read().unwrap().values().cloned().collect())
    }

    async fn get(&self, id: i32) -> anyhow::Result<Option<Device>> {
        Ok(self.devices.read().unwrap().get(&id).cloned())
    }

    async fn save_status(&self, device: &Device) -> anyhow::Result<()> {
        let mut devices = self.devices.write().unwrap();
        let stored = devices
            .get_mut(&device.id)
            .ok_or_else(|| anyhow!("Device {} no longer exists", device.id))?;

        stored.is_online = device.is_online;
        stored.last_communication = device.last_communication;
        Ok(())
    }
}
