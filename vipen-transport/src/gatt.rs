//! GATT transport trait for the ViPen link

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;
use vipen_core::ViPenResult;

use crate::discovery::DiscoveryFilter;

/// A discovered peripheral
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Platform device identifier
    pub id: String,
    /// Advertised local name, if any
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", name, self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Handle to a resolved primary service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub uuid: Uuid,
}

/// Handle to a resolved characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// Unsolicited event raised by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Value pushed by the peripheral on a subscribed characteristic
    Notification { characteristic: Uuid, value: Vec<u8> },
    /// The link to `device` dropped
    Disconnected { device: String },
}

/// Transport interface to a BLE peripheral exposing the ViPen service
///
/// A transport holds at most one link. Every request is a single GATT
/// exchange; retrying and pacing are left to the session layer.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Scan for a peripheral matching any of `filters`
    ///
    /// # Returns
    /// The first matching device, or `None` once `timeout` elapses
    async fn discover(
        &self,
        filters: &[DiscoveryFilter],
        timeout: Duration,
    ) -> ViPenResult<Option<DeviceHandle>>;

    /// Open the link to a previously discovered device
    async fn connect(&self, device: &DeviceHandle) -> ViPenResult<()>;

    /// Close the link; closing an already closed link succeeds
    async fn disconnect(&self) -> ViPenResult<()>;

    /// Check if the link is currently up
    async fn is_connected(&self) -> bool;

    /// Look up a primary service on the connected peripheral
    async fn resolve_service(&self, uuid: Uuid) -> ViPenResult<ServiceHandle>;

    /// Look up a characteristic of a resolved service
    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> ViPenResult<CharacteristicHandle>;

    /// Enable notifications on a characteristic
    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> ViPenResult<()>;

    /// Disable notifications on a characteristic
    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> ViPenResult<()>;

    /// Write a value (with response)
    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> ViPenResult<()>;

    /// Read a value
    async fn read(&self, characteristic: &CharacteristicHandle) -> ViPenResult<Vec<u8>>;

    /// Subscribe to notifications and link events
    ///
    /// Events delivered on one receiver arrive in the order the transport
    /// produced them.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
