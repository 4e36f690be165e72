//! BLE transport backed by `btleplug`

use crate::discovery::DiscoveryFilter;
use crate::gatt::{CharacteristicHandle, DeviceHandle, GattTransport, ServiceHandle, TransportEvent};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;
use vipen_core::{ViPenError, ViPenResult};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const EVENT_CAPACITY: usize = 1024;

fn gatt_err(e: btleplug::Error) -> ViPenError {
    ViPenError::Transport(e.to_string())
}

/// The open link: adapter, peripheral and the tasks pumping its events
struct Link {
    peripheral: Peripheral,
    pumps: Vec<JoinHandle<()>>,
}

impl Link {
    fn stop_pumps(&mut self) {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
    }
}

#[derive(Default)]
struct BleState {
    discovered: HashMap<String, (Adapter, Peripheral)>,
    link: Option<Link>,
}

/// `GattTransport` over the host's Bluetooth adapters
pub struct BtleplugTransport {
    manager: Manager,
    state: Mutex<BleState>,
    events: broadcast::Sender<TransportEvent>,
}

impl BtleplugTransport {
    /// Create a transport using the platform BLE manager
    pub async fn new() -> ViPenResult<Self> {
        let manager = Manager::new().await.map_err(gatt_err)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            manager,
            state: Mutex::new(BleState::default()),
            events,
        })
    }

    async fn adapters(&self) -> ViPenResult<Vec<Adapter>> {
        let adapters = self.manager.adapters().await.map_err(gatt_err)?;
        if adapters.is_empty() {
            return Err(ViPenError::Transport("no Bluetooth adapter available".to_string()));
        }
        Ok(adapters)
    }

    async fn peripheral(&self) -> ViPenResult<Peripheral> {
        let state = self.state.lock().await;
        state
            .link
            .as_ref()
            .map(|link| link.peripheral.clone())
            .ok_or(ViPenError::LinkNotReady)
    }

    async fn characteristic(&self, handle: &CharacteristicHandle) -> ViPenResult<(Peripheral, Characteristic)> {
        let peripheral = self.peripheral().await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.uuid && c.service_uuid == handle.service)
            .ok_or_else(|| ViPenError::CharacteristicNotFound(handle.uuid.to_string()))?;
        Ok((peripheral, characteristic))
    }

    async fn find_matching(
        &self,
        adapters: &[Adapter],
        filters: &[DiscoveryFilter],
    ) -> ViPenResult<Option<(Adapter, Peripheral, DeviceHandle)>> {
        for adapter in adapters {
            for peripheral in adapter.peripherals().await.map_err(gatt_err)? {
                let Some(properties) = peripheral.properties().await.map_err(gatt_err)? else {
                    continue;
                };
                let name = properties.local_name.as_deref();
                if DiscoveryFilter::any_matches(filters, name, &properties.services) {
                    let handle = DeviceHandle::new(peripheral.id().to_string(), properties.local_name.clone());
                    return Ok(Some((adapter.clone(), peripheral, handle)));
                }
            }
        }
        Ok(None)
    }

    fn spawn_pumps(&self, adapter: Adapter, peripheral: Peripheral, device_id: String) -> Vec<JoinHandle<()>> {
        let notifications_tx = self.events.clone();
        let notifications_peripheral = peripheral.clone();
        let notifications = tokio::spawn(async move {
            let mut stream = match notifications_peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Failed to open notification stream: {}", e);
                    return;
                }
            };
            while let Some(notification) = stream.next().await {
                let _ = notifications_tx.send(TransportEvent::Notification {
                    characteristic: notification.uuid,
                    value: notification.value,
                });
            }
            log::debug!("Notification stream ended");
        });

        let link_tx = self.events.clone();
        let peripheral_id = peripheral.id();
        let link = tokio::spawn(async move {
            let mut stream = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Failed to open adapter event stream: {}", e);
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == peripheral_id {
                        log::info!("Peripheral {} disconnected", device_id);
                        let _ = link_tx.send(TransportEvent::Disconnected {
                            device: device_id.clone(),
                        });
                    }
                }
            }
        });

        vec![notifications, link]
    }
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    async fn discover(
        &self,
        filters: &[DiscoveryFilter],
        timeout: Duration,
    ) -> ViPenResult<Option<DeviceHandle>> {
        let adapters = self.adapters().await?;
        for adapter in &adapters {
            adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(gatt_err)?;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let found = loop {
            if let Some(found) = self.find_matching(&adapters, filters).await? {
                break Some(found);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        };

        for adapter in &adapters {
            if let Err(e) = adapter.stop_scan().await {
                log::debug!("Failed to stop scan: {}", e);
            }
        }

        let Some((adapter, peripheral, handle)) = found else {
            return Ok(None);
        };
        log::info!("Discovered {}", handle);
        self.state
            .lock()
            .await
            .discovered
            .insert(handle.id.clone(), (adapter, peripheral));
        Ok(Some(handle))
    }

    async fn connect(&self, device: &DeviceHandle) -> ViPenResult<()> {
        let mut state = self.state.lock().await;
        let (adapter, peripheral) = state
            .discovered
            .get(&device.id)
            .cloned()
            .ok_or_else(|| ViPenError::Transport(format!("device {} was not discovered", device)))?;

        if let Some(mut old) = state.link.take() {
            old.stop_pumps();
        }

        if !peripheral.is_connected().await.map_err(gatt_err)? {
            peripheral.connect().await.map_err(gatt_err)?;
        }
        peripheral.discover_services().await.map_err(gatt_err)?;

        let pumps = self.spawn_pumps(adapter, peripheral.clone(), device.id.clone());
        state.link = Some(Link { peripheral, pumps });
        Ok(())
    }

    async fn disconnect(&self) -> ViPenResult<()> {
        let link = self.state.lock().await.link.take();
        if let Some(mut link) = link {
            link.stop_pumps();
            if link.peripheral.is_connected().await.unwrap_or(false) {
                link.peripheral.disconnect().await.map_err(gatt_err)?;
            }
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.peripheral().await {
            Ok(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn resolve_service(&self, uuid: Uuid) -> ViPenResult<ServiceHandle> {
        let peripheral = self.peripheral().await?;
        if peripheral.services().iter().any(|s| s.uuid == uuid) {
            return Ok(ServiceHandle { uuid });
        }
        // Service tables are sometimes incomplete right after connecting
        peripheral.discover_services().await.map_err(gatt_err)?;
        Err(ViPenError::Transport(format!("service {} not found", uuid)))
    }

    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> ViPenResult<CharacteristicHandle> {
        let peripheral = self.peripheral().await?;
        let found = peripheral
            .services()
            .iter()
            .filter(|s| s.uuid == service.uuid)
            .any(|s| s.characteristics.iter().any(|c| c.uuid == uuid));
        if found {
            Ok(CharacteristicHandle {
                service: service.uuid,
                uuid,
            })
        } else {
            Err(ViPenError::CharacteristicNotFound(uuid.to_string()))
        }
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> ViPenResult<()> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral.subscribe(&c).await.map_err(gatt_err)
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> ViPenResult<()> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral.unsubscribe(&c).await.map_err(gatt_err)
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> ViPenResult<()> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral
            .write(&c, data, WriteType::WithResponse)
            .await
            .map_err(gatt_err)
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> ViPenResult<Vec<u8>> {
        let (peripheral, c) = self.characteristic(characteristic).await?;
        peripheral.read(&c).await.map_err(gatt_err)
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
