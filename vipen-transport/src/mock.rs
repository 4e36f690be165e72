//! Scriptable in-memory transport
//!
//! Stands in for a real peripheral in tests and demos: it advertises a set
//! of devices, exposes the services registered on it, records every call,
//! and can be told to fail operations, stall connects, push notifications
//! or drop the link.

use crate::discovery::{DiscoveryFilter, GattProfile};
use crate::gatt::{CharacteristicHandle, DeviceHandle, GattTransport, ServiceHandle, TransportEvent};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;
use vipen_core::{ViPenError, ViPenResult};

const EVENT_CAPACITY: usize = 1024;

/// Operation kinds that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Discover,
    Connect,
    ResolveService,
    ResolveCharacteristic,
    Subscribe,
    Unsubscribe,
    Write,
    Read,
}

/// A recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Discover,
    Connect(String),
    Disconnect,
    ResolveService(Uuid),
    ResolveCharacteristic(Uuid),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Write(Uuid, Vec<u8>),
    Read(Uuid),
}

#[derive(Debug, Clone)]
struct MockDevice {
    handle: DeviceHandle,
    services: Vec<Uuid>,
}

/// Notifications pushed when a matching write is received
#[derive(Debug, Clone)]
struct WriteResponse {
    trigger: Vec<u8>,
    characteristic: Uuid,
    fragments: Vec<Vec<u8>>,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<MockDevice>,
    gatt: HashMap<Uuid, Vec<Uuid>>,
    connected: Option<DeviceHandle>,
    subscribed: HashSet<Uuid>,
    failures: HashMap<MockOp, u32>,
    connect_delay: Option<Duration>,
    reads: HashMap<Uuid, Vec<u8>>,
    write_responses: Vec<WriteResponse>,
    calls: Vec<MockCall>,
    connect_count: usize,
}

/// In-memory `GattTransport`
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    events: broadcast::Sender<TransportEvent>,
}

impl MockTransport {
    /// Create a transport with no devices
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            events,
        }
    }

    /// Create a transport advertising one ViPen device that exposes `profile`
    pub fn with_profile(profile: &GattProfile) -> Self {
        let transport = Self::new();
        transport.add_device(
            DeviceHandle::new("mock-vipen-1", Some("ViPen".to_string())),
            vec![profile.service],
        );
        transport.add_service(
            profile.service,
            vec![
                profile.reading,
                profile.control,
                profile.wave_data,
                profile.user_data,
            ],
        );
        transport
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advertise a device
    pub fn add_device(&self, handle: DeviceHandle, services: Vec<Uuid>) {
        self.lock().devices.push(MockDevice { handle, services });
    }

    /// Register a service and its characteristics
    pub fn add_service(&self, service: Uuid, characteristics: Vec<Uuid>) {
        self.lock().gatt.insert(service, characteristics);
    }

    /// Make the next `times` calls of `op` fail with a transport error
    pub fn fail_next(&self, op: MockOp, times: u32) {
        self.lock().failures.insert(op, times);
    }

    /// Stall every connect for `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.lock().connect_delay = Some(delay);
    }

    /// Value returned by reads of `characteristic`
    pub fn set_read_value(&self, characteristic: Uuid, value: Vec<u8>) {
        self.lock().reads.insert(characteristic, value);
    }

    /// Push `fragments` on `characteristic` whenever `trigger` is written
    pub fn respond_to_write(&self, trigger: &[u8], characteristic: Uuid, fragments: Vec<Vec<u8>>) {
        self.lock().write_responses.push(WriteResponse {
            trigger: trigger.to_vec(),
            characteristic,
            fragments,
        });
    }

    /// Push a notification if the characteristic is subscribed
    pub fn notify(&self, characteristic: Uuid, value: Vec<u8>) {
        let deliver = {
            let state = self.lock();
            state.connected.is_some() && state.subscribed.contains(&characteristic)
        };
        if deliver {
            let _ = self.events.send(TransportEvent::Notification {
                characteristic,
                value,
            });
        }
    }

    /// Simulate the peripheral going out of range
    pub fn drop_link(&self) {
        let dropped = {
            let mut state = self.lock();
            state.subscribed.clear();
            state.connected.take()
        };
        if let Some(device) = dropped {
            let _ = self.events.send(TransportEvent::Disconnected { device: device.id });
        }
    }

    /// Broadcast `event` as if the backend had raised it
    pub fn push_event(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    /// Forget the recorded calls
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> usize {
        self.lock().connect_count
    }

    /// Characteristics currently subscribed
    pub fn subscribed(&self) -> HashSet<Uuid> {
        self.lock().subscribed.clone()
    }

    fn record(&self, call: MockCall, op: Option<MockOp>) -> ViPenResult<()> {
        let mut state = self.lock();
        state.calls.push(call);
        if let Some(op) = op {
            if let Some(remaining) = state.failures.get_mut(&op) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ViPenError::Transport(format!("injected {:?} failure", op)));
                }
            }
        }
        Ok(())
    }

    fn require_link(&self) -> ViPenResult<()> {
        if self.lock().connected.is_none() {
            return Err(ViPenError::Transport("not connected".to_string()));
        }
        Ok(())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    async fn discover(
        &self,
        filters: &[DiscoveryFilter],
        _timeout: Duration,
    ) -> ViPenResult<Option<DeviceHandle>> {
        self.record(MockCall::Discover, Some(MockOp::Discover))?;
        let state = self.lock();
        Ok(state
            .devices
            .iter()
            .find(|d| DiscoveryFilter::any_matches(filters, d.handle.name.as_deref(), &d.services))
            .map(|d| d.handle.clone()))
    }

    async fn connect(&self, device: &DeviceHandle) -> ViPenResult<()> {
        self.record(MockCall::Connect(device.id.clone()), Some(MockOp::Connect))?;
        let delay = self.lock().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d.handle == *device) {
            return Err(ViPenError::Transport(format!("unknown device {}", device)));
        }
        state.connected = Some(device.clone());
        state.connect_count += 1;
        Ok(())
    }

    async fn disconnect(&self) -> ViPenResult<()> {
        let mut state = self.lock();
        state.calls.push(MockCall::Disconnect);
        state.connected = None;
        state.subscribed.clear();
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.lock().connected.is_some()
    }

    async fn resolve_service(&self, uuid: Uuid) -> ViPenResult<ServiceHandle> {
        self.record(MockCall::ResolveService(uuid), Some(MockOp::ResolveService))?;
        self.require_link()?;
        if self.lock().gatt.contains_key(&uuid) {
            Ok(ServiceHandle { uuid })
        } else {
            Err(ViPenError::Transport(format!("service {} not found", uuid)))
        }
    }

    async fn resolve_characteristic(
        &self,
        service: &ServiceHandle,
        uuid: Uuid,
    ) -> ViPenResult<CharacteristicHandle> {
        self.record(
            MockCall::ResolveCharacteristic(uuid),
            Some(MockOp::ResolveCharacteristic),
        )?;
        self.require_link()?;
        let found = self
            .lock()
            .gatt
            .get(&service.uuid)
            .is_some_and(|chars| chars.contains(&uuid));
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
        self.record(MockCall::Subscribe(characteristic.uuid), Some(MockOp::Subscribe))?;
        self.require_link()?;
        self.lock().subscribed.insert(characteristic.uuid);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> ViPenResult<()> {
        self.record(
            MockCall::Unsubscribe(characteristic.uuid),
            Some(MockOp::Unsubscribe),
        )?;
        self.require_link()?;
        self.lock().subscribed.remove(&characteristic.uuid);
        Ok(())
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> ViPenResult<()> {
        self.record(
            MockCall::Write(characteristic.uuid, data.to_vec()),
            Some(MockOp::Write),
        )?;
        self.require_link()?;
        let responses: Vec<WriteResponse> = self
            .lock()
            .write_responses
            .iter()
            .filter(|r| r.trigger == data)
            .cloned()
            .collect();
        for response in responses {
            for fragment in response.fragments {
                self.notify(response.characteristic, fragment);
            }
        }
        Ok(())
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> ViPenResult<Vec<u8>> {
        self.record(MockCall::Read(characteristic.uuid), Some(MockOp::Read))?;
        self.require_link()?;
        self.lock()
            .reads
            .get(&characteristic.uuid)
            .cloned()
            .ok_or_else(|| ViPenError::Transport(format!("no value for {}", characteristic.uuid)))
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
