//! Transport layer module for the ViPen sensor
//!
//! This crate defines the GATT transport interface the session layer drives,
//! the device selection filters and vendor profile, an in-memory transport,
//! and (behind the `btleplug` feature) a transport over the host's BLE stack.

pub mod discovery;
pub mod gatt;
pub mod mock;
#[cfg(feature = "btleplug")]
pub mod ble;

pub use discovery::{DiscoveryFilter, GattProfile, DEFAULT_DEVICE_NAME};
pub use gatt::{CharacteristicHandle, DeviceHandle, GattTransport, ServiceHandle, TransportEvent};
pub use mock::{MockCall, MockOp, MockTransport};
#[cfg(feature = "btleplug")]
pub use ble::BtleplugTransport;
pub use uuid::Uuid;
pub use vipen_core::{ViPenError, ViPenResult};
