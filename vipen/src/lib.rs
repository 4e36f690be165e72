//! vipen - Rust client for the ViPen BLE vibration/temperature sensor
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `vipen-core`: Error taxonomy, decoded data model and wire codec
//! - `vipen-transport`: GATT transport trait, discovery filters, mock and BLE backends
//! - `vipen-session`: Session state machine, retrying executor, fragment reassembly
//! - `vipen-client`: Session actor, reading pipeline and the public client handle
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use vipen::client::ClientBuilder;
//! use vipen::transport::{GattProfile, MockTransport};
//!
//! # async fn run(profile: GattProfile) -> vipen::ViPenResult<()> {
//! let client = ClientBuilder::new(profile)
//!     .build(Arc::new(MockTransport::with_profile(&profile)))?;
//! let _readings = client.on_reading(|reading| println!("{:.2} mm/s", reading.velocity));
//! client.connect().await?;
//! client.start_measurement().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - `btleplug`: enables `transport::BtleplugTransport` over the host's Bluetooth stack
//!
//! # Examples
//!
//! See `examples/monitor.rs` (requires the `btleplug` feature).

// Re-export core types
pub use vipen_core::{
    CaptureError, CommandError, ConnectError, InstantReading, ReadError, UserDataRecord,
    ViPenError, ViPenResult, WaveformBlock, WaveformCapture, WaveformHeader, WaveformLayout,
};

// Re-export the client API
pub use vipen_client::{ClientBuilder, ClientConfig, ClientEvent, ObserverHandle, ViPenClient};
pub use vipen_session::{SessionState, SessionStatistics, TimingConfig};

pub mod codec {
    pub use vipen_core::codec::*;
}

pub mod client {
    pub use vipen_client::*;
}

pub mod session {
    pub use vipen_session::*;
}

pub mod transport {
    pub use vipen_transport::*;
}
