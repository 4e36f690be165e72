//! ViPen sensor client
//!
//! This crate provides the client a dashboard uses to talk to a ViPen
//! sensor: connection management with automatic one-shot reconnect, the
//! streaming reading pipeline, measurement commands, waveform download and
//! user data reads.

pub mod builder;
pub mod client;
pub mod config;
pub mod events;
mod pipeline;
mod session;

pub use builder::ClientBuilder;
pub use client::ViPenClient;
pub use config::{ClientConfig, DEFAULT_EVENT_CAPACITY};
pub use events::{ClientEvent, ObserverHandle};
