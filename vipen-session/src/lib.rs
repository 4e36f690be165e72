//! Session layer for the ViPen sensor
//!
//! This crate provides the pieces the client's session actor is built from:
//! - Session state machine
//! - Timing configuration
//! - Resilient operation executor (link check, bounded retries, linear backoff)
//! - Waveform fragment reassembly
//! - Session statistics

pub mod config;
pub mod executor;
pub mod reassembler;
pub mod state;
pub mod statistics;

pub use config::TimingConfig;
pub use executor::{LinkProbe, OperationExecutor, RetryPolicy};
pub use reassembler::FragmentReassembler;
pub use state::SessionState;
pub use statistics::{SessionStatistics, SharedStatistics};
