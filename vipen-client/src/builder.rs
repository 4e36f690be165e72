//! Client builder
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vipen_client::ClientBuilder;
//! use vipen_transport::{GattProfile, MockTransport};
//!
//! # async fn run(profile: GattProfile) -> vipen_core::ViPenResult<()> {
//! let transport = Arc::new(MockTransport::with_profile(&profile));
//! let client = ClientBuilder::new(profile).build(transport)?;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

use crate::client::ViPenClient;
use crate::config::ClientConfig;
use crate::pipeline::ReadingPipeline;
use crate::session::SessionActor;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use vipen_core::{ViPenError, ViPenResult, WaveformLayout};
use vipen_session::{SessionState, SessionStatistics, TimingConfig};
use vipen_transport::{DiscoveryFilter, GattProfile, GattTransport};

const COMMAND_CAPACITY: usize = 32;

/// Builder for [`ViPenClient`]
///
/// Collects the profile, filters, timing and waveform layout, validates
/// them, and spawns the tasks that serve the client.
///
/// # Configuration Flow
/// 1. Create the builder with `ClientBuilder::new(profile)` or `from_config`
/// 2. Optionally replace the discovery filters
/// 3. Optionally adjust retry bounds, delays and timeouts with `timing`
/// 4. Select the waveform layout the sensor firmware sends
/// 5. Call `build(transport)` from inside a Tokio runtime
///
/// `build` rejects an invalid configuration before anything is spawned,
/// including a waveform header length outside the supported range.
///
/// # Default Settings
/// - Filters: exact name "ViPen", name prefix "ViPen", the profile's service
/// - Timing: `TimingConfig::default()`
/// - Layout: `WaveformLayout::COMPACT`
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a builder for a sensor exposing `profile`
    pub fn new(profile: GattProfile) -> Self {
        Self {
            config: ClientConfig::new(profile),
        }
    }

    /// Start from a complete configuration
    pub fn from_config(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Replace the discovery filters
    pub fn filters(mut self, filters: Vec<DiscoveryFilter>) -> Self {
        self.config.filters = filters;
        self
    }

    /// Replace the timing parameters
    pub fn timing(mut self, timing: TimingConfig) -> Self {
        self.config.timing = timing;
        self
    }

    /// Select the waveform capture layout
    pub fn layout(mut self, layout: WaveformLayout) -> Self {
        self.config.layout = layout;
        self
    }

    /// Capacity of the client event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Spawn the session and reading pipeline on the current Tokio runtime
    ///
    /// # Errors
    /// * `Config` - Invalid configuration, or no Tokio runtime is running
    pub fn build(self, transport: Arc<dyn GattTransport>) -> ViPenResult<ViPenClient> {
        self.config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            ViPenError::Config("the client must be built inside a Tokio runtime".to_string())
        })?;

        let (events, _) = broadcast::channel(self.config.event_capacity);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let statistics = SessionStatistics::shared();

        let pipeline = ReadingPipeline::new(
            self.config.profile.reading,
            events.clone(),
            statistics.clone(),
        );
        let pipeline = runtime.spawn(pipeline.run(transport.events()));

        let actor = SessionActor::new(
            transport,
            self.config,
            state_tx,
            events.clone(),
            statistics.clone(),
        );
        runtime.spawn(actor.run(command_rx));

        Ok(ViPenClient::new(command_tx, events, state_rx, statistics, pipeline))
    }
}
