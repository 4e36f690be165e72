//! Client configuration

use serde::{Deserialize, Serialize};
use vipen_core::{ViPenError, ViPenResult, WAVEFORM_BLOCK_LEN, WAVEFORM_HEADER_LEN, WaveformLayout};
use vipen_session::TimingConfig;
use vipen_transport::{DiscoveryFilter, GattProfile};

/// Default capacity of the client event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Everything a client needs besides its transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Vendor service and characteristic UUIDs
    pub profile: GattProfile,
    /// Alternative device selection filters
    pub filters: Vec<DiscoveryFilter>,
    /// Retry bounds, pacing delays and timeouts
    pub timing: TimingConfig,
    /// Waveform capture framing
    pub layout: WaveformLayout,
    /// Capacity of the event channel returned by `subscribe()`
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Configuration with the default filters, timing and layout for `profile`
    pub fn new(profile: GattProfile) -> Self {
        Self {
            filters: profile.default_filters(),
            profile,
            timing: TimingConfig::default(),
            layout: WaveformLayout::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ViPenResult<()> {
        if self.filters.is_empty() {
            return Err(ViPenError::Config(
                "at least one discovery filter is required".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ViPenError::Config(
                "event capacity must be non-zero".to_string(),
            ));
        }
        let header_len = self.layout.header_len;
        if !(WAVEFORM_HEADER_LEN..=WAVEFORM_BLOCK_LEN).contains(&header_len) {
            return Err(ViPenError::Config(format!(
                "waveform header length {} outside {}..={}",
                header_len, WAVEFORM_HEADER_LEN, WAVEFORM_BLOCK_LEN
            )));
        }
        self.timing.validate()
    }
}
