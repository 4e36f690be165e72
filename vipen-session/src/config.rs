//! Timing parameters for the session layer

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry bounds, pacing delays and timeouts used by a session
///
/// Defaults match what the ViPen peripheral tolerates in the field. Tests
/// shorten them to run quickly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Attempts per GATT request
    pub max_attempts: u32,
    /// Backoff unit; the wait after attempt `n` is `n * backoff_step`
    pub backoff_step: Duration,
    /// Attempts for resolving the vendor service
    pub service_resolve_attempts: u32,
    /// How long to scan for a matching device
    pub discovery_timeout: Duration,
    /// Overall bound on opening the link
    pub connect_timeout: Duration,
    /// Delay before each characteristic lookup
    pub characteristic_pacing: Duration,
    /// Delay before the automatic reconnect after a link loss
    pub reconnect_delay: Duration,
    /// Delay between subscribing the wave characteristic and requesting a download
    pub wave_settle_delay: Duration,
    /// Bound on a whole waveform reassembly
    pub capture_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(500),
            service_resolve_attempts: 5,
            discovery_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            characteristic_pacing: Duration::from_millis(200),
            reconnect_delay: Duration::from_secs(2),
            wave_settle_delay: Duration::from_millis(500),
            capture_timeout: Duration::from_secs(30),
        }
    }
}

impl TimingConfig {
    /// Validate the configuration
    pub fn validate(&self) -> vipen_core::ViPenResult<()> {
        if self.max_attempts == 0 || self.service_resolve_attempts == 0 {
            return Err(vipen_core::ViPenError::Config(
                "attempt counts must be at least 1".to_string(),
            ));
        }
        if self.capture_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(vipen_core::ViPenError::Config(
                "connect and capture timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
