//! Device selection filters and the vendor GATT profile

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Advertised name used by ViPen sensors
pub const DEFAULT_DEVICE_NAME: &str = "ViPen";

/// One device selection strategy
///
/// Several filters are tried as alternatives; a device matching any of
/// them is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryFilter {
    /// Exact advertised name
    Name(String),
    /// Advertised name prefix
    NamePrefix(String),
    /// Advertised primary service
    Service(Uuid),
}

impl DiscoveryFilter {
    /// Check whether an advertisement matches this filter
    pub fn matches(&self, local_name: Option<&str>, services: &[Uuid]) -> bool {
        match self {
            DiscoveryFilter::Name(name) => local_name == Some(name.as_str()),
            DiscoveryFilter::NamePrefix(prefix) => {
                local_name.is_some_and(|n| n.starts_with(prefix.as_str()))
            }
            DiscoveryFilter::Service(uuid) => services.contains(uuid),
        }
    }

    /// Check an advertisement against a set of alternative filters
    pub fn any_matches(filters: &[DiscoveryFilter], local_name: Option<&str>, services: &[Uuid]) -> bool {
        filters.iter().any(|f| f.matches(local_name, services))
    }
}

/// UUIDs of the vendor service and its characteristics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattProfile {
    /// Vendor primary service
    pub service: Uuid,
    /// Instant reading notifications
    pub reading: Uuid,
    /// Command writes (start, stop, download request)
    pub control: Uuid,
    /// Waveform fragment notifications
    pub wave_data: Uuid,
    /// User data record reads
    pub user_data: Uuid,
}

impl GattProfile {
    /// The characteristics resolved during connection setup, in order
    pub fn characteristics(&self) -> [(&'static str, Uuid); 4] {
        [
            ("reading", self.reading),
            ("control", self.control),
            ("wave data", self.wave_data),
            ("user data", self.user_data),
        ]
    }

    /// Default filter set: exact name, name prefix and service
    pub fn default_filters(&self) -> Vec<DiscoveryFilter> {
        vec![
            DiscoveryFilter::Name(DEFAULT_DEVICE_NAME.to_string()),
            DiscoveryFilter::NamePrefix(DEFAULT_DEVICE_NAME.to_string()),
            DiscoveryFilter::Service(self.service),
        ]
    }
}
