//! Session statistics collection

use std::sync::{Arc, Mutex};

/// Session counters
///
/// Tracks what happened on one client session so the host can render link
/// quality next to the readings.
///
/// # What Is Counted
/// - **Readings**: notifications decoded and delivered, and those dropped as malformed
/// - **Retries**: failed attempts the executor retried, and operations that ran out of attempts
/// - **Captures**: waveform downloads completed and failed
/// - **Link**: unsolicited link losses and automatic reconnect attempts
///
/// # Usage
/// The session actor, the executor and the reading pipeline update a
/// [`SharedStatistics`] block as they run. `ViPenClient::statistics()`
/// returns a snapshot at any time; counters are never reset by the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    /// Readings decoded and delivered to consumers
    pub readings_delivered: u64,
    /// Reading notifications dropped because they failed to decode
    pub readings_dropped: u64,
    /// Failed attempts that were retried
    pub retries: u64,
    /// Operations that ran out of attempts
    pub operations_exhausted: u64,
    /// Waveform captures completed
    pub captures_completed: u64,
    /// Waveform captures failed
    pub captures_failed: u64,
    /// Unsolicited link losses
    pub link_losses: u64,
    /// Automatic reconnect attempts
    pub reconnect_attempts: u64,
}

/// Statistics shared between the tasks of one session
pub type SharedStatistics = Arc<Mutex<SessionStatistics>>;

impl SessionStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared, zeroed statistics block
    pub fn shared() -> SharedStatistics {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Apply `f` to the shared block, tolerating a poisoned lock
    pub fn update(shared: &SharedStatistics, f: impl FnOnce(&mut SessionStatistics)) {
        let mut stats = shared.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *stats);
    }

    /// Copy out the shared block
    pub fn snapshot(shared: &SharedStatistics) -> SessionStatistics {
        shared.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Percentage of reading notifications that were dropped
    ///
    /// Returns 0.0 if no notifications have been received.
    pub fn drop_rate(&self) -> f64 {
        let total = self.readings_delivered + self.readings_dropped;
        if total == 0 {
            0.0
        } else {
            (self.readings_dropped as f64 / total as f64) * 100.0
        }
    }
}
