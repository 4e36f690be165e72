//! Streaming reading pipeline
//!
//! Decodes every notification on the reading characteristic and publishes
//! it as a [`ClientEvent::Reading`]. Runs as its own task beside the
//! session actor so that readings keep flowing while a command is in
//! progress.

use crate::events::ClientEvent;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use vipen_core::decode_instant_reading;
use vipen_session::{SessionStatistics, SharedStatistics};
use vipen_transport::{TransportEvent, Uuid};

pub(crate) struct ReadingPipeline {
    characteristic: Uuid,
    events: broadcast::Sender<ClientEvent>,
    statistics: SharedStatistics,
}

impl ReadingPipeline {
    pub(crate) fn new(
        characteristic: Uuid,
        events: broadcast::Sender<ClientEvent>,
        statistics: SharedStatistics,
    ) -> Self {
        Self {
            characteristic,
            events,
            statistics,
        }
    }

    /// Handle one transport event; anything but a reading notification is ignored
    pub(crate) fn handle(&self, event: &TransportEvent) {
        let TransportEvent::Notification {
            characteristic,
            value,
        } = event
        else {
            return;
        };
        if *characteristic != self.characteristic {
            return;
        }

        match decode_instant_reading(value, SystemTime::now()) {
            Ok(reading) => {
                SessionStatistics::update(&self.statistics, |s| s.readings_delivered += 1);
                // Readings are not buffered for late observers
                let _ = self.events.send(ClientEvent::Reading(reading));
            }
            Err(e) => {
                SessionStatistics::update(&self.statistics, |s| s.readings_dropped += 1);
                log::warn!("Dropping reading notification: {}", e);
            }
        }
    }

    pub(crate) async fn run(self, mut transport_events: broadcast::Receiver<TransportEvent>) {
        loop {
            match transport_events.recv().await {
                Ok(event) => self.handle(&event),
                Err(RecvError::Lagged(missed)) => {
                    log::warn!("Reading pipeline lagged, {} transport events skipped", missed);
                }
                Err(RecvError::Closed) => {
                    log::debug!("Transport event channel closed, reading pipeline stopped");
                    break;
                }
            }
        }
    }
}
